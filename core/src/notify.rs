use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How long a notification stays visible, in milliseconds.
pub const TOAST_MILLIS: u64 = 3000;

/// Transient user-facing notification slot.
///
/// Holds at most one message at a time: a later `show` overwrites the message
/// and restarts the display window (last call wins). Expiry is checked on
/// read, so intervening renders never extend or shorten the window.
pub struct Toaster {
    slot: Mutex<Option<(String, Instant)>>,
    ttl: Duration,
}

impl Toaster {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_millis(TOAST_MILLIS))
    }

    /// A toaster with a custom display window (tests).
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
        }
    }

    pub fn show(&self, message: impl Into<String>) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some((message.into(), Instant::now()));
    }

    /// The visible message, if its window has not elapsed.
    #[must_use]
    pub fn current(&self) -> Option<String> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().and_then(|(message, shown_at)| {
            (shown_at.elapsed() < self.ttl).then(|| message.clone())
        })
    }
}

impl Default for Toaster {
    fn default() -> Self {
        Self::new()
    }
}
