use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::FoodEntry;
use crate::store::Subscription;
use crate::totals::Totals;

/// The mirrored list plus its derived totals, published as one value.
#[derive(Debug, Clone, Default)]
pub struct LogView {
    /// Newest-first reflection of the remote collection.
    pub entries: Vec<FoodEntry>,
    pub totals: Totals,
}

/// Local mirror of the user's remote collection.
///
/// A spawned fold over the subscription: every snapshot wholesale-replaces
/// the entry list (never an incremental patch), totals are recomputed
/// synchronously, and the combined view is published through a watch channel.
/// When the feed ends the view freezes on the last snapshot; there is no
/// automatic reconnection.
pub struct Mirror {
    rx: watch::Receiver<LogView>,
    task: JoinHandle<()>,
}

impl Mirror {
    /// Start mirroring. The subscription is owned by the fold task and is
    /// released when the mirror is closed or dropped.
    #[must_use]
    pub fn start(mut subscription: Subscription) -> Self {
        let (tx, rx) = watch::channel(LogView::default());
        let task = tokio::spawn(async move {
            while let Some(entries) = subscription.next().await {
                let totals = Totals::of(&entries);
                tx.send_replace(LogView { entries, totals });
            }
            tracing::warn!("entry feed closed; the local list will no longer update");
        });
        Self { rx, task }
    }

    /// The current view: the last published snapshot, or an empty view before
    /// the first one arrives.
    #[must_use]
    pub fn view(&self) -> LogView {
        self.rx.borrow().clone()
    }

    /// Wait for the next published view. Returns `None` once the mirror has
    /// stopped (feed ended or mirror closed).
    pub async fn next_view(&mut self) -> Option<LogView> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Release the subscription. Idempotent; dropping the mirror does the
    /// same.
    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for Mirror {
    fn drop(&mut self) {
        self.task.abort();
    }
}
