use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{FoodEntry, NewEntry};

/// Capacity of the snapshot channel between a store and its consumer. Full
/// snapshots supersede each other, so the buffer never needs to be deep.
pub const SNAPSHOT_BUFFER: usize = 8;

/// External document store collaborator, scoped per user.
///
/// Mutations are fire-and-forget relative to the local list: the mirror
/// observes the resulting change through [`EntryStore::subscribe`] rather
/// than being patched locally.
pub trait EntryStore: Send + Sync {
    /// Create a document from the six entry fields plus the client-generated
    /// timestamp. Returns the store-assigned id.
    fn create(&self, user_id: &str, entry: &NewEntry, created_at_ms: i64) -> Result<String>;

    /// Remove a document by id. Returns false when no such document exists
    /// for this user.
    fn delete(&self, user_id: &str, entry_id: &str) -> Result<bool>;

    /// Open a standing subscription to the user's collection. Every event is
    /// a complete snapshot, owner-filtered and ordered newest-first, with an
    /// initial snapshot delivered promptly after subscribing.
    fn subscribe(&self, user_id: &str) -> Result<Subscription>;
}

/// A cancellable feed of full snapshots.
///
/// Dropping the subscription releases the producing task unconditionally.
pub struct Subscription {
    rx: mpsc::Receiver<Vec<FoodEntry>>,
    producer: JoinHandle<()>,
}

impl Subscription {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Vec<FoodEntry>>, producer: JoinHandle<()>) -> Self {
        Self { rx, producer }
    }

    /// Next snapshot, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Vec<FoodEntry>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.producer.abort();
    }
}
