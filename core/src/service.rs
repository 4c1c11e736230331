use std::sync::Arc;

use anyhow::{Context, Result};

use crate::mirror::{LogView, Mirror};
use crate::models::EntryDraft;
use crate::notify::Toaster;
use crate::session::UserSession;
use crate::store::EntryStore;

/// Application service tying the session, store, mirror, and notifications
/// together. One instance per process.
///
/// Mutations never touch the mirrored list: the displayed list is correct
/// only after the store's next snapshot arrives.
pub struct MorselService {
    store: Arc<dyn EntryStore>,
    session: UserSession,
    toaster: Toaster,
    mirror: Option<Mirror>,
}

impl MorselService {
    #[must_use]
    pub fn new(store: Arc<dyn EntryStore>, session: UserSession) -> Self {
        Self {
            store,
            session,
            toaster: Toaster::new(),
            mirror: None,
        }
    }

    #[must_use]
    pub fn session(&self) -> &UserSession {
        &self.session
    }

    /// Open the collection subscription and start mirroring. Requires a ready
    /// session.
    pub fn start(&mut self) -> Result<()> {
        let user_id = self
            .session
            .user_id()
            .context("Cannot subscribe: session not ready")?;
        let subscription = self.store.subscribe(user_id)?;
        self.mirror = Some(Mirror::start(subscription));
        Ok(())
    }

    /// Release the subscription. Safe to call when not started.
    pub fn stop(&mut self) {
        if let Some(mirror) = self.mirror.take() {
            mirror.close();
        }
    }

    /// Validate and submit a new entry.
    ///
    /// Every outcome surfaces as a transient notification; the return value
    /// reports whether the create round trip succeeded. No store call is made
    /// for a not-ready session or an invalid draft.
    pub fn add(&self, draft: &EntryDraft) -> bool {
        let Some(user_id) = self.session.user_id() else {
            tracing::warn!("add rejected: session not ready");
            self.toaster.show("Authentication not ready");
            return false;
        };
        let entry = match draft.validate() {
            Ok(entry) => entry,
            Err(e) => {
                self.toaster.show(e.to_string());
                return false;
            }
        };
        let created_at = chrono::Utc::now().timestamp_millis();
        match self.store.create(user_id, &entry, created_at) {
            Ok(id) => {
                tracing::debug!("created entry {id} for user {user_id}");
                self.toaster.show("Food item added");
                true
            }
            Err(e) => {
                tracing::error!("create failed for user {user_id}: {e:#}");
                self.toaster.show("Failed to add food item");
                false
            }
        }
    }

    /// Remove an entry by id. Fire-and-forget relative to the mirrored list.
    pub fn delete(&self, entry_id: &str) -> bool {
        let Some(user_id) = self.session.user_id() else {
            tracing::warn!("delete rejected: session not ready");
            self.toaster.show("Authentication not ready");
            return false;
        };
        match self.store.delete(user_id, entry_id) {
            Ok(true) => {
                self.toaster.show("Food item deleted");
                true
            }
            Ok(false) => {
                tracing::warn!("delete of unknown entry {entry_id}");
                self.toaster.show("Failed to delete food item");
                false
            }
            Err(e) => {
                tracing::error!("delete failed for entry {entry_id}: {e:#}");
                self.toaster.show("Failed to delete food item");
                false
            }
        }
    }

    /// Current mirrored view; empty before the first snapshot or when the
    /// mirror has not been started.
    #[must_use]
    pub fn view(&self) -> LogView {
        self.mirror.as_ref().map_or_else(LogView::default, Mirror::view)
    }

    /// Wait for the next snapshot-driven view. `None` when not started or
    /// once the feed has ended.
    pub async fn next_view(&mut self) -> Option<LogView> {
        self.mirror.as_mut()?.next_view().await
    }

    /// The visible transient notification, if any.
    #[must_use]
    pub fn notice(&self) -> Option<String> {
        self.toaster.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::NewEntry;
    use crate::store::Subscription;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    /// Store that counts mutation calls and refuses subscriptions.
    #[derive(Default)]
    struct CountingStore {
        creates: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl EntryStore for CountingStore {
        fn create(&self, _user_id: &str, _entry: &NewEntry, _created_at_ms: i64) -> Result<String> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok("id".to_string())
        }

        fn delete(&self, _user_id: &str, _entry_id: &str) -> Result<bool> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        fn subscribe(&self, _user_id: &str) -> Result<Subscription> {
            anyhow::bail!("not used in this test")
        }
    }

    fn full_draft() -> EntryDraft {
        EntryDraft {
            name: "Banana".to_string(),
            calories: "105".to_string(),
            protein: "1.3".to_string(),
            fat: "0.4".to_string(),
            carbs: "27".to_string(),
            fiber: "3.1".to_string(),
        }
    }

    #[test]
    fn test_add_with_empty_field_makes_no_store_call() {
        let store = Arc::new(CountingStore::default());
        let service = MorselService::new(store.clone(), UserSession::with_user("u1"));

        let mut draft = full_draft();
        draft.fiber = String::new();
        assert!(!service.add(&draft));
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
        assert_eq!(service.notice().as_deref(), Some("Please fill in all fields"));
    }

    #[test]
    fn test_add_without_ready_session_makes_no_store_call() {
        let store = Arc::new(CountingStore::default());
        let service = MorselService::new(store.clone(), UserSession::not_ready());

        assert!(!service.add(&full_draft()));
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
        assert_eq!(service.notice().as_deref(), Some("Authentication not ready"));
    }

    #[test]
    fn test_delete_without_ready_session_makes_no_store_call() {
        let store = Arc::new(CountingStore::default());
        let service = MorselService::new(store.clone(), UserSession::not_ready());

        assert!(!service.delete("some-id"));
        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_successful_add_notifies() {
        let store = Arc::new(CountingStore::default());
        let service = MorselService::new(store.clone(), UserSession::with_user("u1"));

        assert!(service.add(&full_draft()));
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        assert_eq!(service.notice().as_deref(), Some("Food item added"));
    }

    #[test]
    fn test_failing_store_surfaces_failure_notice() {
        struct FailingStore;
        impl EntryStore for FailingStore {
            fn create(&self, _: &str, _: &NewEntry, _: i64) -> Result<String> {
                anyhow::bail!("store unreachable")
            }
            fn delete(&self, _: &str, _: &str) -> Result<bool> {
                anyhow::bail!("store unreachable")
            }
            fn subscribe(&self, _: &str) -> Result<Subscription> {
                anyhow::bail!("store unreachable")
            }
        }

        let service = MorselService::new(Arc::new(FailingStore), UserSession::with_user("u1"));
        assert!(!service.add(&full_draft()));
        assert_eq!(service.notice().as_deref(), Some("Failed to add food item"));

        assert!(!service.delete("x"));
        assert_eq!(service.notice().as_deref(), Some("Failed to delete food item"));
    }

    #[test]
    fn test_start_requires_ready_session() {
        let store = Arc::new(CountingStore::default());
        let mut service = MorselService::new(store, UserSession::not_ready());
        assert!(service.start().is_err());
    }

    async fn view_after_change(service: &mut MorselService) -> LogView {
        timeout(Duration::from_secs(1), service.next_view())
            .await
            .expect("timed out waiting for snapshot")
            .expect("feed ended unexpectedly")
    }

    #[tokio::test]
    async fn test_add_then_mirror_notify() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        // An entry that predates the subscription, with an older timestamp.
        store
            .create(
                "u1",
                &NewEntry {
                    name: "Yesterday's toast".to_string(),
                    calories: 80.0,
                    protein: 3.0,
                    fat: 1.0,
                    carbs: 15.0,
                    fiber: 1.0,
                },
                1_000,
            )
            .unwrap();

        let mut service = MorselService::new(store, UserSession::with_user("u1"));
        service.start().unwrap();
        assert_eq!(view_after_change(&mut service).await.entries.len(), 1);

        assert!(service.add(&full_draft()));
        let view = view_after_change(&mut service).await;

        let matches: Vec<_> = view.entries.iter().filter(|e| e.name == "Banana").collect();
        assert_eq!(matches.len(), 1, "entry must appear exactly once");
        // Newest first: the fresh client timestamp sorts before the old one.
        assert_eq!(view.entries[0].name, "Banana");
        assert_eq!(view.entries[1].name, "Yesterday's toast");
        assert!((view.totals.calories - 185.0).abs() < 1e-9);
        service.stop();
    }

    #[tokio::test]
    async fn test_delete_then_mirror_notify() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let id = store
            .create(
                "u1",
                &NewEntry {
                    name: "Doomed".to_string(),
                    calories: 10.0,
                    protein: 0.0,
                    fat: 0.0,
                    carbs: 0.0,
                    fiber: 0.0,
                },
                1,
            )
            .unwrap();

        let mut service = MorselService::new(store, UserSession::with_user("u1"));
        service.start().unwrap();
        assert_eq!(view_after_change(&mut service).await.entries.len(), 1);

        assert!(service.delete(&id));
        let view = view_after_change(&mut service).await;
        assert!(view.entries.is_empty());
        assert!(view.totals.calories.abs() < f64::EPSILON);
        service.stop();
    }

    #[tokio::test]
    async fn test_view_before_start_is_empty() {
        let store = Arc::new(CountingStore::default());
        let mut service = MorselService::new(store, UserSession::with_user("u1"));
        assert!(service.view().entries.is_empty());
        assert!(service.next_view().await.is_none());
    }
}
