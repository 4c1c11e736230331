use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::models::{FoodEntry, NewEntry};
use crate::store::{EntryStore, SNAPSHOT_BUFFER, Subscription};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS food_entries (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    calories REAL NOT NULL DEFAULT 0,
                    protein REAL NOT NULL DEFAULT 0,
                    fat REAL NOT NULL DEFAULT 0,
                    carbs REAL NOT NULL DEFAULT 0,
                    fiber REAL NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_food_entries_owner
                    ON food_entries(user_id, created_at);

                CREATE TABLE IF NOT EXISTS auth_sessions (
                    token TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<FoodEntry> {
        Ok(FoodEntry {
            id: row.get(0)?,
            name: row.get(1)?,
            calories: row.get(2)?,
            protein: row.get(3)?,
            fat: row.get(4)?,
            carbs: row.get(5)?,
            fiber: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    // --- Entries ---

    pub fn insert_entry(
        &self,
        user_id: &str,
        entry: &NewEntry,
        created_at_ms: i64,
    ) -> Result<FoodEntry> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO food_entries (id, user_id, name, calories, protein, fat, carbs, fiber, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                user_id,
                entry.name,
                entry.calories,
                entry.protein,
                entry.fat,
                entry.carbs,
                entry.fiber,
                created_at_ms,
            ],
        )?;
        Ok(FoodEntry {
            id,
            name: entry.name.clone(),
            calories: entry.calories,
            protein: entry.protein,
            fat: entry.fat,
            carbs: entry.carbs,
            fiber: entry.fiber,
            created_at: created_at_ms,
        })
    }

    pub fn delete_entry(&self, user_id: &str, entry_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM food_entries WHERE id = ?1 AND user_id = ?2",
            params![entry_id, user_id],
        )?;
        Ok(rows > 0)
    }

    /// The user's collection, newest first. Ties on the client timestamp are
    /// broken by id so repeated snapshots of the same data are stable.
    pub fn list_entries(&self, user_id: &str) -> Result<Vec<FoodEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, calories, protein, fat, carbs, fiber, created_at
             FROM food_entries
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| Self::entry_from_row(row))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // --- Identities ---

    /// Exchange a pre-issued token for a stable user id, minting the mapping
    /// on first sight. Blank tokens are rejected.
    pub fn exchange_token(&self, token: &str) -> Result<String> {
        let token = token.trim();
        if token.is_empty() {
            bail!("Auth token must not be empty");
        }
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT user_id FROM auth_sessions WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(user_id) = existing {
            return Ok(user_id);
        }
        let user_id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO auth_sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(user_id)
    }
}

/// [`Database`] plus per-user snapshot fan-out, implementing the store
/// contract: every mutation republishes the owner's complete, newest-first
/// collection to all of that user's subscribers.
pub struct SqliteStore {
    db: Mutex<Database>,
    feeds: Mutex<HashMap<String, broadcast::Sender<Vec<FoodEntry>>>>,
}

impl SqliteStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock_db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One-shot listing of the user's collection, newest first.
    pub fn snapshot(&self, user_id: &str) -> Result<Vec<FoodEntry>> {
        self.lock_db().list_entries(user_id)
    }

    pub fn exchange_token(&self, token: &str) -> Result<String> {
        self.lock_db().exchange_token(token)
    }

    /// Mint a fresh anonymous identity (one per app load; nothing persisted
    /// until the user writes an entry).
    #[must_use]
    pub fn anonymous_user(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn publish(&self, user_id: &str) {
        let sender = {
            let feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
            feeds.get(user_id).cloned()
        };
        let Some(sender) = sender else { return };
        match self.snapshot(user_id) {
            Ok(snapshot) => {
                // No receivers is fine; the feed just goes unobserved.
                let _ = sender.send(snapshot);
            }
            Err(e) => tracing::error!("failed to rebuild snapshot for user {user_id}: {e:#}"),
        }
    }
}

impl EntryStore for SqliteStore {
    fn create(&self, user_id: &str, entry: &NewEntry, created_at_ms: i64) -> Result<String> {
        let entry = self.lock_db().insert_entry(user_id, entry, created_at_ms)?;
        self.publish(user_id);
        Ok(entry.id)
    }

    fn delete(&self, user_id: &str, entry_id: &str) -> Result<bool> {
        let deleted = self.lock_db().delete_entry(user_id, entry_id)?;
        if deleted {
            self.publish(user_id);
        }
        Ok(deleted)
    }

    fn subscribe(&self, user_id: &str) -> Result<Subscription> {
        let initial = self.snapshot(user_id)?;
        let mut feed = {
            let mut feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
            feeds
                .entry(user_id.to_string())
                .or_insert_with(|| broadcast::channel(SNAPSHOT_BUFFER).0)
                .subscribe()
        };
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let producer = tokio::spawn(async move {
            if tx.send(initial).await.is_err() {
                return;
            }
            loop {
                match feed.recv().await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Full snapshots supersede each other; skip ahead.
                        tracing::debug!("snapshot feed lagged by {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(rx, producer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sample_entry(name: &str, calories: f64) -> NewEntry {
        NewEntry {
            name: name.to_string(),
            calories,
            protein: 10.0,
            fat: 5.0,
            carbs: 20.0,
            fiber: 3.0,
        }
    }

    #[test]
    fn test_insert_and_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        db.insert_entry("u1", &sample_entry("older", 100.0), 1_000)
            .unwrap();
        db.insert_entry("u1", &sample_entry("newer", 200.0), 2_000)
            .unwrap();

        let entries = db.list_entries("u1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "newer");
        assert_eq!(entries[1].name, "older");
    }

    #[test]
    fn test_list_is_scoped_by_owner() {
        let db = Database::open_in_memory().unwrap();
        db.insert_entry("u1", &sample_entry("mine", 100.0), 1)
            .unwrap();
        db.insert_entry("u2", &sample_entry("theirs", 100.0), 2)
            .unwrap();

        let entries = db.list_entries("u1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "mine");
    }

    #[test]
    fn test_delete_requires_matching_owner() {
        let db = Database::open_in_memory().unwrap();
        let entry = db
            .insert_entry("u1", &sample_entry("mine", 100.0), 1)
            .unwrap();

        assert!(!db.delete_entry("u2", &entry.id).unwrap());
        assert!(db.delete_entry("u1", &entry.id).unwrap());
        assert!(!db.delete_entry("u1", &entry.id).unwrap());
        assert!(db.list_entries("u1").unwrap().is_empty());
    }

    #[test]
    fn test_exchange_token_is_stable() {
        let db = Database::open_in_memory().unwrap();
        let first = db.exchange_token("tok-1").unwrap();
        let second = db.exchange_token("tok-1").unwrap();
        assert_eq!(first, second);

        let other = db.exchange_token("tok-2").unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_exchange_blank_token_fails() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.exchange_token("").is_err());
        assert!(db.exchange_token("   ").is_err());
    }

    #[test]
    fn test_anonymous_users_are_distinct() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_ne!(store.anonymous_user(), store.anonymous_user());
    }

    async fn next_snapshot(sub: &mut Subscription) -> Vec<FoodEntry> {
        timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("timed out waiting for snapshot")
            .expect("feed ended unexpectedly")
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_snapshot() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create("u1", &sample_entry("existing", 120.0), 1).unwrap();

        let mut sub = store.subscribe("u1").unwrap();
        let snapshot = next_snapshot(&mut sub).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "existing");
    }

    #[tokio::test]
    async fn test_create_republishes_full_snapshot() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut sub = store.subscribe("u1").unwrap();
        assert!(next_snapshot(&mut sub).await.is_empty());

        store.create("u1", &sample_entry("first", 100.0), 1_000).unwrap();
        let snapshot = next_snapshot(&mut sub).await;
        assert_eq!(snapshot.len(), 1);

        store.create("u1", &sample_entry("second", 200.0), 2_000).unwrap();
        let snapshot = next_snapshot(&mut sub).await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "second");
    }

    #[tokio::test]
    async fn test_delete_republishes_without_entry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.create("u1", &sample_entry("gone", 50.0), 1).unwrap();

        let mut sub = store.subscribe("u1").unwrap();
        assert_eq!(next_snapshot(&mut sub).await.len(), 1);

        assert!(store.delete("u1", &id).unwrap());
        assert!(next_snapshot(&mut sub).await.is_empty());
    }

    #[tokio::test]
    async fn test_mutations_by_other_users_do_not_notify() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut sub = store.subscribe("u1").unwrap();
        assert!(next_snapshot(&mut sub).await.is_empty());

        store.create("u2", &sample_entry("theirs", 80.0), 1).unwrap();
        let quiet = timeout(Duration::from_millis(100), sub.next()).await;
        assert!(quiet.is_err(), "unexpected snapshot for another user");
    }
}
