//! Namespaced key/value persistence.
//!
//! The queue and the credit cache never touch `SQLite` directly; they read
//! and write whole JSON documents through [`KeyValueStore`]. Every store is
//! bound to one namespace (the shop identifier) so two installations sharing
//! a device file cannot see each other's data.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::migrations;
use crate::error::SyncError;

/// How long a write waits for another process holding the file lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Key/value surface used by the durable parts of the sync core.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, SyncError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` on backend or quota failure.
    fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;

    /// Remove a value. Returns whether a value existed.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<bool, SyncError>;
}

fn check_quota(quota: Option<usize>, key: &str, value: &str) -> Result<(), SyncError> {
    match quota {
        Some(limit) if value.len() > limit => Err(SyncError::Storage(format!(
            "quota exceeded writing '{key}': {} bytes > {limit}",
            value.len()
        ))),
        _ => Ok(()),
    }
}

/// `SQLite`-backed store.
///
/// Owns one connection. The schema is brought up to date when the file is
/// opened.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    namespace: String,
    quota_bytes: Option<usize>,
}

impl SqliteStore {
    /// Open (or create) the store at `path` for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` if the file cannot be opened or its
    /// schema cannot be upgraded.
    pub fn open(path: &Path, namespace: &str) -> Result<Self, SyncError> {
        let conn = Connection::open(path).map_err(|e| {
            SyncError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;
        Self::from_connection(conn, namespace)
    }

    /// Open an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` if the database cannot be created.
    pub fn open_in_memory(namespace: &str) -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SyncError::Database(format!("Failed to open in-memory database: {e}")))?;
        Self::from_connection(conn, namespace)
    }

    fn from_connection(mut conn: Connection, namespace: &str) -> Result<Self, SyncError> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| SyncError::Database(format!("Failed to configure database: {e}")))?;
        migrations::upgrade(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
            quota_bytes: None,
        })
    }

    /// Limit the size of any single stored value.
    #[must_use]
    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    /// Namespace this store is scoped to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Schema version of the underlying file.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` if the version cannot be read.
    pub fn schema_version(&self) -> Result<usize, SyncError> {
        migrations::schema_version(&*self.lock()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Storage("database lock poisoned".to_string()))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        self.lock()?
            .query_row(
                "SELECT value FROM kv_store WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SyncError::Storage(format!("Failed to read '{key}': {e}")))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        check_quota(self.quota_bytes, key, value)?;

        self.lock()?
            .execute(
                r"INSERT INTO kv_store (namespace, key, value, updated_at)
                  VALUES (?1, ?2, ?3, ?4)
                  ON CONFLICT(namespace, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![self.namespace, key, value, Utc::now().to_rfc3339()],
            )
            .map_err(|e| SyncError::Storage(format!("Failed to write '{key}': {e}")))?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, SyncError> {
        let rows = self
            .lock()?
            .execute(
                "DELETE FROM kv_store WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
            )
            .map_err(|e| SyncError::Storage(format!("Failed to remove '{key}': {e}")))?;

        Ok(rows > 0)
    }
}

/// In-process store.
///
/// Clones made with [`MemoryStore::namespaced`] share one backing map, which
/// lets tests simulate a process restart by building a second engine on the
/// same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    namespace: String,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    /// Create an empty store for `namespace`.
    #[must_use]
    pub fn new(namespace: &str) -> Self {
        Self {
            entries: Arc::default(),
            namespace: namespace.to_string(),
            quota_bytes: None,
        }
    }

    /// A view of the same backing map under another namespace.
    #[must_use]
    pub fn namespaced(&self, namespace: &str) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            namespace: namespace.to_string(),
            quota_bytes: self.quota_bytes,
        }
    }

    /// Limit the size of any single stored value.
    #[must_use]
    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, SyncError> {
        self.entries
            .lock()
            .map_err(|_| SyncError::Storage("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.lock()?.get(&self.scoped(key)).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        check_quota(self.quota_bytes, key, value)?;
        self.lock()?.insert(self.scoped(key), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, SyncError> {
        Ok(self.lock()?.remove(&self.scoped(key)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_set_get_remove() {
        let store = SqliteStore::open_in_memory("shop-a").unwrap();

        assert_eq!(store.get("offline_queue").unwrap(), None);

        store.set("offline_queue", "[1]").unwrap();
        store.set("offline_queue", "[1,2]").unwrap();
        assert_eq!(store.get("offline_queue").unwrap().as_deref(), Some("[1,2]"));

        assert!(store.remove("offline_queue").unwrap());
        assert!(!store.remove("offline_queue").unwrap());
        assert_eq!(store.get("offline_queue").unwrap(), None);
    }

    #[test]
    fn test_sqlite_opens_at_latest_schema() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested.db");

        let store = SqliteStore::open(&path, "shop").unwrap();
        assert_eq!(store.schema_version().unwrap(), migrations::LATEST);
        assert!(path.exists());
        drop(store);

        // Reopening applies nothing new
        let reopened = SqliteStore::open(&path, "shop").unwrap();
        assert_eq!(reopened.schema_version().unwrap(), migrations::LATEST);
    }

    #[test]
    fn test_sqlite_namespaces_are_isolated() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("store.db");

        let shop_a = SqliteStore::open(&path, "shop-a").unwrap();
        let shop_b = SqliteStore::open(&path, "shop-b").unwrap();

        shop_a.set("last_sync_time", "a").unwrap();
        assert_eq!(shop_b.get("last_sync_time").unwrap(), None);

        shop_b.set("last_sync_time", "b").unwrap();
        assert_eq!(shop_a.get("last_sync_time").unwrap().as_deref(), Some("a"));
        assert_eq!(shop_b.namespace(), "shop-b");
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("store.db");

        SqliteStore::open(&path, "shop")
            .unwrap()
            .set("k", "v")
            .unwrap();

        let reopened = SqliteStore::open(&path, "shop").unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_quota_rejects_large_values() {
        let store = SqliteStore::open_in_memory("shop")
            .unwrap()
            .with_quota(Some(4));

        store.set("k", "1234").unwrap();
        let err = store.set("k", "12345").unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("1234"));
    }

    #[test]
    fn test_memory_store_namespaces_share_backing() {
        let shop_a = MemoryStore::new("shop-a");
        let shop_b = shop_a.namespaced("shop-b");
        let shop_a_again = shop_b.namespaced("shop-a");

        shop_a.set("k", "v").unwrap();
        assert_eq!(shop_b.get("k").unwrap(), None);
        assert_eq!(shop_a_again.get("k").unwrap().as_deref(), Some("v"));
    }
}
