//! A JSON document stored under one key and written in version order.
//!
//! Owners serialize their state under their own lock, stamp it with a
//! version, and write it after the lock is released, possibly from a
//! blocking-pool thread. Writes can therefore arrive out of order; a
//! version older than the one already stored is dropped.

use std::sync::{Arc, Mutex, PoisonError};

use super::KeyValueStore;
use crate::error::SyncError;

pub struct Document {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
    stored: Mutex<u64>,
}

impl Document {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: &'static str) -> Self {
        Self {
            store,
            key,
            stored: Mutex::new(0),
        }
    }

    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.key
    }

    /// Read the stored document.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend cannot be read.
    pub fn read(&self) -> Result<Option<String>, SyncError> {
        self.store.get(self.key)
    }

    /// Store `contents` as `version`. Returns `false` if a newer version
    /// was already stored and this one was dropped.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend rejects the write. The
    /// last stored version is unchanged.
    pub fn write(&self, version: u64, contents: &str) -> Result<bool, SyncError> {
        let mut stored = self.stored.lock().unwrap_or_else(PoisonError::into_inner);
        if version <= *stored {
            return Ok(false);
        }
        self.store.set(self.key, contents)?;
        *stored = version;
        Ok(true)
    }

    /// Delete the document as `version`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend cannot be written.
    pub fn remove(&self, version: u64) -> Result<(), SyncError> {
        let mut stored = self.stored.lock().unwrap_or_else(PoisonError::into_inner);
        if version <= *stored {
            return Ok(());
        }
        self.store.remove(self.key)?;
        *stored = version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_older_version_is_dropped() {
        let store = MemoryStore::new("shop");
        let doc = Document::new(Arc::new(store.clone()), "doc");

        assert!(doc.write(2, "second").unwrap());
        assert!(!doc.write(1, "first").unwrap());
        assert_eq!(store.get("doc").unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_failed_write_keeps_last_version() {
        let store = MemoryStore::new("shop").with_quota(Some(8));
        let doc = Document::new(Arc::new(store.clone()), "doc");

        assert!(doc.write(1, "small").unwrap());
        assert!(doc.write(2, "far too large").is_err());
        // Version 2 never landed, so a retry of it is still accepted
        assert!(doc.write(2, "fits").unwrap());
        assert_eq!(doc.read().unwrap().as_deref(), Some("fits"));
    }

    #[test]
    fn test_remove_outranks_older_writes() {
        let store = MemoryStore::new("shop");
        let doc = Document::new(Arc::new(store), "doc");

        doc.write(1, "a").unwrap();
        doc.remove(3).unwrap();
        assert!(!doc.write(2, "b").unwrap());
        assert_eq!(doc.read().unwrap(), None);
        assert_eq!(doc.key(), "doc");
    }
}
