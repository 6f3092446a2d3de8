//! Storage layer for credit-sync.
//!
//! This module provides the durable store behind the offline queue and the
//! credit cache: a namespaced key/value surface backed by `SQLite`, plus an
//! in-memory implementation for tests and ephemeral hosts.

mod document;
mod kv;
mod migrations;

pub use document::Document;
pub use kv::{KeyValueStore, MemoryStore, SqliteStore};

use crate::error::SyncError;

/// Key holding the operation queue: active, failed and recently synced
/// records in one document.
pub const QUEUE_KEY: &str = "offline_queue";
/// Key holding the RFC 3339 time of the last finished drain.
pub const LAST_SYNC_KEY: &str = "last_sync_time";
/// Key holding cached customer credit balances.
pub const CREDIT_CACHE_KEY: &str = "credit_cache";

/// Run a store call on tokio's blocking pool.
///
/// # Errors
///
/// Returns `SyncError::Storage` if the blocking task panicked or was
/// cancelled.
pub async fn offload<T, F>(work: F) -> Result<T, SyncError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SyncError::Storage(format!("storage task failed: {e}")))
}
