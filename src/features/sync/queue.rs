//! Offline operation queue.
//!
//! Holds the in-memory mirror of the persisted queue. Every mutation is
//! written back to the store before the call returns, so a crash loses at
//! most the network call that was in flight, never a record.
//!
//! Records live in one of three lists, all stored as a single document:
//! `active` (pending or in flight, bounded by `max_queue_size`), `failed`
//! (waiting for a manual retry) and `recent` (completed, kept for display).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::events::{EventBus, SyncEvent};
use super::operation::{Operation, OperationStatus, OperationType, Outcome, Payload};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::storage::{Document, KeyValueStore, QUEUE_KEY};

/// What happened when an operation was enqueued.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReceipt {
    /// The queued operation.
    pub operation: Operation,
    /// Pending operations dropped to keep the queue within
    /// `max_queue_size`, oldest first.
    pub evicted: Vec<Operation>,
    /// Whether the queue reached durable storage. When `false` the
    /// operation lives only in memory until the next successful write and
    /// may not survive a restart.
    pub persisted: bool,
}

/// Queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Pending or in-flight operations
    pub pending: usize,
    /// Operations that need manual attention
    pub failed: usize,
    /// Completed operations still retained for display
    pub completed: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Ledger {
    active: Vec<Operation>,
    failed: Vec<Operation>,
    recent: Vec<Operation>,
}

#[derive(Default)]
struct QueueState {
    ledger: Ledger,
    version: u64,
}

/// Queue manager for offline operations.
pub struct OperationQueue {
    document: Document,
    config: SyncConfig,
    events: EventBus,
    state: Mutex<QueueState>,
}

impl OperationQueue {
    /// Load the queue from the store.
    ///
    /// Operations left `InFlight` by a previous process were interrupted
    /// mid-send; they return to `Pending` and are replayed under the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data cannot be read or decoded.
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        config: SyncConfig,
        events: EventBus,
    ) -> Result<Self, SyncError> {
        let document = Document::new(store, QUEUE_KEY);
        let mut ledger: Ledger = match document.read()? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                SyncError::Storage(format!("Corrupt '{QUEUE_KEY}' in storage: {e}"))
            })?,
            None => Ledger::default(),
        };

        let mut recovered = 0;
        for op in &mut ledger.active {
            if op.status == OperationStatus::InFlight {
                op.status = OperationStatus::Pending;
                recovered += 1;
            }
        }

        let queue = Self {
            document,
            config,
            events,
            state: Mutex::new(QueueState { ledger, version: 0 }),
        };

        if recovered > 0 {
            tracing::info!(recovered, "returned interrupted operations to pending");
            queue.flush()?;
        }

        Ok(queue)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize under the lock, write after releasing it.
    fn persist(&self, mut state: MutexGuard<'_, QueueState>) -> Result<(), SyncError> {
        state.version += 1;
        let version = state.version;
        let raw = serde_json::to_string(&state.ledger)
            .map_err(|e| SyncError::Storage(format!("Failed to serialize queue: {e}")))?;
        drop(state);

        self.document.write(version, &raw).map(|_| ())
    }

    /// Write the current state to the store.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the write fails.
    pub fn flush(&self) -> Result<(), SyncError> {
        self.persist(self.lock())
    }

    /// Add an operation to the queue.
    ///
    /// When the active queue is full the oldest pending operations are
    /// evicted and reported in the receipt. Failed operations live outside
    /// the bound and are never evicted.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidPayload` if the payload fails the route's
    /// validator, or `SyncError::Storage` if the queue is full of in-flight
    /// operations and nothing can be evicted.
    pub fn enqueue(
        &self,
        operation_type: OperationType,
        payload: Payload,
    ) -> Result<EnqueueReceipt, SyncError> {
        (operation_type.route().validate)(&payload).map_err(|reason| {
            SyncError::InvalidPayload(format!("{}: {reason}", operation_type.as_str()))
        })?;

        let operation = Operation::new(operation_type, payload);
        let mut state = self.lock();
        let active = &mut state.ledger.active;

        let mut evicted = Vec::new();
        while active.len() >= self.config.max_queue_size {
            let victim = active
                .iter()
                .position(|op| op.status == OperationStatus::Pending)
                .ok_or_else(|| {
                    SyncError::Storage(format!(
                        "queue full ({} operations in flight)",
                        active.len()
                    ))
                })?;

            let dropped = active.remove(victim);
            tracing::warn!(
                id = %dropped.id,
                operation = %dropped.operation_type,
                max_queue_size = self.config.max_queue_size,
                "offline queue full, dropping oldest pending operation"
            );
            self.events.emit(SyncEvent::QueueOverflow {
                evicted_id: dropped.id.clone(),
            });
            evicted.push(dropped);
        }

        active.push(operation.clone());

        let persisted = match self.persist(state) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(id = %operation.id, error = %e, "queued operation not persisted");
                false
            }
        };

        tracing::debug!(id = %operation.id, operation = %operation.operation_type, "enqueued");

        Ok(EnqueueReceipt {
            operation,
            evicted,
            persisted,
        })
    }

    /// Pending operations in creation order.
    #[must_use]
    pub fn peek_pending(&self) -> Vec<Operation> {
        self.lock()
            .ledger
            .active
            .iter()
            .filter(|op| op.status == OperationStatus::Pending)
            .cloned()
            .collect()
    }

    /// Move a pending operation to `InFlight` before sending it.
    ///
    /// Returns `None` if the operation left the queue (evicted or cleared)
    /// or is no longer pending. A failed write is logged; the record is
    /// recovered to `Pending` on the next load either way.
    pub fn begin_attempt(&self, id: &str) -> Option<Operation> {
        let mut state = self.lock();
        let op = state
            .ledger
            .active
            .iter_mut()
            .find(|op| op.id == id && op.status == OperationStatus::Pending)?;

        op.status = OperationStatus::InFlight;
        op.last_attempt = Some(Utc::now());
        let snapshot = op.clone();

        if let Err(e) = self.persist(state) {
            tracing::warn!(id, error = %e, "in-flight marker not persisted");
        }
        Some(snapshot)
    }

    /// Apply the outcome of a send attempt.
    ///
    /// - `Success` completes the operation and moves it to the recently
    ///   synced list.
    /// - `Retryable` counts the attempt; the operation stays pending until
    ///   `max_retries` attempts have failed since its last retry, then
    ///   moves to the failed list.
    /// - `Permanent` counts the attempt and moves the operation to the
    ///   failed list at once.
    ///
    /// Returns the new status, or `None` if the id is not active.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the change could not be persisted.
    /// The in-memory change still applies.
    pub fn mark_result(
        &self,
        id: &str,
        outcome: Outcome,
    ) -> Result<Option<OperationStatus>, SyncError> {
        let mut state = self.lock();
        let ledger = &mut state.ledger;
        let Some(index) = ledger.active.iter().position(|op| op.id == id) else {
            return Ok(None);
        };

        let now = Utc::now();
        let op = &mut ledger.active[index];
        op.last_attempt = Some(now);

        let status = match outcome {
            Outcome::Success => {
                op.status = OperationStatus::Completed;
                op.last_error = None;
                OperationStatus::Completed
            }
            Outcome::Retryable(error) => {
                op.attempts += 1;
                op.last_error = Some(error);
                if op.attempts_since_reset() >= self.config.max_retries {
                    tracing::warn!(
                        id = %op.id,
                        attempts = op.attempts,
                        "retries exhausted, operation needs manual attention"
                    );
                    OperationStatus::Failed
                } else {
                    OperationStatus::Pending
                }
            }
            Outcome::Permanent(error) => {
                op.attempts += 1;
                tracing::warn!(id = %op.id, error = %error, "operation rejected");
                op.last_error = Some(error);
                OperationStatus::Failed
            }
        };
        op.status = status;

        match status {
            OperationStatus::Completed => {
                let done = ledger.active.remove(index);
                ledger.recent.push(done);
                let excess = ledger
                    .recent
                    .len()
                    .saturating_sub(self.config.retain_completed);
                ledger.recent.drain(..excess);
            }
            OperationStatus::Failed => {
                let failed = ledger.active.remove(index);
                ledger.failed.push(failed);
            }
            OperationStatus::Pending | OperationStatus::InFlight => {}
        }

        self.persist(state)?;
        Ok(Some(status))
    }

    /// Count of operations that are not yet terminal.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().ledger.active.len()
    }

    /// Number of operations in the active queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().ledger.active.len()
    }

    /// Whether the active queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().ledger.active.is_empty()
    }

    /// Get a specific operation from any list.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Operation> {
        let state = self.lock();
        let ledger = &state.ledger;
        ledger
            .active
            .iter()
            .chain(&ledger.failed)
            .chain(&ledger.recent)
            .find(|op| op.id == id)
            .cloned()
    }

    /// Operations with a given status, or all of them: active, then
    /// failed, then recently completed, oldest first within each.
    #[must_use]
    pub fn list(&self, status: Option<OperationStatus>) -> Vec<Operation> {
        let state = self.lock();
        let ledger = &state.ledger;
        ledger
            .active
            .iter()
            .chain(&ledger.failed)
            .chain(&ledger.recent)
            .filter(|op| status.map_or(true, |s| op.status == s))
            .cloned()
            .collect()
    }

    /// Recently completed operations, oldest first.
    #[must_use]
    pub fn recently_synced(&self) -> Vec<Operation> {
        self.lock().ledger.recent.clone()
    }

    /// Get queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            pending: state.ledger.active.len(),
            failed: state.ledger.failed.len(),
            completed: state.ledger.recent.len(),
        }
    }

    /// Return failed operations to the active queue with a fresh retry
    /// budget. Their attempt counts are kept.
    ///
    /// With `id` only that operation is retried; otherwise all failed
    /// ones. Retried operations rejoin in creation order and may take the
    /// active queue past `max_queue_size` until the next enqueue.
    /// Returns the number retried.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if `id` names no failed operation, or
    /// `SyncError::Storage` if the change could not be persisted.
    pub fn retry_failed(&self, id: Option<&str>) -> Result<usize, SyncError> {
        let mut state = self.lock();
        let ledger = &mut state.ledger;

        let (retried, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut ledger.failed)
            .into_iter()
            .partition(|op| id.map_or(true, |id| op.id == id));
        ledger.failed = kept;

        if let (Some(id), true) = (id, retried.is_empty()) {
            return Err(SyncError::NotFound(format!("failed operation {id}")));
        }

        let count = retried.len();
        for mut op in retried {
            op.reset_for_retry();
            let at = ledger
                .active
                .partition_point(|queued| queued.created_at <= op.created_at);
            ledger.active.insert(at, op);
        }

        if count > 0 {
            tracing::info!(count, "failed operations returned to the queue");
            self.persist(state)?;
        }

        Ok(count)
    }

    /// Remove every operation, including failed and completed ones.
    /// Returns how many active and failed operations were discarded.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the store cannot be written.
    pub fn clear(&self) -> Result<usize, SyncError> {
        let mut state = self.lock();
        let removed = state.ledger.active.len() + state.ledger.failed.len();
        state.ledger = Ledger::default();
        state.version += 1;
        let version = state.version;
        drop(state);

        self.document.remove(version)?;

        tracing::info!(removed, "offline queue cleared");
        Ok(removed)
    }
}
