//! Sync engine for draining the offline queue.
//!
//! One drain cycle takes a snapshot of the pending operations and sends them
//! in creation order. A failed send never stops the cycle; each operation's
//! attempt counter decides when it gives up. Operations enqueued while a
//! cycle runs wait for the next one.
//!
//! Store writes made during a cycle run on the blocking pool so a slow disk
//! never stalls the runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::connectivity::NetworkStatus;
use super::events::{EventBus, SyncCounts, SyncEvent};
use super::operation::{Operation, OperationType, Outcome};
use super::queue::OperationQueue;
use super::remote::{RemoteApi, TokenProvider};
use crate::error::SyncError;
use crate::features::cache::CreditCache;
use crate::storage::{offload, KeyValueStore, LAST_SYNC_KEY};

/// Why a sync request did not start a drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The device is offline.
    Offline,
    /// Another cycle is running; this request was folded into it.
    AlreadyDraining,
}

/// Result of a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Operations the server accepted this cycle.
    pub processed: usize,
    /// Operations whose attempt failed this cycle.
    pub failed: usize,
    /// Operations still pending afterwards.
    pub remaining: usize,
    /// Set when no cycle ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl SyncSummary {
    const fn skipped(reason: SkipReason, remaining: usize) -> Self {
        Self {
            processed: 0,
            failed: 0,
            remaining,
            skipped: Some(reason),
        }
    }

    /// The counts reported on the event bus.
    #[must_use]
    pub const fn counts(&self) -> SyncCounts {
        SyncCounts {
            processed: self.processed,
            failed: self.failed,
            remaining: self.remaining,
        }
    }
}

impl From<SyncCounts> for SyncSummary {
    fn from(counts: SyncCounts) -> Self {
        Self {
            processed: counts.processed,
            failed: counts.failed,
            remaining: counts.remaining,
            skipped: None,
        }
    }
}

/// Clears the draining flag when a cycle ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Engine for draining queued operations into the remote API.
pub struct SyncEngine {
    queue: Arc<OperationQueue>,
    cache: Arc<CreditCache>,
    remote: Arc<dyn RemoteApi>,
    tokens: Arc<dyn TokenProvider>,
    network: NetworkStatus,
    events: EventBus,
    store: Arc<dyn KeyValueStore>,
    draining: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

impl SyncEngine {
    /// Create an engine. The last sync time is read back from `store`.
    #[must_use]
    pub fn new(
        queue: Arc<OperationQueue>,
        cache: Arc<CreditCache>,
        remote: Arc<dyn RemoteApi>,
        tokens: Arc<dyn TokenProvider>,
        network: NetworkStatus,
        events: EventBus,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let last_sync = match store.get(LAST_SYNC_KEY) {
            Ok(raw) => raw
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
            Err(e) => {
                tracing::warn!(error = %e, "last sync time unavailable");
                None
            }
        };

        Self {
            queue,
            cache,
            remote,
            tokens,
            network,
            events,
            store,
            draining: AtomicBool::new(false),
            last_sync: Mutex::new(last_sync),
        }
    }

    /// When the last drain cycle finished.
    #[must_use]
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a drain cycle is running.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Run one drain cycle.
    ///
    /// Does nothing while offline or while another cycle runs; the returned
    /// summary says which.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Token` if no bearer token could be obtained. The
    /// cycle is abandoned and no operation is touched. Per-operation
    /// failures are never returned here; they are recorded on the
    /// operations.
    pub async fn sync(&self) -> Result<SyncSummary, SyncError> {
        if !self.network.is_online() {
            tracing::debug!("offline, sync skipped");
            return Ok(SyncSummary::skipped(
                SkipReason::Offline,
                self.queue.pending_count(),
            ));
        }

        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("drain already running, request coalesced");
            return Ok(SyncSummary::skipped(
                SkipReason::AlreadyDraining,
                self.queue.pending_count(),
            ));
        }
        let _guard = DrainGuard(&self.draining);

        self.drain().await
    }

    async fn drain(&self) -> Result<SyncSummary, SyncError> {
        let snapshot = self.queue.peek_pending();
        let mut counts = SyncCounts::default();

        self.events.emit(SyncEvent::SyncStart {
            pending: snapshot.len(),
        });

        if !snapshot.is_empty() {
            tracing::info!(pending = snapshot.len(), "sync started");

            let token = match self.tokens.token().await {
                Ok(token) => token,
                Err(e) => {
                    tracing::error!(error = %e, "sync aborted, no token");
                    self.events.emit(SyncEvent::SyncError {
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            };

            for queued in snapshot {
                let Some(op) = self.begin_attempt(queued.id).await else {
                    continue;
                };

                let outcome = self.attempt(&token, &op).await;
                let succeeded = outcome == Outcome::Success;
                if succeeded {
                    counts.processed += 1;
                } else {
                    counts.failed += 1;
                }

                let queue = Arc::clone(&self.queue);
                let id = op.id.clone();
                match offload(move || queue.mark_result(&id, outcome)).await {
                    Ok(Ok(status)) => tracing::debug!(id = %op.id, ?status, "operation attempted"),
                    Ok(Err(e)) | Err(e) => {
                        tracing::warn!(id = %op.id, error = %e, "result not persisted");
                    }
                }

                if succeeded && op.operation_type == OperationType::CreditIssue {
                    self.refresh_customer(&token, &op).await;
                }
            }
        }

        let queue = Arc::clone(&self.queue);
        if let Err(e) = offload(move || queue.flush()).await.and_then(|flushed| flushed) {
            tracing::error!(error = %e, "queue state not persisted after sync");
            self.events.emit(SyncEvent::SyncError {
                error: e.to_string(),
            });
        }
        self.record_last_sync(Utc::now()).await;

        counts.remaining = self.queue.pending_count();
        tracing::info!(
            processed = counts.processed,
            failed = counts.failed,
            remaining = counts.remaining,
            "sync finished"
        );
        self.events.emit(SyncEvent::SyncComplete(counts));

        Ok(counts.into())
    }

    /// Mark an operation in flight. `None` if it left the queue or the
    /// marker could not be applied.
    async fn begin_attempt(&self, id: String) -> Option<Operation> {
        let queue = Arc::clone(&self.queue);
        let key = id.clone();
        match offload(move || queue.begin_attempt(&key)).await {
            Ok(Some(op)) => Some(op),
            Ok(None) => {
                tracing::debug!(id = %id, "operation left the queue before send");
                None
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "operation skipped this cycle");
                None
            }
        }
    }

    /// Send one operation and classify the result.
    async fn attempt(&self, token: &str, op: &Operation) -> Outcome {
        let route = op.operation_type.route();
        if let Err(reason) = (route.validate)(&op.payload) {
            return Outcome::Permanent(format!("invalid payload: {reason}"));
        }

        match self
            .remote
            .send(token, route.endpoint, &op.id, &op.payload)
            .await
        {
            Ok(()) => Outcome::Success,
            Err(e) if e.is_retryable() => Outcome::Retryable(e.to_string()),
            Err(e) => Outcome::Permanent(e.message()),
        }
    }

    async fn refresh_customer(&self, token: &str, op: &Operation) {
        let Some(customer_id) = op.customer_id() else {
            return;
        };
        if let Err(e) = self.cache.refresh_with_token(token, customer_id).await {
            tracing::debug!(customer_id, error = %e, "credit cache refresh after issue failed");
        }
    }

    async fn record_last_sync(&self, at: DateTime<Utc>) {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);

        let store = Arc::clone(&self.store);
        let written = offload(move || store.set(LAST_SYNC_KEY, &at.to_rfc3339())).await;
        if let Err(e) = written.and_then(|set| set) {
            tracing::warn!(error = %e, "last sync time not persisted");
        }
    }
}
