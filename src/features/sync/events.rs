//! Sync event stream for presentation layers.

use serde::Serialize;
use tokio::sync::broadcast;

/// Totals reported at the end of a drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    /// Operations the server accepted this cycle.
    pub processed: usize,
    /// Operations whose attempt failed this cycle.
    pub failed: usize,
    /// Operations still pending after the cycle.
    pub remaining: usize,
}

/// Events emitted by the queue and the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A drain cycle started.
    SyncStart {
        /// Operations in the cycle's snapshot.
        pending: usize,
    },
    /// A drain cycle finished.
    SyncComplete(SyncCounts),
    /// A drain cycle aborted, or its final state could not be persisted.
    SyncError {
        /// Error description.
        error: String,
    },
    /// The queue was full and an operation was dropped to make room.
    QueueOverflow {
        /// Id of the dropped operation.
        evicted_id: String,
    },
}

/// Broadcast channel shared by the queue and the engine.
///
/// Sending never blocks and never fails: with no subscribers the event is
/// dropped, and slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to current subscribers.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
