//! Offline operation queue and sync engine.
//!
//! Operations recorded while the device is offline are persisted in an
//! [`OperationQueue`] and replayed in creation order by the [`SyncEngine`]
//! once connectivity returns. Each operation carries a stable id sent as an
//! idempotency key, so the server can drop replays of a request whose
//! response was lost.

pub mod connectivity;
pub mod engine;
pub mod events;
pub mod operation;
pub mod queue;
pub mod remote;
pub mod routes;

#[cfg(test)]
pub(crate) mod fakes;

pub use connectivity::{ConnectivityMonitor, MonitorHandle, NetworkStatus};
pub use engine::{SkipReason, SyncEngine, SyncSummary};
pub use events::{EventBus, SyncCounts, SyncEvent};
pub use operation::{Operation, OperationStatus, OperationType, Outcome, Payload};
pub use queue::{EnqueueReceipt, OperationQueue, QueueStats};
pub use remote::{
    EnvToken, HttpRemoteApi, Reachability, RemoteApi, StaticToken, TokenProvider,
    IDEMPOTENCY_HEADER,
};
pub use routes::Route;
