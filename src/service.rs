//! The offline sync service.
//!
//! [`OfflineSync`] wires the queue, the engine and the credit cache to one
//! store, one remote API and one token provider. Hosts build it once and
//! keep it for the life of the process.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::config::{CacheConfig, SyncConfig};
use crate::error::SyncError;
use crate::features::cache::{CreditCache, CreditLookup};
use crate::features::sync::{
    ConnectivityMonitor, EnqueueReceipt, EventBus, MonitorHandle, NetworkStatus, Operation,
    OperationQueue, OperationStatus, OperationType, Payload, QueueStats, Reachability, RemoteApi,
    SyncEngine, SyncEvent, SyncSummary, TokenProvider,
};
use crate::storage::KeyValueStore;

/// Builder for [`OfflineSync`].
pub struct OfflineSyncBuilder {
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteApi>,
    tokens: Arc<dyn TokenProvider>,
    sync: SyncConfig,
    cache: CacheConfig,
    network: Option<NetworkStatus>,
    reachability: Option<Arc<dyn Reachability>>,
    auto_drain: bool,
}

impl OfflineSyncBuilder {
    #[must_use]
    pub fn sync_config(mut self, config: SyncConfig) -> Self {
        self.sync = config;
        self
    }

    #[must_use]
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Share an existing network flag instead of starting online.
    #[must_use]
    pub fn network(mut self, network: NetworkStatus) -> Self {
        self.network = Some(network);
        self
    }

    /// Let the monitor update the network flag itself by asking
    /// `reachability` on every tick.
    #[must_use]
    pub fn reachability(mut self, reachability: Arc<dyn Reachability>) -> Self {
        self.reachability = Some(reachability);
        self
    }

    /// Whether `enqueue` starts a background drain while online.
    /// Defaults to `true`.
    #[must_use]
    pub fn auto_drain(mut self, enabled: bool) -> Self {
        self.auto_drain = enabled;
        self
    }

    /// Load persisted state and assemble the service.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the persisted queue cannot be read.
    pub fn build(self) -> Result<OfflineSync, SyncError> {
        let network = self.network.unwrap_or_default();
        let events = EventBus::default();

        let queue = Arc::new(OperationQueue::load(
            Arc::clone(&self.store),
            self.sync.clone(),
            events.clone(),
        )?);
        let cache = Arc::new(CreditCache::load(
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
            Arc::clone(&self.tokens),
            network.clone(),
            &self.cache,
        ));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            self.remote,
            self.tokens,
            network.clone(),
            events.clone(),
            self.store,
        ));

        Ok(OfflineSync {
            queue,
            cache,
            engine,
            network,
            events,
            sync: self.sync,
            reachability: self.reachability,
            auto_drain: self.auto_drain,
        })
    }
}

/// Offline-first queue, sync engine and credit cache behind one handle.
pub struct OfflineSync {
    queue: Arc<OperationQueue>,
    cache: Arc<CreditCache>,
    engine: Arc<SyncEngine>,
    network: NetworkStatus,
    events: EventBus,
    sync: SyncConfig,
    reachability: Option<Arc<dyn Reachability>>,
    auto_drain: bool,
}

impl OfflineSync {
    /// Start building a service over the given store and remote API.
    #[must_use]
    pub fn builder(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteApi>,
        tokens: Arc<dyn TokenProvider>,
    ) -> OfflineSyncBuilder {
        OfflineSyncBuilder {
            store,
            remote,
            tokens,
            sync: SyncConfig::default(),
            cache: CacheConfig::default(),
            network: None,
            reachability: None,
            auto_drain: true,
        }
    }

    /// Queue an operation.
    ///
    /// While online, a drain is started in the background on the current
    /// tokio runtime. Outside a runtime the operation simply waits for the
    /// next [`OfflineSync::sync`].
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidPayload` if the payload fails validation,
    /// or `SyncError::Storage` if the queue is full of in-flight work.
    pub fn enqueue(
        &self,
        operation_type: OperationType,
        payload: Payload,
    ) -> Result<EnqueueReceipt, SyncError> {
        let receipt = self.queue.enqueue(operation_type, payload)?;

        if self.auto_drain && self.network.is_online() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let engine = Arc::clone(&self.engine);
                handle.spawn(async move {
                    if let Err(e) = engine.sync().await {
                        tracing::warn!(error = %e, "drain after enqueue failed");
                    }
                });
            }
        }

        Ok(receipt)
    }

    /// Number of operations still waiting to be sent.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Run a drain cycle now.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Token` if no bearer token could be obtained.
    pub async fn sync(&self) -> Result<SyncSummary, SyncError> {
        self.engine.sync().await
    }

    #[must_use]
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.engine.last_sync_time()
    }

    /// A customer's credits, from the server when possible.
    ///
    /// # Errors
    ///
    /// Returns an error only when online, the fetch failed, and nothing is
    /// cached for the customer.
    pub async fn customer_credits(
        &self,
        customer_id: &str,
        force_refresh: bool,
    ) -> Result<CreditLookup, SyncError> {
        self.cache.get(customer_id, force_refresh).await
    }

    /// Drop every cached credit entry.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the persisted cache cannot be removed.
    pub fn clear_cache(&self) -> Result<(), SyncError> {
        self.cache.clear()
    }

    /// Drop every queued, failed and recently synced operation. Returns
    /// how many queued and failed operations were discarded.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the persisted queue cannot be removed.
    pub fn clear_queue(&self) -> Result<usize, SyncError> {
        self.queue.clear()
    }

    /// Return failed operations to the queue with a fresh retry budget.
    /// Attempt counts are kept.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if `id` names no failed operation.
    pub fn retry_failed(&self, id: Option<&str>) -> Result<usize, SyncError> {
        self.queue.retry_failed(id)
    }

    #[must_use]
    pub fn list(&self, status: Option<OperationStatus>) -> Vec<Operation> {
        self.queue.list(status)
    }

    #[must_use]
    pub fn recently_synced(&self) -> Vec<Operation> {
        self.queue.recently_synced()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Receive sync lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The network flag this service reads.
    #[must_use]
    pub const fn network(&self) -> &NetworkStatus {
        &self.network
    }

    /// Start the background monitor using the configured interval.
    ///
    /// With a reachability check configured, each tick also refreshes the
    /// network flag.
    #[must_use]
    pub fn start_monitor(&self) -> MonitorHandle {
        let engine = Arc::clone(&self.engine);
        let every = self.sync.interval();
        match &self.reachability {
            Some(check) => ConnectivityMonitor::spawn_with_check(
                engine,
                &self.network,
                every,
                Arc::clone(check),
            ),
            None => ConnectivityMonitor::spawn(engine, &self.network, every),
        }
    }
}
