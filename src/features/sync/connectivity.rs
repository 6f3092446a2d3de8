//! Network status and the background sync trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::SyncEngine;
use super::remote::Reachability;

/// Shared online/offline flag.
///
/// Clones observe the same flag. The host platform reports changes through
/// [`NetworkStatus::set_online`].
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the current status. Returns `true` if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "network status changed");
        }
        changed
    }

    /// Receiver notified on every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Triggers drain cycles when the device comes back online and on a
/// fixed interval.
pub struct ConnectivityMonitor;

impl ConnectivityMonitor {
    /// Start the monitor on the current tokio runtime.
    ///
    /// Each trigger spawns its own cycle; a trigger that lands while a
    /// cycle runs is folded into it by the engine, and one that lands
    /// while offline is a no-op there.
    #[must_use]
    pub fn spawn(
        engine: Arc<SyncEngine>,
        network: &NetworkStatus,
        every: Duration,
    ) -> MonitorHandle {
        Self::start(engine, network, every, None)
    }

    /// Like [`ConnectivityMonitor::spawn`], but each tick first asks
    /// `reachability` and records the answer in `network`.
    ///
    /// For hosts with no platform callback reporting network changes.
    #[must_use]
    pub fn spawn_with_check(
        engine: Arc<SyncEngine>,
        network: &NetworkStatus,
        every: Duration,
        reachability: Arc<dyn Reachability>,
    ) -> MonitorHandle {
        Self::start(engine, network, every, Some(reachability))
    }

    fn start(
        engine: Arc<SyncEngine>,
        network: &NetworkStatus,
        every: Duration,
        reachability: Option<Arc<dyn Reachability>>,
    ) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let network = network.clone();
        let mut rx = network.subscribe();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            let mut was_online = *rx.borrow_and_update();
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *rx.borrow_and_update();
                        if online && !was_online {
                            tracing::debug!("back online, triggering sync");
                            trigger(&engine);
                        }
                        was_online = online;
                    }
                    _ = ticker.tick() => {
                        if let Some(check) = &reachability {
                            network.set_online(check.is_reachable().await);
                            // This tick's trigger covers a change it just made
                            was_online = *rx.borrow_and_update();
                        }
                        trigger(&engine);
                    }
                }
            }
            tracing::debug!("connectivity monitor stopped");
        });

        MonitorHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

fn trigger(engine: &Arc<SyncEngine>) {
    let engine = Arc::clone(engine);
    tokio::spawn(async move {
        if let Err(e) = engine.sync().await {
            tracing::warn!(error = %e, "background sync failed");
        }
    });
}

/// Stops the monitor when shut down or dropped.
pub struct MonitorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop the monitor and wait for its task to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, SyncConfig};
    use crate::features::cache::CreditCache;
    use crate::features::sync::events::{EventBus, SyncEvent};
    use crate::features::sync::fakes::{payload, FakeRemote};
    use crate::features::sync::operation::OperationType;
    use crate::features::sync::queue::OperationQueue;
    use crate::features::sync::remote::{MockReachability, StaticToken};
    use crate::storage::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_set_online_reports_changes_only() {
        let network = NetworkStatus::new(false);
        assert!(!network.is_online());
        assert!(network.set_online(true));
        assert!(!network.set_online(true));
        assert!(network.is_online());
    }

    #[test]
    fn test_clones_share_state() {
        let network = NetworkStatus::default();
        let other = network.clone();
        other.set_online(false);
        assert!(!network.is_online());
    }

    struct Fixture {
        engine: Arc<SyncEngine>,
        queue: Arc<OperationQueue>,
        remote: Arc<FakeRemote>,
        network: NetworkStatus,
        events: EventBus,
    }

    fn fixture(online: bool) -> Fixture {
        let store = MemoryStore::new("shop");
        let remote = Arc::new(FakeRemote::new());
        let tokens = Arc::new(StaticToken("tok".to_string()));
        let network = NetworkStatus::new(online);
        let events = EventBus::default();
        let queue = Arc::new(
            OperationQueue::load(Arc::new(store.clone()), SyncConfig::default(), events.clone())
                .unwrap(),
        );
        let cache = Arc::new(CreditCache::load(
            Arc::new(store.clone()),
            remote.clone(),
            tokens.clone(),
            network.clone(),
            &CacheConfig::default(),
        ));
        let engine = Arc::new(SyncEngine::new(
            queue.clone(),
            cache,
            remote.clone(),
            tokens,
            network.clone(),
            events.clone(),
            Arc::new(store),
        ));
        Fixture {
            engine,
            queue,
            remote,
            network,
            events,
        }
    }

    fn enqueue(f: &Fixture, customer: &str) {
        f.queue
            .enqueue(
                OperationType::CreditIssue,
                payload(json!({"customerId": customer, "amount": 10})),
            )
            .unwrap();
    }

    fn start(f: &Fixture) -> MonitorHandle {
        ConnectivityMonitor::spawn(f.engine.clone(), &f.network, Duration::from_secs(60))
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Wait for the next finished drain cycle.
    async fn completed(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) {
        loop {
            if let SyncEvent::SyncComplete(_) = rx.recv().await.unwrap() {
                return;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_triggers_sync() {
        let f = fixture(false);
        enqueue(&f, "c1");
        let mut rx = f.events.subscribe();
        let handle = start(&f);
        settle().await;
        assert!(f.remote.sent().is_empty());

        f.network.set_online(true);
        completed(&mut rx).await;

        assert_eq!(f.remote.sent().len(), 1);
        assert!(f.queue.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_triggers_sync_while_online() {
        let f = fixture(true);
        let mut rx = f.events.subscribe();
        let handle = start(&f);
        settle().await;

        enqueue(&f, "c1");
        settle().await;
        assert!(f.remote.sent().is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        completed(&mut rx).await;

        assert_eq!(f.remote.sent().len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_sends_nothing_while_offline() {
        let f = fixture(false);
        enqueue(&f, "c1");
        let handle = start(&f);

        tokio::time::advance(Duration::from_secs(300)).await;
        settle().await;

        assert!(f.remote.sent().is_empty());
        assert_eq!(f.queue.pending_count(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_going_offline_does_not_trigger() {
        let f = fixture(true);
        enqueue(&f, "c1");
        let handle = start(&f);
        settle().await;

        f.network.set_online(false);
        settle().await;

        assert!(f.remote.sent().is_empty());
        handle.shutdown().await;
    }

    fn reachable_when(flag: &Arc<std::sync::atomic::AtomicBool>) -> Arc<MockReachability> {
        let flag = Arc::clone(flag);
        let mut check = MockReachability::new();
        check
            .expect_is_reachable()
            .returning(move || flag.load(std::sync::atomic::Ordering::SeqCst));
        Arc::new(check)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachability_check_brings_device_online() {
        let f = fixture(false);
        enqueue(&f, "c1");
        let reachable = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut rx = f.events.subscribe();
        let handle = ConnectivityMonitor::spawn_with_check(
            f.engine.clone(),
            &f.network,
            Duration::from_secs(60),
            reachable_when(&reachable),
        );
        settle().await;

        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert!(!f.network.is_online());
        assert!(f.remote.sent().is_empty());

        reachable.store(true, std::sync::atomic::Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(60)).await;
        completed(&mut rx).await;

        assert!(f.network.is_online());
        assert_eq!(f.remote.sent().len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachability_check_marks_device_offline() {
        let f = fixture(true);
        let reachable = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let handle = ConnectivityMonitor::spawn_with_check(
            f.engine.clone(),
            &f.network,
            Duration::from_secs(60),
            reachable_when(&reachable),
        );
        settle().await;

        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;

        assert!(!f.network.is_online());
        handle.shutdown().await;
    }
}
