//! Read-through cache of customer credit balances.
//!
//! Reads prefer fresh remote data while online and fall back to whatever
//! was cached last when the network or the server lets them down. While
//! offline the cache answers every read, however old its entry.
//!
//! The cache holds at most `max_entries` customers; the least recently
//! fetched entry makes room for a new one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::CacheConfig;
use crate::error::SyncError;
use crate::features::sync::{NetworkStatus, RemoteApi, TokenProvider};
use crate::storage::{offload, Document, KeyValueStore, CREDIT_CACHE_KEY};

/// One store-credit record as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credit {
    /// Credit id
    pub id: String,
    /// Amount originally issued
    pub amount: f64,
    /// Amount still available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    /// Expiry, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Fields this crate does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Cached credits of one customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Customer id
    pub customer_id: String,
    /// Credits, in server order
    pub credits: Vec<Credit>,
    /// When the entry was fetched
    pub updated_at: DateTime<Utc>,
}

/// Where a lookup's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    /// Fetched from the server during this call.
    Remote,
    /// Cached entry within `max_age`.
    Cache,
    /// Cached entry older than `max_age`, served because fresh data was
    /// unavailable.
    Stale,
    /// Nothing cached and no way to fetch.
    NoData,
}

/// Result of a credit lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditLookup {
    /// Customer id
    pub customer_id: String,
    /// Credits (empty with `NoData`)
    pub credits: Vec<Credit>,
    /// When the data was fetched from the server
    pub updated_at: Option<DateTime<Utc>>,
    /// Provenance
    pub source: CreditSource,
}

impl CreditLookup {
    fn no_data(customer_id: &str) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            credits: Vec::new(),
            updated_at: None,
            source: CreditSource::NoData,
        }
    }

    fn from_entry(entry: CacheEntry, source: CreditSource) -> Self {
        Self {
            customer_id: entry.customer_id,
            credits: entry.credits,
            updated_at: Some(entry.updated_at),
            source,
        }
    }

    /// Sum of available balances, falling back to the issued amount.
    #[must_use]
    pub fn total_balance(&self) -> f64 {
        self.credits
            .iter()
            .map(|c| c.balance.unwrap_or(c.amount))
            .sum()
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    version: u64,
}

impl CacheState {
    /// Drop the least recently fetched entries until `max` remain.
    fn evict_to(&mut self, max: usize) {
        while self.entries.len() > max {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.updated_at)
                .map(|(customer_id, _)| customer_id.clone())
            else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::debug!(customer_id = %oldest, "credit cache entry evicted");
        }
    }

    /// Stamp a new version and serialize it.
    fn snapshot(&mut self) -> Result<(u64, String), SyncError> {
        self.version += 1;
        let raw = serde_json::to_string(&self.entries)
            .map_err(|e| SyncError::Storage(format!("Failed to serialize credit cache: {e}")))?;
        Ok((self.version, raw))
    }
}

/// Credit balance cache.
pub struct CreditCache {
    document: Arc<Document>,
    remote: Arc<dyn RemoteApi>,
    tokens: Arc<dyn TokenProvider>,
    network: NetworkStatus,
    max_age: Duration,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl CreditCache {
    /// Load cached entries from the store.
    ///
    /// The cache only holds data the server can resend, so an unreadable
    /// entry set is logged and discarded rather than treated as an error.
    #[must_use]
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteApi>,
        tokens: Arc<dyn TokenProvider>,
        network: NetworkStatus,
        config: &CacheConfig,
    ) -> Self {
        let document = Document::new(store, CREDIT_CACHE_KEY);
        let entries = match document.read() {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "discarding unreadable credit cache");
                HashMap::new()
            }),
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!(error = %e, "credit cache unavailable, starting empty");
                HashMap::new()
            }
        };

        let mut state = CacheState { entries, version: 0 };
        state.evict_to(config.max_entries);

        Self {
            document: Arc::new(document),
            remote,
            tokens,
            network,
            max_age: config.max_age(),
            max_entries: config.max_entries,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace an entry, evict past the cap, and serialize.
    fn store_entry(&self, entry: CacheEntry) -> Result<(u64, String), SyncError> {
        let mut state = self.lock();
        state.entries.insert(entry.customer_id.clone(), entry);
        state.evict_to(self.max_entries);
        state.snapshot()
    }

    fn is_stale(&self, entry: &CacheEntry) -> bool {
        Utc::now().signed_duration_since(entry.updated_at) > self.max_age
    }

    fn source_for(&self, entry: &CacheEntry) -> CreditSource {
        if self.is_stale(entry) {
            CreditSource::Stale
        } else {
            CreditSource::Cache
        }
    }

    /// The cached entry for a customer, if any.
    #[must_use]
    pub fn entry(&self, customer_id: &str) -> Option<CacheEntry> {
        self.lock().entries.get(customer_id).cloned()
    }

    /// Number of cached customers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Look up a customer's credits.
    ///
    /// # Errors
    ///
    /// Returns the remote or token error only when online, the fetch
    /// failed, and nothing is cached. Offline reads never fail.
    pub async fn get(
        &self,
        customer_id: &str,
        force_refresh: bool,
    ) -> Result<CreditLookup, SyncError> {
        let cached = self.entry(customer_id);

        if !self.network.is_online() {
            return Ok(cached.map_or_else(
                || CreditLookup::no_data(customer_id),
                |entry| {
                    let source = self.source_for(&entry);
                    CreditLookup::from_entry(entry, source)
                },
            ));
        }

        if let Some(entry) = &cached {
            if !force_refresh && !self.is_stale(entry) {
                return Ok(CreditLookup::from_entry(entry.clone(), CreditSource::Cache));
            }
        }

        let fetched = match self.tokens.token().await {
            Ok(token) => self.refresh_with_token(&token, customer_id).await,
            Err(e) => Err(e),
        };

        match (fetched, cached) {
            (Ok(lookup), _) => Ok(lookup),
            (Err(e), Some(entry)) => {
                tracing::warn!(customer_id, error = %e, "credit fetch failed, serving cached entry");
                let source = self.source_for(&entry);
                Ok(CreditLookup::from_entry(entry, source))
            }
            (Err(e), None) => Err(e),
        }
    }

    /// Fetch a customer's credits with an existing token and overwrite the
    /// cache entry.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Remote` if the fetch fails. A failure to persist
    /// the refreshed entry is logged, not returned.
    pub async fn refresh_with_token(
        &self,
        token: &str,
        customer_id: &str,
    ) -> Result<CreditLookup, SyncError> {
        let credits = self.remote.fetch_credits(token, customer_id).await?;

        let entry = CacheEntry {
            customer_id: customer_id.to_string(),
            credits,
            updated_at: Utc::now(),
        };

        let persisted = match self.store_entry(entry.clone()) {
            Ok((version, raw)) => {
                let document = Arc::clone(&self.document);
                offload(move || document.write(version, &raw))
                    .await
                    .and_then(|written| written)
                    .map(|_| ())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            tracing::warn!(customer_id, error = %e, "credit cache not persisted");
        }

        tracing::debug!(customer_id, credits = entry.credits.len(), "credit cache refreshed");
        Ok(CreditLookup::from_entry(entry, CreditSource::Remote))
    }

    /// Drop every cached entry.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the persisted cache cannot be removed.
    pub fn clear(&self) -> Result<(), SyncError> {
        let version = {
            let mut state = self.lock();
            state.entries.clear();
            state.version += 1;
            state.version
        };
        self.document.remove(version)
    }

    /// Insert an entry directly, e.g. to seed a device from a backup.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the cache cannot be persisted.
    pub fn insert(&self, entry: CacheEntry) -> Result<(), SyncError> {
        let (version, raw) = self.store_entry(entry)?;
        self.document.write(version, &raw).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::features::sync::fakes::{credit, server_error, FakeRemote};
    use crate::features::sync::StaticToken;
    use crate::storage::MemoryStore;

    struct Fixture {
        cache: CreditCache,
        remote: Arc<FakeRemote>,
        network: NetworkStatus,
        store: MemoryStore,
    }

    fn fixture(online: bool) -> Fixture {
        let store = MemoryStore::new("shop");
        let remote = Arc::new(FakeRemote::new());
        let network = NetworkStatus::new(online);
        let cache = CreditCache::load(
            Arc::new(store.clone()),
            remote.clone(),
            Arc::new(StaticToken("tok".to_string())),
            network.clone(),
            &CacheConfig {
                max_age_secs: 300,
                ..CacheConfig::default()
            },
        );
        Fixture {
            cache,
            remote,
            network,
            store,
        }
    }

    fn old_entry(customer_id: &str) -> CacheEntry {
        CacheEntry {
            customer_id: customer_id.to_string(),
            credits: vec![credit("old", 5.0)],
            updated_at: Utc::now() - Duration::hours(6),
        }
    }

    #[tokio::test]
    async fn test_online_miss_fetches_and_caches() {
        let f = fixture(true);
        f.remote.set_credits("c1", vec![credit("cr1", 25.0)]);

        let lookup = f.cache.get("c1", false).await.unwrap();
        assert_eq!(lookup.source, CreditSource::Remote);
        assert_eq!(lookup.credits, vec![credit("cr1", 25.0)]);
        assert!((lookup.total_balance() - 25.0).abs() < f64::EPSILON);

        // Fresh entry served without another fetch
        let again = f.cache.get("c1", false).await.unwrap();
        assert_eq!(again.source, CreditSource::Cache);
        assert_eq!(f.remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_entry() {
        let f = fixture(true);
        f.remote.set_credits("c1", vec![credit("cr1", 25.0)]);
        f.cache.get("c1", false).await.unwrap();

        f.remote.set_credits("c1", vec![credit("cr1", 25.0), credit("cr2", 5.0)]);
        let lookup = f.cache.get("c1", true).await.unwrap();

        assert_eq!(lookup.source, CreditSource::Remote);
        assert_eq!(lookup.credits.len(), 2);
        assert_eq!(f.remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refetched_online() {
        let f = fixture(true);
        f.cache.insert(old_entry("c1")).unwrap();
        f.remote.set_credits("c1", vec![credit("new", 40.0)]);

        let lookup = f.cache.get("c1", false).await.unwrap();
        assert_eq!(lookup.source, CreditSource::Remote);
        assert_eq!(lookup.credits[0].id, "new");
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_cache() {
        let f = fixture(true);
        f.cache.insert(old_entry("c1")).unwrap();
        f.remote.fail_fetches(Some(server_error()));

        let lookup = f.cache.get("c1", true).await.unwrap();
        assert_eq!(lookup.source, CreditSource::Stale);
        assert_eq!(lookup.credits[0].id, "old");
    }

    #[tokio::test]
    async fn test_remote_failure_without_cache_propagates() {
        let f = fixture(true);
        f.remote.fail_fetches(Some(RemoteError::Network("unreachable".to_string())));

        let err = f.cache.get("c1", false).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Network(_))));
    }

    #[tokio::test]
    async fn test_offline_serves_stale_entry() {
        let f = fixture(false);
        f.cache.insert(old_entry("c1")).unwrap();

        let lookup = f.cache.get("c1", true).await.unwrap();
        assert_eq!(lookup.source, CreditSource::Stale);
        assert_eq!(lookup.credits[0].id, "old");
        assert_eq!(f.remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_without_entry_is_no_data() {
        let f = fixture(false);

        let lookup = f.cache.get("c1", false).await.unwrap();
        assert_eq!(lookup.source, CreditSource::NoData);
        assert!(lookup.credits.is_empty());
        assert!(lookup.updated_at.is_none());
    }

    #[tokio::test]
    async fn test_entries_survive_reload() {
        let f = fixture(true);
        f.remote.set_credits("c1", vec![credit("cr1", 25.0)]);
        f.cache.get("c1", false).await.unwrap();

        f.network.set_online(false);
        let reloaded = CreditCache::load(
            Arc::new(f.store.clone()),
            f.remote.clone(),
            Arc::new(StaticToken("tok".to_string())),
            f.network.clone(),
            &CacheConfig::default(),
        );

        let lookup = reloaded.get("c1", false).await.unwrap();
        assert_eq!(lookup.source, CreditSource::Cache);
        assert_eq!(lookup.credits, vec![credit("cr1", 25.0)]);
    }

    #[tokio::test]
    async fn test_clear() {
        let f = fixture(true);
        f.cache.insert(old_entry("c1")).unwrap();
        assert_eq!(f.cache.len(), 1);

        f.cache.clear().unwrap();
        assert!(f.cache.is_empty());
        assert_eq!(f.store.get(CREDIT_CACHE_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupt_cache_is_discarded() {
        let store = MemoryStore::new("shop");
        store.set(CREDIT_CACHE_KEY, "not json").unwrap();

        let cache = CreditCache::load(
            Arc::new(store),
            Arc::new(FakeRemote::new()),
            Arc::new(StaticToken("tok".to_string())),
            NetworkStatus::new(false),
            &CacheConfig::default(),
        );
        assert!(cache.is_empty());
    }

    fn capped(max_entries: usize) -> Fixture {
        let f = fixture(true);
        let cache = CreditCache::load(
            Arc::new(f.store.clone()),
            f.remote.clone(),
            Arc::new(StaticToken("tok".to_string())),
            f.network.clone(),
            &CacheConfig {
                max_entries,
                ..CacheConfig::default()
            },
        );
        Fixture { cache, ..f }
    }

    fn entry_aged(customer_id: &str, hours: i64) -> CacheEntry {
        CacheEntry {
            customer_id: customer_id.to_string(),
            credits: vec![credit("cr", 1.0)],
            updated_at: Utc::now() - Duration::hours(hours),
        }
    }

    #[tokio::test]
    async fn test_cap_evicts_least_recently_fetched() {
        let f = capped(2);
        f.cache.insert(entry_aged("oldest", 3)).unwrap();
        f.cache.insert(entry_aged("older", 2)).unwrap();
        f.remote.set_credits("new", vec![credit("cr9", 9.0)]);

        f.cache.get("new", false).await.unwrap();

        assert_eq!(f.cache.len(), 2);
        assert!(f.cache.entry("oldest").is_none());
        assert!(f.cache.entry("older").is_some());
        assert!(f.cache.entry("new").is_some());

        let stored: HashMap<String, CacheEntry> =
            serde_json::from_str(&f.store.get(CREDIT_CACHE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(!stored.contains_key("oldest"));
    }

    #[test]
    fn test_cap_applies_to_loaded_entries() {
        let f = capped(3);
        for (customer, hours) in [("a", 4), ("b", 3), ("c", 2), ("d", 1)] {
            f.cache.insert(entry_aged(customer, hours)).unwrap();
        }
        assert_eq!(f.cache.len(), 3);

        let smaller = CreditCache::load(
            Arc::new(f.store.clone()),
            f.remote.clone(),
            Arc::new(StaticToken("tok".to_string())),
            f.network.clone(),
            &CacheConfig {
                max_entries: 1,
                ..CacheConfig::default()
            },
        );
        assert_eq!(smaller.len(), 1);
        assert!(smaller.entry("d").is_some());
    }
}
