//! Cache of resolved `(organization_id, string)` → id pairs.
//!
//! The cache sits in front of every storage backend. It is best effort: a
//! backend error is logged and treated as a miss, and nothing ever blocks on
//! it.
//!
//! # Key Design
//!
//! Keys are `{partition}:{version}:{use_case}:{organization_id}:{string}`.
//! The partition separates backends that assign different ids to the same
//! string, and bumping `version` orphans every existing entry.
//!
//! # Example
//!
//! ```rust,ignore
//! use strindex_domain::cache::{IndexerCacheConfig, StringIndexerCache};
//!
//! let cache = StringIndexerCache::in_memory(IndexerCacheConfig::default(), "pg");
//! let hits = cache.get_many(UseCaseKey::Performance, &keys).await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::warn;

use crate::error::CacheResult;
use crate::keys::{KeyCollection, KeyResults};
use crate::use_case::UseCaseKey;

/// Configuration for the indexer cache.
#[derive(Debug, Clone)]
pub struct IndexerCacheConfig {
    /// When false every lookup is a miss and writes are skipped.
    pub enabled: bool,
    /// Maximum number of entries.
    pub max_capacity: u64,
    /// Time to live for each entry.
    pub ttl: Duration,
    /// Key version; changing it invalidates all entries.
    pub version: u32,
}

impl Default for IndexerCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 1_000_000,
            ttl: Duration::from_secs(3600),
            version: 1,
        }
    }
}

impl IndexerCacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

/// Raw key/value cache store.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Returns the values present for `keys`; absent keys are omitted.
    async fn get_many(&self, keys: &[String]) -> CacheResult<HashMap<String, u64>>;

    /// Stores every entry, replacing existing values.
    async fn set_many(&self, entries: Vec<(String, u64)>) -> CacheResult<()>;
}

/// In-process cache store backed by Moka with TTL eviction.
pub struct MokaCacheBackend {
    cache: Cache<String, u64>,
}

impl MokaCacheBackend {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Returns the approximate number of entries in the cache.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance tasks (evictions).
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for MokaCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCacheBackend")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl CacheBackend for MokaCacheBackend {
    async fn get_many(&self, keys: &[String]) -> CacheResult<HashMap<String, u64>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(id) = self.cache.get(key).await {
                found.insert(key.clone(), id);
            }
        }
        Ok(found)
    }

    async fn set_many(&self, entries: Vec<(String, u64)>) -> CacheResult<()> {
        for (key, id) in entries {
            self.cache.insert(key, id).await;
        }
        Ok(())
    }
}

/// Indexer-facing cache: builds keys and degrades failures to misses.
pub struct StringIndexerCache {
    backend: Arc<dyn CacheBackend>,
    config: IndexerCacheConfig,
    partition: String,
}

impl std::fmt::Debug for StringIndexerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringIndexerCache")
            .field("config", &self.config)
            .field("partition", &self.partition)
            .finish()
    }
}

impl StringIndexerCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        config: IndexerCacheConfig,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            config,
            partition: partition.into(),
        }
    }

    /// Creates a cache over a fresh Moka store sized from `config`.
    pub fn in_memory(config: IndexerCacheConfig, partition: impl Into<String>) -> Self {
        let backend = Arc::new(MokaCacheBackend::new(config.max_capacity, config.ttl));
        Self::new(backend, config, partition)
    }

    pub fn config(&self) -> &IndexerCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn make_key(&self, use_case: UseCaseKey, organization_id: u64, string: &str) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.partition, self.config.version, use_case, organization_id, string
        )
    }

    /// Looks up every key. Returns `(organization_id, string)` → id for hits.
    ///
    /// # Metrics
    ///
    /// - `strindex_cache_hits_total` - incremented per hit
    /// - `strindex_cache_misses_total` - incremented per miss
    pub async fn get_many(
        &self,
        use_case: UseCaseKey,
        keys: &KeyCollection,
    ) -> HashMap<(u64, String), u64> {
        if !self.config.enabled || keys.is_empty() {
            return HashMap::new();
        }

        let mut cache_keys = Vec::with_capacity(keys.size());
        let mut lookup = HashMap::with_capacity(keys.size());
        for (org_id, string) in keys.as_tuples() {
            let cache_key = self.make_key(use_case, org_id, string);
            lookup.insert(cache_key.clone(), (org_id, string.to_string()));
            cache_keys.push(cache_key);
        }

        let found = match self.backend.get_many(&cache_keys).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "cache lookup failed; treating as misses");
                HashMap::new()
            }
        };

        let hits: HashMap<(u64, String), u64> = found
            .into_iter()
            .filter_map(|(cache_key, id)| lookup.remove(&cache_key).map(|key| (key, id)))
            .collect();

        metrics::counter!("strindex_cache_hits_total").increment(hits.len() as u64);
        metrics::counter!("strindex_cache_misses_total").increment((keys.size() - hits.len()) as u64);
        hits
    }

    /// Stores every result that carries an id.
    pub async fn set_many(&self, use_case: UseCaseKey, results: &KeyResults) {
        if !self.config.enabled {
            return;
        }
        let entries: Vec<(String, u64)> = results
            .iter()
            .filter_map(|(org_id, string, meta)| {
                meta.id.map(|id| (self.make_key(use_case, org_id, string), id))
            })
            .collect();
        if entries.is_empty() {
            return;
        }
        if let Err(e) = self.backend.set_many(entries).await {
            warn!(error = %e, "cache write failed");
        }
    }
}
