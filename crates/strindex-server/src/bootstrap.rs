//! Indexer assembly.
//!
//! Builds the indexer stack selected by [`StrindexConfig`] once at startup:
//! `StaticStringIndexer(CachingIndexer(backend))`, where the backend is the
//! relational, distributed, or mock variant.

use std::sync::Arc;

use strindex_domain::{
    BackendKind, CachingIndexer, DistributedIndexer, MockIndexer, RelationalIndexer,
    StaticStringIndexer, StringIndexer, StringIndexerCache, TimestampIdGenerator, UseCaseKey,
    WritesLimiter,
};
use strindex_storage::{CockroachConfig, CockroachStringStore, PostgresConfig, PostgresStringStore};
use tracing::info;

use crate::config::{ConfigLoadError, StrindexConfig};

/// Errors raised while assembling the indexer.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    #[error("storage initialization failed: {0}")]
    Storage(#[from] strindex_storage::StorageError),
}

/// A ready-to-use indexer and the use case it serves.
pub struct IndexerStack {
    pub indexer: Arc<dyn StringIndexer>,
    pub use_case: UseCaseKey,
    pub backend: BackendKind,
}

impl std::fmt::Debug for IndexerStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerStack")
            .field("use_case", &self.use_case)
            .field("backend", &self.backend)
            .finish()
    }
}

/// Builds the configured indexer stack.
///
/// Connects to the database for the relational and distributed backends and
/// creates the schema when `indexer.run_migrations` is set.
pub async fn build_indexer(config: &StrindexConfig) -> Result<IndexerStack, BootstrapError> {
    let backend = config.indexer.backend_kind()?;
    let use_case = config.indexer.use_case_key()?;

    let namespace = config.writes_limiter.namespace_for(use_case, backend);
    let limiter = Arc::new(WritesLimiter::in_memory(
        namespace.clone(),
        config.writes_limiter.to_limiter_config(),
    ));
    info!(
        namespace = %namespace,
        per_org_quotas = config.writes_limiter.per_org.len(),
        global_quotas = config.writes_limiter.global.len(),
        "Writes limiter configured"
    );

    let inner: Arc<dyn StringIndexer> = match backend {
        BackendKind::Relational => {
            let store_config = PostgresConfig {
                database_url: database_url(config)?,
                table_name: config.indexer.table_name_or_default(),
                max_connections: config.indexer.pool_size,
                connect_timeout_secs: config.indexer.connection_timeout_secs,
                query_timeout_secs: config.indexer.query_timeout_secs,
                ..Default::default()
            };
            info!(table = %store_config.table_name, "Connecting to PostgreSQL");
            let store = PostgresStringStore::from_config(&store_config).await?;
            if config.indexer.run_migrations {
                info!("Running database migrations");
                store.run_migrations().await?;
            }
            Arc::new(
                RelationalIndexer::new(Arc::new(store), limiter)
                    .with_retention_days(config.indexer.retention_days),
            )
        }
        BackendKind::Distributed => {
            let store_config = CockroachConfig {
                database_url: database_url(config)?,
                table_name: config.indexer.table_name_or_default(),
                unique_index_name: config.indexer.unique_index_name.clone(),
                max_connections: config.indexer.pool_size,
                connect_timeout_secs: config.indexer.connection_timeout_secs,
                query_timeout_secs: config.indexer.query_timeout_secs,
                ..Default::default()
            };
            info!(table = %store_config.table_name, "Connecting to CockroachDB");
            let store = CockroachStringStore::from_config(&store_config).await?;
            if config.indexer.run_migrations {
                info!("Running database migrations");
                store.run_migrations().await?;
            }
            Arc::new(
                DistributedIndexer::new(Arc::new(store), limiter, Arc::new(TimestampIdGenerator::new()))
                    .with_retention_days(config.indexer.retention_days),
            )
        }
        BackendKind::Mock => {
            info!("Using in-memory mock indexer");
            Arc::new(MockIndexer::new())
        }
    };

    Ok(IndexerStack {
        indexer: wrap_indexer(config, backend, inner),
        use_case,
        backend,
    })
}

/// Wraps a backend indexer with the cache and the shared-strings table.
pub fn wrap_indexer(
    config: &StrindexConfig,
    backend: BackendKind,
    inner: Arc<dyn StringIndexer>,
) -> Arc<dyn StringIndexer> {
    let cache = StringIndexerCache::in_memory(config.cache.to_cache_config(), backend.cache_partition());
    info!(
        enabled = cache.is_enabled(),
        partition = backend.cache_partition(),
        "Indexer cache configured"
    );
    let caching: Arc<dyn StringIndexer> = Arc::new(CachingIndexer::new(cache, inner));
    Arc::new(StaticStringIndexer::new(caching))
}

fn database_url(config: &StrindexConfig) -> Result<String, ConfigLoadError> {
    config
        .indexer
        .database_url
        .clone()
        .ok_or_else(|| ConfigLoadError::Invalid {
            message: format!(
                "indexer.database_url is required when backend is '{}'",
                config.indexer.backend
            ),
        })
}
