//! Cache in front of another indexer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use super::StringIndexer;
use crate::cache::StringIndexerCache;
use crate::error::IndexerResult;
use crate::keys::{FetchType, KeyCollection, KeyResult, KeyResults};
use crate::use_case::UseCaseKey;

/// Serves cached ids and forwards misses to the wrapped indexer.
///
/// Only ids the wrapped indexer resolved in this call are written back; cache
/// hits are not re-written and rate-limited strings are never cached.
pub struct CachingIndexer {
    cache: StringIndexerCache,
    indexer: Arc<dyn StringIndexer>,
}

impl CachingIndexer {
    pub fn new(cache: StringIndexerCache, indexer: Arc<dyn StringIndexer>) -> Self {
        Self { cache, indexer }
    }

    pub fn cache(&self) -> &StringIndexerCache {
        &self.cache
    }
}

#[async_trait]
impl StringIndexer for CachingIndexer {
    #[instrument(skip(self, keys), fields(use_case = %use_case, keys = keys.size()))]
    async fn bulk_record(&self, use_case: UseCaseKey, keys: &KeyCollection) -> IndexerResult<KeyResults> {
        let hits = self.cache.get_many(use_case, keys).await;

        let mut cached = KeyResults::new();
        cached.add_key_results(
            hits.into_iter()
                .map(|((org_id, string), id)| KeyResult::new(org_id, string, Some(id))),
            FetchType::CacheHit,
        );

        let misses = cached.get_unmapped_keys(keys);
        if misses.is_empty() {
            return Ok(cached);
        }

        let resolved = self.indexer.bulk_record(use_case, &misses).await?;
        self.cache.set_many(use_case, &resolved).await;
        Ok(cached.merge(resolved))
    }

    async fn resolve(&self, use_case: UseCaseKey, organization_id: u64, string: &str) -> IndexerResult<Option<u64>> {
        let key: KeyCollection = std::iter::once((organization_id, string.to_string())).collect();
        if let Some(id) = self.cache.get_many(use_case, &key).await.into_values().next() {
            return Ok(Some(id));
        }
        let id = self.indexer.resolve(use_case, organization_id, string).await?;
        if let Some(id) = id {
            let mut results = KeyResults::new();
            results.add_key_result(KeyResult::new(organization_id, string, Some(id)), FetchType::DbRead, None);
            self.cache.set_many(use_case, &results).await;
        }
        Ok(id)
    }

    async fn reverse_resolve(&self, use_case: UseCaseKey, id: u64) -> IndexerResult<Option<String>> {
        self.indexer.reverse_resolve(use_case, id).await
    }

    async fn validate(&self) -> IndexerResult<()> {
        self.indexer.validate().await
    }
}
