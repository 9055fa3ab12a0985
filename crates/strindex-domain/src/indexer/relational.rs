//! Indexer over a relational store.
//!
//! New strings are inserted with unique conflicts ignored and then re-read,
//! so whichever writer's row landed first is returned to every writer.

use std::sync::Arc;

use async_trait::async_trait;
use strindex_storage::{NewStringRow, RelationalStringStore, StringRow, DEFAULT_RETENTION_DAYS};
use tracing::{debug, instrument};

use super::{record_db_insert, record_db_lookups, StringIndexer};
use crate::error::{IndexerError, IndexerResult};
use crate::keys::{FetchType, KeyCollection, KeyResult, KeyResults};
use crate::ratelimit::WritesLimiter;
use crate::use_case::UseCaseKey;

/// [`StringIndexer`] over a [`RelationalStringStore`].
pub struct RelationalIndexer<S: RelationalStringStore> {
    store: Arc<S>,
    limiter: Arc<WritesLimiter>,
    retention_days: i32,
}

impl<S: RelationalStringStore> RelationalIndexer<S> {
    pub fn new(store: Arc<S>, limiter: Arc<WritesLimiter>) -> Self {
        Self {
            store,
            limiter,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_retention_days(mut self, retention_days: i32) -> Self {
        self.retention_days = retention_days;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn to_key_result(row: StringRow) -> IndexerResult<KeyResult> {
        let id = u64::try_from(row.id).map_err(|_| IndexerError::InvalidInput {
            message: format!("relational store returned negative id {}", row.id),
        })?;
        Ok(KeyResult::new(row.organization_id, row.string, Some(id)))
    }

    async fn read_results(&self, keys: &KeyCollection, fetch_type: FetchType) -> IndexerResult<KeyResults> {
        let rows = self.store.read_rows(&keys.to_sorted_keys()).await?;
        let mut results = KeyResults::new();
        for row in rows {
            results.add_key_result(Self::to_key_result(row)?, fetch_type, None);
        }
        Ok(results)
    }
}

#[async_trait]
impl<S: RelationalStringStore> StringIndexer for RelationalIndexer<S> {
    #[instrument(skip(self, keys), fields(use_case = %use_case, keys = keys.size()))]
    async fn bulk_record(&self, use_case: UseCaseKey, keys: &KeyCollection) -> IndexerResult<KeyResults> {
        let db_read = self.read_results(keys, FetchType::DbRead).await?;
        let unmapped = db_read.get_unmapped_keys(keys);
        record_db_lookups(db_read.len(), unmapped.size());
        if unmapped.is_empty() {
            return Ok(db_read);
        }

        let grant = self.limiter.begin(&unmapped).await?;
        let dropped = grant.dropped_key_results();
        if grant.accepted_keys.is_empty() {
            return Ok(db_read.merge(dropped));
        }

        let rows: Vec<NewStringRow> = grant
            .accepted_keys
            .to_sorted_keys()
            .into_iter()
            .map(|(org_id, string)| NewStringRow {
                organization_id: org_id,
                string,
                retention_days: self.retention_days,
            })
            .collect();
        // An error here drops the grant, so no quota is consumed.
        self.store.insert_rows_ignore_conflicts(&rows).await?;
        record_db_insert(true, rows.len());

        let first_seen = self.read_results(&grant.accepted_keys, FetchType::FirstSeen).await?;
        if let Some((org_id, string)) = first_seen.get_unmapped_keys(&grant.accepted_keys).as_tuples().next() {
            return Err(IndexerError::UnresolvedConflict {
                organization_id: org_id,
                string: string.to_string(),
            });
        }
        debug!(inserted = rows.len(), "recorded new strings");

        self.limiter.commit_accepted(grant).await?;
        Ok(db_read.merge(first_seen).merge(dropped))
    }

    async fn resolve(&self, _use_case: UseCaseKey, organization_id: u64, string: &str) -> IndexerResult<Option<u64>> {
        let rows = self.store.read_rows(&[(organization_id, string.to_string())]).await?;
        rows.into_iter()
            .next()
            .map(|row| Self::to_key_result(row).map(|r| r.id))
            .transpose()
            .map(Option::flatten)
    }

    async fn reverse_resolve(&self, _use_case: UseCaseKey, id: u64) -> IndexerResult<Option<String>> {
        let Ok(id) = i64::try_from(id) else {
            return Ok(None);
        };
        Ok(self.store.read_row_by_id(id).await?.map(|row| row.string))
    }

    async fn validate(&self) -> IndexerResult<()> {
        Ok(self.store.health_check().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::org_strings;
    use crate::ratelimit::{Quota, WritesLimiterConfig};
    use strindex_storage::MemoryRelationalStore;

    fn indexer() -> RelationalIndexer<MemoryRelationalStore> {
        RelationalIndexer::new(
            MemoryRelationalStore::new_shared(),
            Arc::new(WritesLimiter::unlimited("performance")),
        )
    }

    #[tokio::test]
    async fn test_first_call_creates_then_reads() {
        let indexer = indexer();
        let keys = KeyCollection::new(org_strings([(1, vec!["a", "b"]), (2, vec!["a"])]));

        let first = indexer.bulk_record(UseCaseKey::Performance, &keys).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|(_, _, m)| m.fetch_type == FetchType::FirstSeen));

        let second = indexer.bulk_record(UseCaseKey::Performance, &keys).await.unwrap();
        assert!(second.iter().all(|(_, _, m)| m.fetch_type == FetchType::DbRead));
        assert_eq!(first.get_mapped_results(), second.get_mapped_results());
        assert_eq!(indexer.store().row_count().await, 3);
    }

    #[tokio::test]
    async fn test_resolve_and_reverse_resolve() {
        let indexer = indexer();
        let id = indexer
            .record(UseCaseKey::Performance, 1, "transaction")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(indexer.resolve(UseCaseKey::Performance, 1, "transaction").await.unwrap(), Some(id));
        assert_eq!(indexer.resolve(UseCaseKey::Performance, 2, "transaction").await.unwrap(), None);
        assert_eq!(
            indexer.reverse_resolve(UseCaseKey::Performance, id).await.unwrap(),
            Some("transaction".to_string())
        );
        assert_eq!(indexer.reverse_resolve(UseCaseKey::Performance, 9_999).await.unwrap(), None);
        assert_eq!(indexer.reverse_resolve(UseCaseKey::Performance, u64::MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rate_limited_strings_are_not_written() {
        let config = WritesLimiterConfig::default().with_per_org(Quota::new(60, 60, 1).unwrap());
        let indexer = RelationalIndexer::new(
            MemoryRelationalStore::new_shared(),
            Arc::new(WritesLimiter::in_memory("performance", config)),
        );
        let keys = KeyCollection::new(org_strings([(1, vec!["a", "b"])]));

        let results = indexer.bulk_record(UseCaseKey::Performance, &keys).await.unwrap();
        assert_eq!(results.get(1, "a").unwrap().fetch_type, FetchType::FirstSeen);
        assert_eq!(results.get(1, "b").unwrap().fetch_type, FetchType::RateLimited);
        assert_eq!(results.get_id(1, "b"), None);
        assert_eq!(indexer.store().row_count().await, 1);
    }

    #[tokio::test]
    async fn test_validate_checks_store() {
        indexer().validate().await.unwrap();
    }
}
