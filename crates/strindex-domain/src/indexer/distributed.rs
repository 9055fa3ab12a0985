//! Indexer over a range-partitioned store.
//!
//! Ids are generated here and stored encoded by [`IdCodec`]. The store has
//! no insert-or-ignore, so a batch that collides with an existing row is
//! retried row by row, and each conflicting row is resolved to the id that
//! is already stored.

use std::sync::Arc;

use async_trait::async_trait;
use strindex_storage::{InsertOutcome, PartitionedStringStore, StringRow, DEFAULT_RETENTION_DAYS};
use tracing::{debug, instrument, warn};

use super::conflict::parse_conflict;
use super::{record_db_insert, record_db_lookups, StringIndexer};
use crate::codec::IdCodec;
use crate::error::{IndexerError, IndexerResult};
use crate::id_generator::IdGenerator;
use crate::keys::{FetchType, KeyCollection, KeyResult, KeyResults};
use crate::ratelimit::WritesLimiter;
use crate::use_case::UseCaseKey;

/// [`StringIndexer`] over a [`PartitionedStringStore`].
pub struct DistributedIndexer<S: PartitionedStringStore> {
    store: Arc<S>,
    limiter: Arc<WritesLimiter>,
    id_generator: Arc<dyn IdGenerator>,
    codec: IdCodec,
    retention_days: i32,
}

impl<S: PartitionedStringStore> DistributedIndexer<S> {
    pub fn new(store: Arc<S>, limiter: Arc<WritesLimiter>, id_generator: Arc<dyn IdGenerator>) -> Self {
        Self {
            store,
            limiter,
            id_generator,
            codec: IdCodec::new(),
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

    fn decoded(&self, row: StringRow) -> KeyResult {
        KeyResult::new(row.organization_id, row.string, Some(self.codec.decode(row.id)))
    }

    async fn read_existing(&self, keys: &KeyCollection) -> IndexerResult<KeyResults> {
        let rows = self.store.read_by_unique_index(&keys.to_sorted_keys()).await?;
        let mut results = KeyResults::new();
        results.add_key_results(rows.into_iter().map(|row| self.decoded(row)), FetchType::DbRead);
        Ok(results)
    }

    /// Inserts `rows` one transaction each, resolving conflicts to the
    /// stored id.
    async fn insert_individually(&self, rows: &[StringRow]) -> IndexerResult<KeyResults> {
        let mut results = KeyResults::new();
        for row in rows {
            let id = self.insert_row(row).await?;
            results.add_key_result(
                KeyResult::new(row.organization_id, row.string.clone(), Some(id)),
                FetchType::FirstSeen,
                None,
            );
        }
        Ok(results)
    }

    /// Inserts a single row. When the conflict is not on its key, the
    /// generated id was already taken, so the row is retried once with a
    /// fresh id.
    async fn insert_row(&self, row: &StringRow) -> IndexerResult<u64> {
        if let Some(id) = self.try_insert(row).await? {
            return Ok(id);
        }

        let retry = StringRow::new(
            self.codec.encode(self.id_generator.next_id()),
            row.organization_id,
            row.string.clone(),
        )
        .with_retention_days(row.retention_days);
        debug!(
            organization_id = row.organization_id,
            string = %row.string,
            "generated id already taken; retrying with a fresh id"
        );
        if let Some(id) = self.try_insert(&retry).await? {
            return Ok(id);
        }

        warn!(
            organization_id = row.organization_id,
            string = %row.string,
            "conflict reported but no existing row found"
        );
        Err(IndexerError::UnresolvedConflict {
            organization_id: row.organization_id,
            string: row.string.clone(),
        })
    }

    /// Returns the id now stored for the row's key, or `None` when the
    /// insert conflicted but no row holds that key.
    async fn try_insert(&self, row: &StringRow) -> IndexerResult<Option<u64>> {
        let outcome = self.store.insert_one(row).await?;
        record_db_insert(false, 1);
        match outcome {
            InsertOutcome::Inserted => Ok(Some(self.codec.decode(row.id))),
            InsertOutcome::Conflict(conflict) => match parse_conflict(&conflict) {
                Some(existing)
                    if existing.organization_id == row.organization_id && existing.string == row.string =>
                {
                    Ok(Some(self.codec.decode(existing.encoded_id)))
                }
                _ => {
                    debug!(message = %conflict.message, "conflict detail not parsed; reading existing row");
                    self.read_conflicting(row).await
                }
            },
        }
    }

    async fn read_conflicting(&self, row: &StringRow) -> IndexerResult<Option<u64>> {
        let existing = self
            .store
            .read_by_unique_index(&[(row.organization_id, row.string.clone())])
            .await?;
        Ok(existing.into_iter().next().map(|existing| self.codec.decode(existing.id)))
    }
}

#[async_trait]
impl<S: PartitionedStringStore> StringIndexer for DistributedIndexer<S> {
    #[instrument(skip(self, keys), fields(use_case = %use_case, keys = keys.size()))]
    async fn bulk_record(&self, use_case: UseCaseKey, keys: &KeyCollection) -> IndexerResult<KeyResults> {
        let db_read = self.read_existing(keys).await?;
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

        let rows: Vec<StringRow> = grant
            .accepted_keys
            .to_sorted_keys()
            .into_iter()
            .map(|(org_id, string)| {
                let id = self.codec.encode(self.id_generator.next_id());
                StringRow::new(id, org_id, string).with_retention_days(self.retention_days)
            })
            .collect();

        // Any error below drops the grant, so no quota is consumed.
        let first_seen = match self.store.insert_batch(&rows).await? {
            InsertOutcome::Inserted => {
                record_db_insert(true, rows.len());
                let mut results = KeyResults::new();
                results.add_key_results(rows.into_iter().map(|row| self.decoded(row)), FetchType::FirstSeen);
                results
            }
            InsertOutcome::Conflict(conflict) => {
                debug!(
                    rows = rows.len(),
                    message = %conflict.message,
                    "batch insert conflicted; inserting rows individually"
                );
                self.insert_individually(&rows).await?
            }
        };

        self.limiter.commit_accepted(grant).await?;
        Ok(db_read.merge(first_seen).merge(dropped))
    }

    async fn resolve(&self, _use_case: UseCaseKey, organization_id: u64, string: &str) -> IndexerResult<Option<u64>> {
        let rows = self
            .store
            .read_by_unique_index(&[(organization_id, string.to_string())])
            .await?;
        Ok(rows.into_iter().next().map(|row| self.codec.decode(row.id)))
    }

    async fn reverse_resolve(&self, _use_case: UseCaseKey, id: u64) -> IndexerResult<Option<String>> {
        let row = self.store.read_by_id(self.codec.encode(id)).await?;
        Ok(row.map(|row| row.string))
    }

    async fn validate(&self) -> IndexerResult<()> {
        Ok(self.store.health_check().await?)
    }
}
