//! String indexer contract and its variants.
//!
//! Every variant implements [`StringIndexer`]:
//!
//! - [`RelationalIndexer`] - insert-ignore-conflicts plus re-read
//! - [`DistributedIndexer`] - generated, encoded ids with conflict recovery
//! - [`MockIndexer`] - process-local maps, for tests and development
//! - [`CachingIndexer`] - cache in front of another indexer
//! - [`StaticStringIndexer`] - fixed ids for well-known shared strings
//!
//! A deployment selects one storage variant at startup and wraps it as
//! `StaticStringIndexer(CachingIndexer(backend))`.

mod caching;
mod conflict;
mod distributed;
mod mock;
mod relational;
pub mod static_strings;

use async_trait::async_trait;

use crate::error::IndexerResult;
use crate::keys::{KeyCollection, KeyResults};
use crate::use_case::UseCaseKey;

pub use caching::CachingIndexer;
pub use conflict::{parse_conflict, ConflictingRow};
pub use distributed::DistributedIndexer;
pub use mock::MockIndexer;
pub use relational::RelationalIndexer;
pub use static_strings::StaticStringIndexer;

/// Maps tenant-scoped strings to integer ids and back.
///
/// Implementations must be thread-safe; concurrent calls for the same key
/// (from any number of processes sharing a store) return the same id.
#[async_trait]
pub trait StringIndexer: Send + Sync + 'static {
    /// Resolves every key, creating ids for strings not yet seen.
    ///
    /// The result holds exactly one entry per input key. Strings refused by
    /// the writes limiter are present with no id and
    /// [`FetchType::RateLimited`](crate::keys::FetchType::RateLimited).
    async fn bulk_record(&self, use_case: UseCaseKey, keys: &KeyCollection) -> IndexerResult<KeyResults>;

    /// Resolves a single string, creating its id if needed.
    ///
    /// Returns `None` if the string was rate limited.
    async fn record(&self, use_case: UseCaseKey, organization_id: u64, string: &str) -> IndexerResult<Option<u64>> {
        let keys: KeyCollection = std::iter::once((organization_id, string.to_string())).collect();
        let results = self.bulk_record(use_case, &keys).await?;
        Ok(results.get_id(organization_id, string))
    }

    /// Looks up an existing id without creating one.
    async fn resolve(&self, use_case: UseCaseKey, organization_id: u64, string: &str) -> IndexerResult<Option<u64>>;

    /// Looks up the string for an id. Unknown ids return `None`.
    async fn reverse_resolve(&self, use_case: UseCaseKey, id: u64) -> IndexerResult<Option<String>>;

    /// Confirms the indexer's backing store is reachable.
    async fn validate(&self) -> IndexerResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: StringIndexer + ?Sized> StringIndexer for std::sync::Arc<T> {
    async fn bulk_record(&self, use_case: UseCaseKey, keys: &KeyCollection) -> IndexerResult<KeyResults> {
        (**self).bulk_record(use_case, keys).await
    }

    async fn record(&self, use_case: UseCaseKey, organization_id: u64, string: &str) -> IndexerResult<Option<u64>> {
        (**self).record(use_case, organization_id, string).await
    }

    async fn resolve(&self, use_case: UseCaseKey, organization_id: u64, string: &str) -> IndexerResult<Option<u64>> {
        (**self).resolve(use_case, organization_id, string).await
    }

    async fn reverse_resolve(&self, use_case: UseCaseKey, id: u64) -> IndexerResult<Option<String>> {
        (**self).reverse_resolve(use_case, id).await
    }

    async fn validate(&self) -> IndexerResult<()> {
        (**self).validate().await
    }
}

/// Records `strindex_db_lookups_total` for a batch read.
pub(crate) fn record_db_lookups(hits: usize, misses: usize) {
    metrics::counter!("strindex_db_lookups_total", "db_hit" => "true").increment(hits as u64);
    metrics::counter!("strindex_db_lookups_total", "db_hit" => "false").increment(misses as u64);
}

/// Records `strindex_db_insert_total` and `strindex_db_insert_rows_total`.
pub(crate) fn record_db_insert(batch: bool, rows: usize) {
    let batch = if batch { "true" } else { "false" };
    metrics::counter!("strindex_db_insert_total", "batch" => batch).increment(1);
    metrics::counter!("strindex_db_insert_rows_total", "batch" => batch).increment(rows as u64);
}
