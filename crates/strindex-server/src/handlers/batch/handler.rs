//! Batch orchestrator implementation.

use std::sync::Arc;
use std::time::Instant;

use strindex_domain::{FetchType, KeyCollection, StringIndexer, UseCaseKey};
use tracing::{debug, instrument};

use super::types::{BatchCodec, BatchResult};

/// Resolves every string in a batch with one `bulk_record` call.
///
/// Holds no storage logic of its own; the indexer decides where ids come from.
pub struct BatchOrchestrator {
    indexer: Arc<dyn StringIndexer>,
    use_case: UseCaseKey,
}

impl BatchOrchestrator {
    pub fn new(indexer: Arc<dyn StringIndexer>, use_case: UseCaseKey) -> Self {
        Self { indexer, use_case }
    }

    pub fn use_case(&self) -> UseCaseKey {
        self.use_case
    }

    /// Extracts strings, resolves them, and hands the ids back to the batch.
    ///
    /// Indexer errors fail the whole batch; nothing is partially rewritten.
    ///
    /// # Metrics
    ///
    /// - `strindex_bulk_record_duration_seconds` - time spent in `bulk_record`
    /// - `strindex_bulk_record_keys_total{fetch_type}` - resolved keys by provenance
    #[instrument(skip(self, batch), fields(use_case = %self.use_case))]
    pub async fn process<B: BatchCodec>(&self, batch: B) -> BatchResult<B::Output> {
        let keys = KeyCollection::new(batch.extract_strings());
        debug!(keys = keys.size(), "Resolving batch strings");

        let start = Instant::now();
        let results = self.indexer.bulk_record(self.use_case, &keys).await?;
        metrics::histogram!("strindex_bulk_record_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        for (fetch_type, count) in results.count_by_fetch_type() {
            metrics::counter!(
                "strindex_bulk_record_keys_total",
                "fetch_type" => fetch_type_label(fetch_type)
            )
            .increment(count as u64);
        }

        let mapping = results.get_mapped_results();
        let metadata = results.get_fetch_metadata();
        batch.reconstruct_messages(&mapping, &metadata)
    }
}

fn fetch_type_label(fetch_type: FetchType) -> &'static str {
    match fetch_type {
        FetchType::CacheHit => "cache_hit",
        FetchType::DbRead => "db_read",
        FetchType::FirstSeen => "first_seen",
        FetchType::RateLimited => "rate_limited",
        FetchType::Hardcoded => "hardcoded",
    }
}
