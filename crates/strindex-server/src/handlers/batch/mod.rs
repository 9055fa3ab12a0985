//! Batch indexing.
//!
//! A batch of incoming messages is indexed in one pass:
//!
//! 1. **Extract**: the batch lists the strings it needs, per organization
//! 2. **Resolve**: one `bulk_record` call on the configured indexer
//! 3. **Reconstruct**: the batch rewrites its messages with the resolved ids
//!    and the per-key fetch metadata
//!
//! Messages referencing a rate-limited string are dropped during
//! reconstruction. An indexer error fails the whole batch.

mod handler;
mod payload;
mod types;

pub use handler::BatchOrchestrator;
pub use payload::{
    IndexedMetric, MetricBatch, MetricPayload, ReconstructedBatch, MAX_NAME_LENGTH,
    MAX_TAG_KEY_LENGTH, MAX_TAG_VALUE_LENGTH,
};
pub use types::{BatchCodec, BatchError, BatchResult, FetchMetadata};
