//! Data types for batch indexing.

use std::collections::HashMap;

use strindex_domain::{IndexerError, MappedResults, Metadata, OrgStrings};

/// Per-key fetch metadata, `org_id → string → metadata`.
pub type FetchMetadata = HashMap<u64, HashMap<String, Metadata>>;

/// A batch of messages whose strings are resolved together.
///
/// The orchestrator only sees the strings a batch asks for and hands the
/// resolved ids back; decoding and re-encoding messages is the codec's job.
pub trait BatchCodec {
    /// The rewritten batch.
    type Output;

    /// Every string the batch needs resolved, grouped by organization.
    fn extract_strings(&self) -> OrgStrings;

    /// Rewrites the batch using resolved ids.
    ///
    /// `mapping` has an entry for every extracted key; keys that were rate
    /// limited map to `None`.
    fn reconstruct_messages(
        self,
        mapping: &MappedResults,
        metadata: &FetchMetadata,
    ) -> BatchResult<Self::Output>;
}

/// Errors that can occur while indexing a batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The indexer failed; the whole batch fails with it.
    #[error("indexer error: {0}")]
    Indexer(#[from] IndexerError),

    /// A line of input could not be decoded.
    #[error("invalid payload on line {line}: {message}")]
    Decode { line: usize, message: String },

    /// A payload failed validation.
    #[error("invalid payload at index {index}: {message}")]
    InvalidPayload { index: usize, message: String },

    /// The indexer returned no entry for an extracted string.
    #[error("no mapping for string '{string}' in organization {org_id}")]
    MissingMapping { org_id: u64, string: String },
}

/// Result type for batch operations.
pub type BatchResult<T> = Result<T, BatchError>;
