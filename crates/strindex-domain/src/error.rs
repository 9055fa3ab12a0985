//! Domain error types for indexing operations.

use strindex_storage::StorageError;
use thiserror::Error;

/// Errors raised while resolving or recording strings.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The backing store failed. Propagated unmodified.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A uniqueness conflict was reported but no existing row could be read
    /// back for the key.
    #[error("conflict on organization {organization_id} string {string:?} but no existing row was found")]
    UnresolvedConflict { organization_id: u64, string: String },

    /// The writes limiter could not evaluate or record quotas.
    #[error("rate limiter error: {message}")]
    RateLimiter { message: String },

    /// Caller supplied an argument the indexer cannot accept.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Errors raised by a cache backend. Callers treat these as misses.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {message}")]
    Unavailable { message: String },
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
