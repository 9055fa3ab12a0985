//! Storage error types.

use std::time::Duration;

use thiserror::Error;

/// Storage-specific errors.
///
/// A unique-constraint conflict is deliberately absent here: inserts report
/// conflicts through [`crate::InsertOutcome`] so callers handle them as a
/// normal branch.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection error.
    #[error("database connection error: {message}")]
    ConnectionError { message: String },

    /// Database query error.
    #[error("database query error: {message}")]
    QueryError { message: String },

    /// Transaction error.
    #[error("transaction error: {message}")]
    TransactionError { message: String },

    /// Query exceeded its configured timeout.
    #[error("query timeout after {timeout:?} during {operation}")]
    QueryTimeout {
        operation: String,
        timeout: Duration,
    },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
