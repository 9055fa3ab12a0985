//! Storage trait definitions.
//!
//! Two row-level contracts exist because the two backend families disagree on
//! how a duplicate insert behaves:
//!
//! - [`RelationalStringStore`] can insert while ignoring unique conflicts, so
//!   callers re-read to learn the winning row.
//! - [`PartitionedStringStore`] has no such option. Every insert either lands
//!   or reports an [`InsertOutcome::Conflict`] that the caller must diagnose.
//!
//! Both guarantee `(organization_id, string)` and `id` are unique and that
//! rows are never updated or deleted through these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StorageError, StorageResult};

/// Default number of days a row is retained.
pub const DEFAULT_RETENTION_DAYS: i32 = 90;

/// Maximum length of a table or index identifier.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// A tenant-scoped lookup key: `(organization_id, string)`.
pub type OrgStringKey = (u64, String);

/// A persisted string row.
///
/// For partitioned stores `id` is the encoded id as physically stored; for
/// relational stores it is the id handed out to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRow {
    pub id: i64,
    pub organization_id: u64,
    pub string: String,
    pub date_added: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub retention_days: i32,
}

impl StringRow {
    /// Creates a row stamped with the current time.
    pub fn new(id: i64, organization_id: u64, string: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            organization_id,
            string: string.into(),
            date_added: now,
            last_seen: now,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    /// Sets the retention period.
    pub fn with_retention_days(mut self, retention_days: i32) -> Self {
        self.retention_days = retention_days;
        self
    }
}

/// A row to be inserted into a relational store, which assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStringRow {
    pub organization_id: u64,
    pub string: String,
    pub retention_days: i32,
}

impl NewStringRow {
    pub fn new(organization_id: u64, string: impl Into<String>) -> Self {
        Self {
            organization_id,
            string: string.into(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// Backend-reported description of a unique constraint violation.
///
/// `message` is the primary error text; `detail` carries any secondary text
/// the backend attached (e.g. PostgreSQL's `DETAIL` field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDetail {
    pub message: String,
    pub detail: Option<String>,
}

impl ConflictDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Result of an insert against a partitioned store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Every row was written.
    Inserted,
    /// At least one row collided with an existing one; nothing was written.
    Conflict(ConflictDetail),
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// Relational storage: insert-ignore-conflicts plus re-read.
///
/// Implementations must be thread-safe (Send + Sync) and support
/// async operations.
#[async_trait]
pub trait RelationalStringStore: Send + Sync + 'static {
    /// Reads the rows matching any of the given keys. Missing keys are absent
    /// from the result.
    async fn read_rows(&self, keys: &[OrgStringKey]) -> StorageResult<Vec<StringRow>>;

    /// Inserts rows, silently skipping any that violate a unique constraint.
    async fn insert_rows_ignore_conflicts(&self, rows: &[NewStringRow]) -> StorageResult<()>;

    /// Reads a single row by id.
    async fn read_row_by_id(&self, id: i64) -> StorageResult<Option<StringRow>>;

    /// Runs a trivial query to confirm the store is reachable.
    async fn health_check(&self) -> StorageResult<()>;
}

/// Range-partitioned storage: transactional inserts that report conflicts.
#[async_trait]
pub trait PartitionedStringStore: Send + Sync + 'static {
    /// Point-reads through the unique `(organization_id, string)` index.
    async fn read_by_unique_index(&self, keys: &[OrgStringKey]) -> StorageResult<Vec<StringRow>>;

    /// Inserts all rows in one transaction. On any conflict nothing is written.
    async fn insert_batch(&self, rows: &[StringRow]) -> StorageResult<InsertOutcome>;

    /// Inserts a single row in its own transaction.
    async fn insert_one(&self, row: &StringRow) -> StorageResult<InsertOutcome>;

    /// Reads a single row by its stored (encoded) id.
    async fn read_by_id(&self, id: i64) -> StorageResult<Option<StringRow>>;

    /// Runs a trivial query to confirm the store is reachable.
    async fn health_check(&self) -> StorageResult<()>;
}

/// Validates a SQL identifier (table or index name) before it is interpolated
/// into a statement.
pub fn validate_identifier(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidInput {
            message: "identifier cannot be empty".to_string(),
        });
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(StorageError::InvalidInput {
            message: format!(
                "identifier exceeds maximum length of {MAX_IDENTIFIER_LENGTH} characters"
            ),
        });
    }
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StorageError::InvalidInput {
            message: format!("invalid identifier '{name}': use [A-Za-z_][A-Za-z0-9_]*"),
        });
    }
    Ok(())
}

/// Converts an organization id to the signed column type used by SQL backends.
pub fn organization_id_to_i64(organization_id: u64) -> StorageResult<i64> {
    i64::try_from(organization_id).map_err(|_| StorageError::InvalidInput {
        message: format!("organization_id {organization_id} does not fit in a signed 64-bit column"),
    })
}

/// Converts a stored organization id back to its unsigned form.
pub fn organization_id_from_i64(organization_id: i64) -> StorageResult<u64> {
    u64::try_from(organization_id).map_err(|_| StorageError::QueryError {
        message: format!("stored organization_id {organization_id} is negative"),
    })
}
