//! In-memory storage implementations for testing and local development.
//!
//! Both stores keep a primary map keyed by `(organization_id, string)` and a
//! secondary map keyed by id. The two maps must change together, so a table
//! sits behind a single `tokio::sync::RwLock` rather than a pair of
//! `DashMap`s: a batch insert checks every row against both indexes and then
//! writes all of them without another writer slipping in between.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::StorageResult;
use crate::traits::{
    ConflictDetail, InsertOutcome, NewStringRow, OrgStringKey, PartitionedStringStore,
    RelationalStringStore, StringRow,
};

/// Default table name reported in conflict messages.
pub const DEFAULT_TABLE_NAME: &str = "perfstringindexer";

/// Default unique index name reported in conflict messages.
pub const DEFAULT_UNIQUE_INDEX_NAME: &str = "unique_organization_string_index";

#[derive(Debug, Default)]
struct MemoryTable {
    by_key: HashMap<OrgStringKey, StringRow>,
    by_id: HashMap<i64, OrgStringKey>,
}

impl MemoryTable {
    fn read_keys(&self, keys: &[OrgStringKey]) -> Vec<StringRow> {
        keys.iter()
            .filter_map(|key| self.by_key.get(key).cloned())
            .collect()
    }

    fn read_id(&self, id: i64) -> Option<StringRow> {
        self.by_id
            .get(&id)
            .and_then(|key| self.by_key.get(key))
            .cloned()
    }

    fn insert_unchecked(&mut self, row: StringRow) {
        let key = (row.organization_id, row.string.clone());
        self.by_id.insert(row.id, key.clone());
        self.by_key.insert(key, row);
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }
}

/// In-memory relational store.
///
/// Ids come from an internal sequence starting at 1, mirroring a `BIGSERIAL`
/// column.
#[derive(Debug)]
pub struct MemoryRelationalStore {
    table: RwLock<MemoryTable>,
    next_id: AtomicI64,
}

impl Default for MemoryRelationalStore {
    fn default() -> Self {
        Self {
            table: RwLock::new(MemoryTable::default()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl MemoryRelationalStore {
    /// Creates a new in-memory relational store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory relational store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns the number of stored rows.
    pub async fn row_count(&self) -> usize {
        self.table.read().await.len()
    }
}

#[async_trait]
impl RelationalStringStore for MemoryRelationalStore {
    async fn read_rows(&self, keys: &[OrgStringKey]) -> StorageResult<Vec<StringRow>> {
        Ok(self.table.read().await.read_keys(keys))
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn insert_rows_ignore_conflicts(&self, rows: &[NewStringRow]) -> StorageResult<()> {
        let mut table = self.table.write().await;
        let now = Utc::now();
        let mut skipped = 0usize;
        for row in rows {
            let key = (row.organization_id, row.string.clone());
            if table.by_key.contains_key(&key) {
                skipped += 1;
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            table.insert_unchecked(StringRow {
                id,
                organization_id: row.organization_id,
                string: row.string.clone(),
                date_added: now,
                last_seen: now,
                retention_days: row.retention_days,
            });
        }
        if skipped > 0 {
            debug!(skipped, "ignored conflicting rows");
        }
        Ok(())
    }

    async fn read_row_by_id(&self, id: i64) -> StorageResult<Option<StringRow>> {
        Ok(self.table.read().await.read_id(id))
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// In-memory range-partitioned store.
///
/// Conflicts are reported with the message shape of a range-partitioned SQL
/// engine's unique index violation, so the caller's conflict parser is
/// exercised the same way it is in production.
#[derive(Debug)]
pub struct MemoryPartitionedStore {
    table: RwLock<MemoryTable>,
    table_name: String,
    unique_index_name: String,
}

impl Default for MemoryPartitionedStore {
    fn default() -> Self {
        Self::with_names(DEFAULT_TABLE_NAME, DEFAULT_UNIQUE_INDEX_NAME)
    }
}

impl MemoryPartitionedStore {
    /// Creates a new in-memory partitioned store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory partitioned store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Creates a store that names the given table and index in conflict messages.
    pub fn with_names(table_name: impl Into<String>, unique_index_name: impl Into<String>) -> Self {
        Self {
            table: RwLock::new(MemoryTable::default()),
            table_name: table_name.into(),
            unique_index_name: unique_index_name.into(),
        }
    }

    /// Returns the number of stored rows.
    pub async fn row_count(&self) -> usize {
        self.table.read().await.len()
    }

    fn find_conflict(&self, table: &MemoryTable, row: &StringRow) -> Option<ConflictDetail> {
        let key = (row.organization_id, row.string.clone());
        if let Some(existing) = table.by_key.get(&key) {
            return Some(ConflictDetail::new(format!(
                "Unique index violation on index {} at index key [{},{},{}]. \
                 It conflicts with row [{}] in table {}.",
                self.unique_index_name,
                existing.organization_id,
                existing.string,
                existing.id,
                existing.id,
                self.table_name
            )));
        }
        if table.by_id.contains_key(&row.id) {
            return Some(ConflictDetail::new(format!(
                "Row [{}] in table {} already exists",
                row.id, self.table_name
            )));
        }
        None
    }
}

#[async_trait]
impl PartitionedStringStore for MemoryPartitionedStore {
    async fn read_by_unique_index(&self, keys: &[OrgStringKey]) -> StorageResult<Vec<StringRow>> {
        Ok(self.table.read().await.read_keys(keys))
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn insert_batch(&self, rows: &[StringRow]) -> StorageResult<InsertOutcome> {
        let mut table = self.table.write().await;

        // Validate the whole batch against a scratch copy of the indexes so that
        // duplicates inside the batch are caught as well.
        let mut staged = MemoryTable::default();
        for row in rows {
            if let Some(conflict) = self
                .find_conflict(&table, row)
                .or_else(|| self.find_conflict(&staged, row))
            {
                debug!(message = %conflict.message, "batch insert conflicted");
                return Ok(InsertOutcome::Conflict(conflict));
            }
            staged.insert_unchecked(row.clone());
        }

        for row in staged.by_key.into_values() {
            table.insert_unchecked(row);
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn insert_one(&self, row: &StringRow) -> StorageResult<InsertOutcome> {
        let mut table = self.table.write().await;
        if let Some(conflict) = self.find_conflict(&table, row) {
            return Ok(InsertOutcome::Conflict(conflict));
        }
        table.insert_unchecked(row.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn read_by_id(&self, id: i64) -> StorageResult<Option<StringRow>> {
        Ok(self.table.read().await.read_id(id))
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
