//! Process-local indexer for tests and development.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::StringIndexer;
use crate::error::IndexerResult;
use crate::keys::{FetchType, KeyCollection, KeyResult, KeyResults};
use crate::use_case::UseCaseKey;

/// Stores mappings in memory; ids count up from 1. Never rate limits.
#[derive(Debug)]
pub struct MockIndexer {
    ids: DashMap<(u64, String), u64>,
    strings: DashMap<u64, String>,
    next_id: AtomicU64,
}

impl Default for MockIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIndexer {
    pub fn new() -> Self {
        Self {
            ids: DashMap::new(),
            strings: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of distinct strings recorded.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn record_one(&self, organization_id: u64, string: &str) -> (u64, FetchType) {
        match self.ids.entry((organization_id, string.to_string())) {
            Entry::Occupied(entry) => (*entry.get(), FetchType::DbRead),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                entry.insert(id);
                self.strings.insert(id, string.to_string());
                (id, FetchType::FirstSeen)
            }
        }
    }
}

#[async_trait]
impl StringIndexer for MockIndexer {
    async fn bulk_record(&self, _use_case: UseCaseKey, keys: &KeyCollection) -> IndexerResult<KeyResults> {
        let mut results = KeyResults::new();
        for (org_id, string) in keys.as_tuples() {
            let (id, fetch_type) = self.record_one(org_id, string);
            results.add_key_result(KeyResult::new(org_id, string, Some(id)), fetch_type, None);
        }
        Ok(results)
    }

    async fn resolve(&self, _use_case: UseCaseKey, organization_id: u64, string: &str) -> IndexerResult<Option<u64>> {
        Ok(self
            .ids
            .get(&(organization_id, string.to_string()))
            .map(|id| *id))
    }

    async fn reverse_resolve(&self, _use_case: UseCaseKey, id: u64) -> IndexerResult<Option<String>> {
        Ok(self.strings.get(&id).map(|s| s.clone()))
    }
}
