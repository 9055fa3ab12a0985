//! Fixed ids for strings shared by every organization.
//!
//! Well-known metric names and tag keys/values get reserved ids above `2^63`,
//! the same in every organization, and are resolved without touching the
//! cache or the store.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use super::StringIndexer;
use crate::error::IndexerResult;
use crate::keys::{FetchType, KeyCollection, KeyResult, KeyResults};
use crate::use_case::UseCaseKey;

/// First reserved id. Generated and sequence ids are always below it.
pub const SHARED_STRING_PREFIX: u64 = 1 << 63;

/// `(offset, string)` pairs; the id is `SHARED_STRING_PREFIX + offset`.
const SHARED_STRINGS: &[(u64, &str)] = &[
    // release health
    (1, "sentry.sessions.session"),
    (2, "sentry.sessions.user"),
    (3, "sentry.sessions.session.duration"),
    (4, "sentry.sessions.session.error"),
    (5, "abnormal"),
    (6, "crashed"),
    (7, "environment"),
    (8, "errored"),
    (9, "healthy"),
    (10, "init"),
    (11, "production"),
    (12, "release"),
    (13, "session.status"),
    (14, "staging"),
    (15, "exited"),
    (16, "errored_preaggr"),
    // performance
    (100, "d:transactions/duration@millisecond"),
    (101, "s:transactions/user@none"),
    (102, "d:transactions/measurements.lcp@millisecond"),
    (103, "d:transactions/measurements.fcp@millisecond"),
    (104, "d:transactions/measurements.fid@millisecond"),
    (105, "d:transactions/measurements.cls@none"),
    (106, "c:transactions/count_per_root_project@none"),
    (200, "transaction"),
    (201, "transaction.status"),
    (202, "transaction.op"),
    (203, "transaction.method"),
    (204, "platform"),
    (205, "http.method"),
    (206, "browser.name"),
    (207, "os.name"),
    (208, "satisfaction"),
    (209, "satisfied"),
    (210, "tolerated"),
    (211, "frustrated"),
    (212, "ok"),
    (213, "cancelled"),
    (214, "unknown"),
    (215, "internal_error"),
    (216, "deadline_exceeded"),
    (217, "not_found"),
    (218, "<< unparameterized >>"),
];

struct SharedStrings {
    ids: HashMap<&'static str, u64>,
    strings: HashMap<u64, &'static str>,
}

fn shared_strings() -> &'static SharedStrings {
    static TABLE: OnceLock<SharedStrings> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut ids = HashMap::with_capacity(SHARED_STRINGS.len());
        let mut strings = HashMap::with_capacity(SHARED_STRINGS.len());
        for (offset, string) in SHARED_STRINGS {
            let id = SHARED_STRING_PREFIX + offset;
            ids.insert(*string, id);
            strings.insert(id, *string);
        }
        SharedStrings { ids, strings }
    })
}

/// Returns the reserved id for a shared string.
pub fn shared_string_id(string: &str) -> Option<u64> {
    shared_strings().ids.get(string).copied()
}

/// Returns the shared string for a reserved id.
pub fn shared_string(id: u64) -> Option<&'static str> {
    shared_strings().strings.get(&id).copied()
}

/// Resolves shared strings locally and forwards everything else.
pub struct StaticStringIndexer {
    indexer: Arc<dyn StringIndexer>,
}

impl StaticStringIndexer {
    pub fn new(indexer: Arc<dyn StringIndexer>) -> Self {
        Self { indexer }
    }
}

#[async_trait]
impl StringIndexer for StaticStringIndexer {
    async fn bulk_record(&self, use_case: UseCaseKey, keys: &KeyCollection) -> IndexerResult<KeyResults> {
        let mut hardcoded = KeyResults::new();
        hardcoded.add_key_results(
            keys.as_tuples().filter_map(|(org_id, string)| {
                shared_string_id(string).map(|id| KeyResult::new(org_id, string, Some(id)))
            }),
            FetchType::Hardcoded,
        );

        let remaining = hardcoded.get_unmapped_keys(keys);
        if remaining.is_empty() {
            return Ok(hardcoded);
        }
        let resolved = self.indexer.bulk_record(use_case, &remaining).await?;
        Ok(hardcoded.merge(resolved))
    }

    async fn record(&self, use_case: UseCaseKey, organization_id: u64, string: &str) -> IndexerResult<Option<u64>> {
        match shared_string_id(string) {
            Some(id) => Ok(Some(id)),
            None => self.indexer.record(use_case, organization_id, string).await,
        }
    }

    async fn resolve(&self, use_case: UseCaseKey, organization_id: u64, string: &str) -> IndexerResult<Option<u64>> {
        match shared_string_id(string) {
            Some(id) => Ok(Some(id)),
            None => self.indexer.resolve(use_case, organization_id, string).await,
        }
    }

    async fn reverse_resolve(&self, use_case: UseCaseKey, id: u64) -> IndexerResult<Option<String>> {
        match shared_string(id) {
            Some(string) => Ok(Some(string.to_string())),
            None => self.indexer.reverse_resolve(use_case, id).await,
        }
    }

    async fn validate(&self) -> IndexerResult<()> {
        self.indexer.validate().await
    }
}
