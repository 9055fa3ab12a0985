//! Indexer Scenario Tests.
//!
//! End-to-end checks of the composed indexer stack
//! (`StaticStringIndexer(CachingIndexer(backend))`) against in-memory stores:
//! - first/second call provenance for every backend
//! - concurrent writers converging on one id
//! - writes limiter accounting, including failed writes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use strindex_domain::keys::org_strings;
use strindex_domain::{
    CachingIndexer, DistributedIndexer, FetchType, IndexerCacheConfig, IndexerError,
    KeyCollection, KeyResults, MockIndexer, Quota, RelationalIndexer, SequentialIdGenerator,
    StaticStringIndexer, StringIndexer, StringIndexerCache, UseCaseKey, WritesLimiter,
    WritesLimiterConfig,
};
use strindex_storage::{
    ConflictDetail, InsertOutcome, MemoryPartitionedStore, MemoryRelationalStore, NewStringRow,
    OrgStringKey, PartitionedStringStore, RelationalStringStore, StorageError, StorageResult,
    StringRow,
};
use tokio::sync::Barrier;

const USE_CASE: UseCaseKey = UseCaseKey::Performance;

fn scenario_keys() -> KeyCollection {
    KeyCollection::new(org_strings([(1, vec!["a", "b"]), (2, vec!["a"])]))
}

fn stack(backend: Arc<dyn StringIndexer>) -> StaticStringIndexer {
    let cache = StringIndexerCache::in_memory(IndexerCacheConfig::default(), "test");
    StaticStringIndexer::new(Arc::new(CachingIndexer::new(cache, backend)))
}

fn unlimited() -> Arc<WritesLimiter> {
    Arc::new(WritesLimiter::unlimited("performance"))
}

fn assert_all(results: &KeyResults, fetch_type: FetchType) {
    for (org_id, string, meta) in results.iter() {
        assert_eq!(meta.fetch_type, fetch_type, "unexpected provenance for ({org_id}, {string})");
    }
}

fn distinct_ids(results: &KeyResults) -> usize {
    let mut ids: Vec<u64> = results.iter().filter_map(|(_, _, m)| m.id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.len()
}

// ============================================================
// Section 1: First and second call provenance
// ============================================================

async fn run_scenario(backend: Arc<dyn StringIndexer>) {
    let indexer = stack(Arc::clone(&backend));
    let keys = scenario_keys();

    let first = indexer.bulk_record(USE_CASE, &keys).await.unwrap();
    assert_eq!(first.len(), 3);
    assert_all(&first, FetchType::FirstSeen);
    assert_eq!(distinct_ids(&first), 3);

    let second = indexer.bulk_record(USE_CASE, &keys).await.unwrap();
    assert_all(&second, FetchType::CacheHit);
    assert_eq!(first.get_mapped_results(), second.get_mapped_results());

    // A cold cache over the same store reads the existing rows.
    let cold = stack(backend).bulk_record(USE_CASE, &keys).await.unwrap();
    assert_all(&cold, FetchType::DbRead);
    assert_eq!(first.get_mapped_results(), cold.get_mapped_results());
}

#[tokio::test]
async fn test_relational_scenario() {
    let store = MemoryRelationalStore::new_shared();
    run_scenario(Arc::new(RelationalIndexer::new(Arc::clone(&store), unlimited()))).await;
    assert_eq!(store.row_count().await, 3);
}

#[tokio::test]
async fn test_distributed_scenario() {
    let store = MemoryPartitionedStore::new_shared();
    run_scenario(Arc::new(DistributedIndexer::new(
        Arc::clone(&store),
        unlimited(),
        Arc::new(SequentialIdGenerator::new()),
    )))
    .await;
    assert_eq!(store.row_count().await, 3);
}

#[tokio::test]
async fn test_mock_scenario() {
    let mock = Arc::new(MockIndexer::new());
    run_scenario(Arc::clone(&mock) as Arc<dyn StringIndexer>).await;
    assert_eq!(mock.len(), 3);
}

#[tokio::test]
async fn test_shared_strings_mix_with_recorded_ones() {
    let indexer = stack(Arc::new(MockIndexer::new()));
    let keys = KeyCollection::new(org_strings([(1, vec!["transaction", "custom"])]));

    let results = indexer.bulk_record(USE_CASE, &keys).await.unwrap();
    assert_eq!(results.get(1, "transaction").unwrap().fetch_type, FetchType::Hardcoded);
    assert_eq!(results.get(1, "custom").unwrap().fetch_type, FetchType::FirstSeen);
}

// ============================================================
// Section 2: Concurrent writers
// ============================================================

/// Holds the first `racers` reads at a barrier so every racer misses before
/// any of them writes.
struct RacingRelationalStore {
    inner: Arc<MemoryRelationalStore>,
    barrier: Barrier,
    racers: usize,
    reads: AtomicUsize,
}

#[async_trait]
impl RelationalStringStore for RacingRelationalStore {
    async fn read_rows(&self, keys: &[OrgStringKey]) -> StorageResult<Vec<StringRow>> {
        let rows = self.inner.read_rows(keys).await?;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.racers {
            self.barrier.wait().await;
        }
        Ok(rows)
    }

    async fn insert_rows_ignore_conflicts(&self, rows: &[NewStringRow]) -> StorageResult<()> {
        self.inner.insert_rows_ignore_conflicts(rows).await
    }

    async fn read_row_by_id(&self, id: i64) -> StorageResult<Option<StringRow>> {
        self.inner.read_row_by_id(id).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}

/// Same as [`RacingRelationalStore`] for the partitioned contract. When
/// `opaque_conflicts` is set, conflict messages are replaced by text that
/// does not name the existing row.
struct RacingPartitionedStore {
    inner: Arc<MemoryPartitionedStore>,
    barrier: Barrier,
    racers: usize,
    reads: AtomicUsize,
    opaque_conflicts: bool,
}

impl RacingPartitionedStore {
    fn rewrite(&self, outcome: InsertOutcome) -> InsertOutcome {
        match outcome {
            InsertOutcome::Conflict(_) if self.opaque_conflicts => InsertOutcome::Conflict(
                ConflictDetail::new("duplicate key value violates unique constraint")
                    .with_detail("Key (organization_id, string)=(5, dup) already exists."),
            ),
            other => other,
        }
    }
}

#[async_trait]
impl PartitionedStringStore for RacingPartitionedStore {
    async fn read_by_unique_index(&self, keys: &[OrgStringKey]) -> StorageResult<Vec<StringRow>> {
        let rows = self.inner.read_by_unique_index(keys).await?;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.racers {
            self.barrier.wait().await;
        }
        Ok(rows)
    }

    async fn insert_batch(&self, rows: &[StringRow]) -> StorageResult<InsertOutcome> {
        Ok(self.rewrite(self.inner.insert_batch(rows).await?))
    }

    async fn insert_one(&self, row: &StringRow) -> StorageResult<InsertOutcome> {
        Ok(self.rewrite(self.inner.insert_one(row).await?))
    }

    async fn read_by_id(&self, id: i64) -> StorageResult<Option<StringRow>> {
        self.inner.read_by_id(id).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}

async fn race(indexers: Vec<Arc<dyn StringIndexer>>) -> Vec<u64> {
    let handles: Vec<_> = indexers
        .into_iter()
        .map(|indexer| tokio::spawn(async move { indexer.record(USE_CASE, 5, "dup").await }))
        .collect();
    futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().unwrap())
        .collect()
}

#[tokio::test]
async fn test_concurrent_relational_writers_converge() {
    let inner = MemoryRelationalStore::new_shared();
    let store = Arc::new(RacingRelationalStore {
        inner: Arc::clone(&inner),
        barrier: Barrier::new(2),
        racers: 2,
        reads: AtomicUsize::new(0),
    });
    let indexers: Vec<Arc<dyn StringIndexer>> = (0..2)
        .map(|_| Arc::new(RelationalIndexer::new(Arc::clone(&store), unlimited())) as Arc<dyn StringIndexer>)
        .collect();

    let ids = race(indexers).await;
    assert_eq!(ids[0], ids[1]);
    assert_eq!(inner.row_count().await, 1);
}

async fn run_partitioned_race(opaque_conflicts: bool) {
    let inner = MemoryPartitionedStore::new_shared();
    let store = Arc::new(RacingPartitionedStore {
        inner: Arc::clone(&inner),
        barrier: Barrier::new(2),
        racers: 2,
        reads: AtomicUsize::new(0),
        opaque_conflicts,
    });
    // Disjoint id ranges so the race is decided by the unique index alone.
    let indexers: Vec<Arc<dyn StringIndexer>> = [1, 1_000_000]
        .into_iter()
        .map(|first_id| {
            Arc::new(DistributedIndexer::new(
                Arc::clone(&store),
                unlimited(),
                Arc::new(SequentialIdGenerator::starting_at(first_id)),
            )) as Arc<dyn StringIndexer>
        })
        .collect();

    let ids = race(indexers).await;
    assert_eq!(ids[0], ids[1]);
    assert_eq!(inner.row_count().await, 1);
    let stored = inner
        .read_by_unique_index(&[(5, "dup".to_string())])
        .await
        .unwrap();
    assert_eq!(strindex_domain::IdCodec::new().decode(stored[0].id), ids[0]);
}

#[tokio::test]
async fn test_concurrent_distributed_writers_converge_via_conflict_detail() {
    run_partitioned_race(false).await;
}

#[tokio::test]
async fn test_concurrent_distributed_writers_converge_via_read_fallback() {
    run_partitioned_race(true).await;
}

// ============================================================
// Section 3: Writes limiter accounting
// ============================================================

/// Relational store whose inserts fail.
struct FailingInsertStore {
    inner: Arc<MemoryRelationalStore>,
}

#[async_trait]
impl RelationalStringStore for FailingInsertStore {
    async fn read_rows(&self, keys: &[OrgStringKey]) -> StorageResult<Vec<StringRow>> {
        self.inner.read_rows(keys).await
    }

    async fn insert_rows_ignore_conflicts(&self, _rows: &[NewStringRow]) -> StorageResult<()> {
        Err(StorageError::ConnectionError {
            message: "connection reset".to_string(),
        })
    }

    async fn read_row_by_id(&self, id: i64) -> StorageResult<Option<StringRow>> {
        self.inner.read_row_by_id(id).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}

/// Partitioned store whose inserts fail.
struct FailingPartitionedStore {
    inner: Arc<MemoryPartitionedStore>,
}

#[async_trait]
impl PartitionedStringStore for FailingPartitionedStore {
    async fn read_by_unique_index(&self, keys: &[OrgStringKey]) -> StorageResult<Vec<StringRow>> {
        self.inner.read_by_unique_index(keys).await
    }

    async fn insert_batch(&self, _rows: &[StringRow]) -> StorageResult<InsertOutcome> {
        Err(StorageError::ConnectionError {
            message: "session aborted".to_string(),
        })
    }

    async fn insert_one(&self, _row: &StringRow) -> StorageResult<InsertOutcome> {
        Err(StorageError::ConnectionError {
            message: "session aborted".to_string(),
        })
    }

    async fn read_by_id(&self, id: i64) -> StorageResult<Option<StringRow>> {
        self.inner.read_by_id(id).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}

fn limited(per_org_limit: u64) -> Arc<WritesLimiter> {
    let config =
        WritesLimiterConfig::default().with_per_org(Quota::new(3600, 60, per_org_limit).unwrap());
    Arc::new(WritesLimiter::in_memory("performance", config))
}

#[tokio::test]
async fn test_quota_admits_n_of_m_new_strings() {
    let store = MemoryRelationalStore::new_shared();
    let indexer = stack(Arc::new(RelationalIndexer::new(Arc::clone(&store), limited(2))));
    let keys = KeyCollection::new(org_strings([(1, vec!["s1", "s2", "s3", "s4", "s5"])]));

    let results = indexer.bulk_record(USE_CASE, &keys).await.unwrap();
    let counts = results.count_by_fetch_type();
    assert_eq!(counts.get(&FetchType::FirstSeen), Some(&2));
    assert_eq!(counts.get(&FetchType::RateLimited), Some(&3));
    for (_, _, meta) in results.iter().filter(|(_, _, m)| m.fetch_type == FetchType::RateLimited) {
        assert_eq!(meta.id, None);
        let ext = meta.fetch_type_ext.as_ref().unwrap();
        assert!(!ext.is_global);
        assert_eq!(ext.limit, 2);
    }
    assert_eq!(store.row_count().await, 2);

    // Rate-limited strings were not cached: the next call retries them and is
    // limited again, while the two written strings hit the cache.
    let again = indexer.bulk_record(USE_CASE, &keys).await.unwrap();
    let counts = again.count_by_fetch_type();
    assert_eq!(counts.get(&FetchType::CacheHit), Some(&2));
    assert_eq!(counts.get(&FetchType::RateLimited), Some(&3));
}

#[tokio::test]
async fn test_failed_write_consumes_no_quota() {
    let limiter = limited(2);
    let inner = MemoryRelationalStore::new_shared();
    let failing = RelationalIndexer::new(
        Arc::new(FailingInsertStore {
            inner: Arc::clone(&inner),
        }),
        Arc::clone(&limiter),
    );
    let keys = KeyCollection::new(org_strings([(1, vec!["a", "b"])]));

    let err = failing.bulk_record(USE_CASE, &keys).await.unwrap_err();
    assert!(matches!(err, IndexerError::Storage(StorageError::ConnectionError { .. })));

    let healthy = RelationalIndexer::new(Arc::clone(&inner), limiter);
    let results = healthy.bulk_record(USE_CASE, &keys).await.unwrap();
    assert_all(&results, FetchType::FirstSeen);
    assert_eq!(inner.row_count().await, 2);
}

#[tokio::test]
async fn test_failed_distributed_write_consumes_no_quota() {
    let limiter = limited(2);
    let inner = MemoryPartitionedStore::new_shared();
    let failing = DistributedIndexer::new(
        Arc::new(FailingPartitionedStore {
            inner: Arc::clone(&inner),
        }),
        Arc::clone(&limiter),
        Arc::new(SequentialIdGenerator::new()),
    );
    let keys = KeyCollection::new(org_strings([(1, vec!["a", "b"])]));

    let err = failing.bulk_record(USE_CASE, &keys).await.unwrap_err();
    assert!(matches!(err, IndexerError::Storage(StorageError::ConnectionError { .. })));
    assert_eq!(inner.row_count().await, 0);

    let healthy = DistributedIndexer::new(
        Arc::clone(&inner),
        limiter,
        Arc::new(SequentialIdGenerator::new()),
    );
    let results = healthy.bulk_record(USE_CASE, &keys).await.unwrap();
    assert_all(&results, FetchType::FirstSeen);
    assert_eq!(inner.row_count().await, 2);
}

#[tokio::test]
async fn test_existing_strings_do_not_consume_quota() {
    let limiter = limited(1);
    let store = MemoryRelationalStore::new_shared();
    let indexer = RelationalIndexer::new(Arc::clone(&store), limiter);

    let a = KeyCollection::new(org_strings([(1, vec!["a"])]));
    indexer.bulk_record(USE_CASE, &a).await.unwrap();

    // "a" is read, not written, so it does not count against the exhausted quota.
    let results = indexer.bulk_record(USE_CASE, &a).await.unwrap();
    assert_all(&results, FetchType::DbRead);

    let b = KeyCollection::new(org_strings([(1, vec!["b"])]));
    let results = indexer.bulk_record(USE_CASE, &b).await.unwrap();
    assert_all(&results, FetchType::RateLimited);
}
