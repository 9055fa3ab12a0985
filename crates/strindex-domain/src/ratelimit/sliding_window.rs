//! Sliding-window counter store.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;

use super::Quota;
use crate::error::IndexerResult;

/// A request for `requested` units against every quota in `quotas`, counted
/// under `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedQuota {
    pub prefix: String,
    pub requested: u64,
    pub quotas: Vec<Quota>,
}

/// Units granted for a [`RequestedQuota`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedQuota {
    pub prefix: String,
    pub granted: u64,
    /// All quotas the grant is counted against.
    pub quotas: Vec<Quota>,
    /// Quotas that prevented granting the full request.
    pub reached_quotas: Vec<Quota>,
}

/// Counter store behind the writes limiter.
///
/// Checking does not consume anything; units are only counted when
/// [`SlidingWindowStore::use_quotas`] is called.
#[async_trait]
pub trait SlidingWindowStore: Send + Sync + 'static {
    /// Computes how much of each request fits in its quotas at `timestamp`.
    async fn check_within_quotas(
        &self,
        requests: &[RequestedQuota],
        timestamp: u64,
    ) -> IndexerResult<Vec<GrantedQuota>>;

    /// Records the granted units at `timestamp`.
    async fn use_quotas(&self, grants: &[GrantedQuota], timestamp: u64) -> IndexerResult<()>;
}

/// In-memory counters: `(prefix, granularity)` → bucket index → units used.
#[derive(Debug, Default)]
pub struct MemorySlidingWindowStore {
    buckets: DashMap<(String, u64), BTreeMap<u64, u64>>,
}

impl MemorySlidingWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Units used under `prefix` within the quota's window ending at `timestamp`.
    pub fn usage(&self, prefix: &str, quota: &Quota, timestamp: u64) -> u64 {
        let current = timestamp / quota.granularity_seconds;
        let first = current.saturating_sub(quota.bucket_count() - 1);
        self.buckets
            .get(&(prefix.to_string(), quota.granularity_seconds))
            .map(|buckets| buckets.range(first..=current).map(|(_, used)| *used).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SlidingWindowStore for MemorySlidingWindowStore {
    async fn check_within_quotas(
        &self,
        requests: &[RequestedQuota],
        timestamp: u64,
    ) -> IndexerResult<Vec<GrantedQuota>> {
        Ok(requests
            .iter()
            .map(|request| {
                let mut granted = request.requested;
                let mut reached_quotas = Vec::new();
                for quota in &request.quotas {
                    let remaining = quota
                        .limit
                        .saturating_sub(self.usage(&request.prefix, quota, timestamp));
                    if remaining < request.requested {
                        reached_quotas.push(*quota);
                    }
                    granted = granted.min(remaining);
                }
                GrantedQuota {
                    prefix: request.prefix.clone(),
                    granted,
                    quotas: request.quotas.clone(),
                    reached_quotas,
                }
            })
            .collect())
    }

    async fn use_quotas(&self, grants: &[GrantedQuota], timestamp: u64) -> IndexerResult<()> {
        for grant in grants.iter().filter(|g| g.granted > 0) {
            // Quotas sharing a granularity share buckets; count once per granularity.
            let mut seen = HashSet::new();
            for quota in &grant.quotas {
                if !seen.insert(quota.granularity_seconds) {
                    continue;
                }
                let longest_window = grant
                    .quotas
                    .iter()
                    .filter(|q| q.granularity_seconds == quota.granularity_seconds)
                    .map(Quota::bucket_count)
                    .max()
                    .unwrap_or(1);
                let current = timestamp / quota.granularity_seconds;
                let mut buckets = self
                    .buckets
                    .entry((grant.prefix.clone(), quota.granularity_seconds))
                    .or_default();
                *buckets.entry(current).or_insert(0) += grant.granted;
                let oldest = current.saturating_sub(longest_window - 1);
                buckets.retain(|bucket, _| *bucket >= oldest);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prefix: &str, requested: u64, quotas: Vec<Quota>) -> RequestedQuota {
        RequestedQuota {
            prefix: prefix.to_string(),
            requested,
            quotas,
        }
    }

    #[tokio::test]
    async fn test_check_does_not_consume() {
        let store = MemorySlidingWindowStore::new();
        let quota = Quota::new(60, 10, 5).unwrap();
        let requests = vec![request("p", 3, vec![quota])];

        for _ in 0..3 {
            let grants = store.check_within_quotas(&requests, 100).await.unwrap();
            assert_eq!(grants[0].granted, 3);
            assert!(grants[0].reached_quotas.is_empty());
        }
        assert_eq!(store.usage("p", &quota, 100), 0);
    }

    #[tokio::test]
    async fn test_grants_are_capped_by_remaining_quota() {
        let store = MemorySlidingWindowStore::new();
        let quota = Quota::new(60, 10, 5).unwrap();
        let requests = vec![request("p", 3, vec![quota])];

        let grants = store.check_within_quotas(&requests, 100).await.unwrap();
        store.use_quotas(&grants, 100).await.unwrap();

        let grants = store.check_within_quotas(&requests, 105).await.unwrap();
        assert_eq!(grants[0].granted, 2);
        assert_eq!(grants[0].reached_quotas, vec![quota]);
    }

    #[tokio::test]
    async fn test_usage_expires_after_window() {
        let store = MemorySlidingWindowStore::new();
        let quota = Quota::new(60, 10, 5).unwrap();
        let requests = vec![request("p", 5, vec![quota])];

        let grants = store.check_within_quotas(&requests, 100).await.unwrap();
        store.use_quotas(&grants, 100).await.unwrap();
        assert_eq!(store.usage("p", &quota, 150), 5);
        assert_eq!(store.usage("p", &quota, 160), 0);

        let grants = store.check_within_quotas(&requests, 160).await.unwrap();
        assert_eq!(grants[0].granted, 5);
    }

    #[tokio::test]
    async fn test_prefixes_are_isolated() {
        let store = MemorySlidingWindowStore::new();
        let quota = Quota::new(60, 10, 1).unwrap();
        let grants = store
            .check_within_quotas(&[request("a", 1, vec![quota])], 0)
            .await
            .unwrap();
        store.use_quotas(&grants, 0).await.unwrap();

        let grants = store
            .check_within_quotas(&[request("a", 1, vec![quota]), request("b", 1, vec![quota])], 0)
            .await
            .unwrap();
        assert_eq!(grants[0].granted, 0);
        assert_eq!(grants[1].granted, 1);
    }

    #[tokio::test]
    async fn test_tightest_quota_wins() {
        let store = MemorySlidingWindowStore::new();
        let loose = Quota::new(3600, 60, 100).unwrap();
        let tight = Quota::new(60, 60, 2).unwrap();
        let grants = store
            .check_within_quotas(&[request("p", 10, vec![loose, tight])], 0)
            .await
            .unwrap();
        assert_eq!(grants[0].granted, 2);
        assert_eq!(grants[0].reached_quotas, vec![tight]);
    }
}
