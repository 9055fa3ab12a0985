//! Two-phase writes limiter.
//!
//! [`WritesLimiter::begin`] decides which candidate keys may be written and
//! returns a [`WriteLimitGrant`]. Nothing is counted until
//! [`WritesLimiter::commit`] is called with the keys that were persisted; a
//! grant that is dropped (e.g. because the write failed) consumes no quota.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use super::{GrantedQuota, MemorySlidingWindowStore, Quota, RequestedQuota, SlidingWindowStore};
use crate::error::IndexerResult;
use crate::keys::{FetchType, FetchTypeExt, KeyCollection, KeyResult, KeyResults};

/// Quotas applied to newly written strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WritesLimiterConfig {
    /// Applied to each organization separately.
    pub per_org: Vec<Quota>,
    /// Applied to all organizations combined.
    pub global: Vec<Quota>,
}

impl WritesLimiterConfig {
    pub fn with_per_org(mut self, quota: Quota) -> Self {
        self.per_org.push(quota);
        self
    }

    pub fn with_global(mut self, quota: Quota) -> Self {
        self.global.push(quota);
        self
    }
}

/// A string refused by the limiter, with the quota that refused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedString {
    pub key_result: KeyResult,
    pub fetch_type: FetchType,
    pub fetch_type_ext: Option<FetchTypeExt>,
}

/// Outcome of [`WritesLimiter::begin`]. Must be passed back to
/// [`WritesLimiter::commit`] for its quota to be consumed.
#[derive(Debug)]
#[must_use = "quota is only consumed by WritesLimiter::commit"]
pub struct WriteLimitGrant {
    pub accepted_keys: KeyCollection,
    pub dropped_strings: Vec<DroppedString>,
    org_grants: Vec<(u64, GrantedQuota)>,
    global_grants: Vec<GrantedQuota>,
    timestamp: u64,
}

impl WriteLimitGrant {
    /// Dropped strings as rate-limited results with no id.
    pub fn dropped_key_results(&self) -> KeyResults {
        let mut results = KeyResults::new();
        for dropped in &self.dropped_strings {
            results.add_key_result(
                dropped.key_result.clone(),
                dropped.fetch_type,
                dropped.fetch_type_ext.clone(),
            );
        }
        results
    }
}

/// Gates how many new strings each organization (and everyone combined) may
/// write within the configured windows.
pub struct WritesLimiter {
    namespace: String,
    config: WritesLimiterConfig,
    store: Arc<dyn SlidingWindowStore>,
}

impl std::fmt::Debug for WritesLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritesLimiter")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish()
    }
}

impl WritesLimiter {
    pub fn new(
        namespace: impl Into<String>,
        config: WritesLimiterConfig,
        store: Arc<dyn SlidingWindowStore>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            config,
            store,
        }
    }

    /// Creates a limiter backed by process-local counters.
    pub fn in_memory(namespace: impl Into<String>, config: WritesLimiterConfig) -> Self {
        Self::new(namespace, config, Arc::new(MemorySlidingWindowStore::new()))
    }

    /// Creates a limiter with no quotas; every key is accepted.
    pub fn unlimited(namespace: impl Into<String>) -> Self {
        Self::in_memory(namespace, WritesLimiterConfig::default())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn org_prefix(&self, org_id: u64) -> String {
        format!("metrics-indexer-{}-org-{org_id}", self.namespace)
    }

    fn global_prefix(&self) -> String {
        format!("metrics-indexer-{}-global", self.namespace)
    }

    /// Splits `keys` into accepted and dropped subsets at the current time.
    pub async fn begin(&self, keys: &KeyCollection) -> IndexerResult<WriteLimitGrant> {
        self.begin_at(keys, Utc::now().timestamp().max(0) as u64).await
    }

    /// Splits `keys` into accepted and dropped subsets at `timestamp`
    /// (seconds since the unix epoch).
    ///
    /// Per-organization quotas are checked first; global quotas are then
    /// checked against what the organizations were granted. Within an
    /// organization, strings are accepted in sorted order.
    #[instrument(skip(self, keys), fields(namespace = %self.namespace, keys = keys.size()))]
    pub async fn begin_at(&self, keys: &KeyCollection, timestamp: u64) -> IndexerResult<WriteLimitGrant> {
        let mut by_org: BTreeMap<u64, Vec<&str>> = BTreeMap::new();
        for (org_id, string) in keys.as_tuples() {
            by_org.entry(org_id).or_default().push(string);
        }
        for strings in by_org.values_mut() {
            strings.sort_unstable();
        }

        let org_requests: Vec<RequestedQuota> = by_org
            .iter()
            .map(|(org_id, strings)| RequestedQuota {
                prefix: self.org_prefix(*org_id),
                requested: strings.len() as u64,
                quotas: self.config.per_org.clone(),
            })
            .collect();
        let org_grants = self.store.check_within_quotas(&org_requests, timestamp).await?;

        let global_request = RequestedQuota {
            prefix: self.global_prefix(),
            requested: org_grants.iter().map(|g| g.granted).sum(),
            quotas: self.config.global.clone(),
        };
        let global_grants = self
            .store
            .check_within_quotas(std::slice::from_ref(&global_request), timestamp)
            .await?;
        let global_grant = global_grants.first();
        let mut global_remaining = global_grant.map_or(0, |g| g.granted);

        let mut accepted = Vec::new();
        let mut dropped_strings = Vec::new();
        let org_grants: Vec<(u64, GrantedQuota)> = by_org.keys().copied().zip(org_grants).collect();
        for ((org_id, strings), (_, org_grant)) in by_org.iter().zip(&org_grants) {
            for (position, string) in strings.iter().enumerate() {
                let within_org = (position as u64) < org_grant.granted;
                if within_org && global_remaining > 0 {
                    global_remaining -= 1;
                    accepted.push((*org_id, string.to_string()));
                    continue;
                }

                let (is_global, quota) = if within_org {
                    (true, global_grant.and_then(|g| g.reached_quotas.first()))
                } else {
                    (false, org_grant.reached_quotas.first())
                };
                metrics::counter!(
                    "strindex_writes_limited_total",
                    "is_global" => is_global.to_string()
                )
                .increment(1);
                dropped_strings.push(DroppedString {
                    key_result: KeyResult::new(*org_id, *string, None),
                    fetch_type: FetchType::RateLimited,
                    fetch_type_ext: quota.map(|q| FetchTypeExt {
                        is_global,
                        window_seconds: q.window_seconds,
                        limit: q.limit,
                    }),
                });
            }
        }

        if !dropped_strings.is_empty() {
            debug!(
                accepted = accepted.len(),
                dropped = dropped_strings.len(),
                "writes limiter dropped strings"
            );
        }

        Ok(WriteLimitGrant {
            accepted_keys: accepted.into_iter().collect(),
            dropped_strings,
            org_grants,
            global_grants,
            timestamp,
        })
    }

    /// Consumes quota for the accepted keys that appear in `persisted`.
    ///
    /// Keys outside the grant's accepted set are ignored, so a caller cannot
    /// consume more than it was granted.
    #[instrument(skip(self, grant, persisted), fields(namespace = %self.namespace))]
    pub async fn commit(&self, grant: WriteLimitGrant, persisted: &KeyCollection) -> IndexerResult<()> {
        let WriteLimitGrant {
            accepted_keys,
            org_grants,
            mut global_grants,
            timestamp,
            ..
        } = grant;

        let persisted_in = |org_id: u64| -> u64 {
            accepted_keys
                .strings(org_id)
                .map_or(0, |strings| {
                    strings.iter().filter(|s| persisted.contains(org_id, s)).count() as u64
                })
        };

        let mut total = 0;
        let org_grants: Vec<GrantedQuota> = org_grants
            .into_iter()
            .map(|(org_id, mut org_grant)| {
                org_grant.granted = persisted_in(org_id).min(org_grant.granted);
                total += org_grant.granted;
                org_grant
            })
            .collect();
        for global_grant in &mut global_grants {
            global_grant.granted = global_grant.granted.min(total);
        }

        self.store.use_quotas(&org_grants, timestamp).await?;
        self.store.use_quotas(&global_grants, timestamp).await?;
        Ok(())
    }

    /// Commits every accepted key of the grant.
    pub async fn commit_accepted(&self, grant: WriteLimitGrant) -> IndexerResult<()> {
        let persisted = grant.accepted_keys.clone();
        self.commit(grant, &persisted).await
    }
}
