//! Write rate limiting for newly seen strings.
//!
//! Quotas are sliding windows counted in fixed-size buckets. The
//! [`WritesLimiter`] turns a set of candidate keys into accepted and dropped
//! subsets and only consumes quota once the caller commits the keys it
//! actually persisted.

mod sliding_window;
mod writes;

use serde::{Deserialize, Serialize};

use crate::error::{IndexerError, IndexerResult};

pub use sliding_window::{GrantedQuota, MemorySlidingWindowStore, RequestedQuota, SlidingWindowStore};
pub use writes::{DroppedString, WriteLimitGrant, WritesLimiter, WritesLimiterConfig};

/// A limit of `limit` units per `window_seconds`, tracked in buckets of
/// `granularity_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quota {
    pub window_seconds: u64,
    pub granularity_seconds: u64,
    pub limit: u64,
}

impl Quota {
    /// Creates a validated quota.
    pub fn new(window_seconds: u64, granularity_seconds: u64, limit: u64) -> IndexerResult<Self> {
        let quota = Self {
            window_seconds,
            granularity_seconds,
            limit,
        };
        quota.validate()?;
        Ok(quota)
    }

    /// Checks that the window is a positive multiple of the granularity.
    pub fn validate(&self) -> IndexerResult<()> {
        if self.granularity_seconds == 0 {
            return Err(IndexerError::InvalidInput {
                message: "quota granularity_seconds must be greater than 0".to_string(),
            });
        }
        if self.window_seconds == 0 || self.window_seconds % self.granularity_seconds != 0 {
            return Err(IndexerError::InvalidInput {
                message: format!(
                    "quota window_seconds ({}) must be a positive multiple of granularity_seconds ({})",
                    self.window_seconds, self.granularity_seconds
                ),
            });
        }
        Ok(())
    }

    /// Number of buckets in the window.
    pub(crate) fn bucket_count(&self) -> u64 {
        self.window_seconds / self.granularity_seconds
    }
}
