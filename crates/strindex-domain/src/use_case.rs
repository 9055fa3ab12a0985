//! Use cases and backend kinds.
//!
//! Each use case is indexed independently; the writes limiter namespace is
//! derived from the use case and the storage backend so that quotas for the
//! relational and partitioned backends never share counters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Which product area a batch of metrics belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UseCaseKey {
    #[serde(rename = "release-health")]
    ReleaseHealth,
    #[serde(rename = "performance")]
    Performance,
}

impl UseCaseKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            UseCaseKey::ReleaseHealth => "release-health",
            UseCaseKey::Performance => "performance",
        }
    }
}

impl fmt::Display for UseCaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UseCaseKey {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "release-health" => Ok(UseCaseKey::ReleaseHealth),
            "performance" => Ok(UseCaseKey::Performance),
            other => Err(IndexerError::InvalidInput {
                message: format!("unknown use case '{other}'"),
            }),
        }
    }
}

/// Storage backend family an indexer runs against. Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Relational,
    Distributed,
    Mock,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Relational => "relational",
            BackendKind::Distributed => "distributed",
            BackendKind::Mock => "mock",
        }
    }

    /// Cache partition prefix for ids produced by this backend.
    ///
    /// The relational and partitioned backends hand out different ids for the
    /// same string, so their cache entries must not overlap.
    pub fn cache_partition(&self) -> &'static str {
        match self {
            BackendKind::Relational | BackendKind::Mock => "pg",
            BackendKind::Distributed => "cs",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relational" => Ok(BackendKind::Relational),
            "distributed" => Ok(BackendKind::Distributed),
            "mock" => Ok(BackendKind::Mock),
            other => Err(IndexerError::InvalidInput {
                message: format!("unknown backend '{other}'"),
            }),
        }
    }
}

/// Default writes limiter namespace for a use case on a backend.
pub fn writes_limiter_namespace(use_case: UseCaseKey, backend: BackendKind) -> &'static str {
    match (use_case, backend) {
        (UseCaseKey::ReleaseHealth, BackendKind::Distributed) => "releasehealth.cs",
        (UseCaseKey::Performance, BackendKind::Distributed) => "performance.cs",
        (UseCaseKey::ReleaseHealth, _) => "releasehealth",
        (UseCaseKey::Performance, _) => "performance",
    }
}
