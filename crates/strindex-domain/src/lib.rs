//! strindex-domain: Core string indexing logic
//!
//! This crate contains the indexing engine including:
//! - Key sets and resolution results with fetch-type provenance
//! - Id codec and id generators for the range-partitioned backend
//! - Two-phase writes limiter over sliding-window quotas
//! - Resolved-id cache
//! - The `StringIndexer` contract and its variants
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               strindex-domain               │
//! ├─────────────────────────────────────────────┤
//! │  keys.rs      - KeyCollection & KeyResults  │
//! │  codec.rs     - Bit-reversal id codec       │
//! │  ratelimit/   - Writes limiter              │
//! │  cache/       - Resolved-id cache           │
//! │  indexer/     - Indexer variants            │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod codec;
pub mod error;
pub mod id_generator;
pub mod indexer;
pub mod keys;
mod keys_proptest;
pub mod ratelimit;
pub mod use_case;

// Re-export commonly used types at the crate root
pub use cache::{CacheBackend, IndexerCacheConfig, MokaCacheBackend, StringIndexerCache};
pub use codec::IdCodec;
pub use error::{CacheError, CacheResult, IndexerError, IndexerResult};
pub use id_generator::{IdGenerator, SequentialIdGenerator, TimestampIdGenerator};
pub use indexer::{
    CachingIndexer, DistributedIndexer, MockIndexer, RelationalIndexer, StaticStringIndexer,
    StringIndexer,
};
pub use keys::{
    FetchType, FetchTypeExt, KeyCollection, KeyResult, KeyResults, MappedResults, Metadata,
    OrgStrings,
};
pub use ratelimit::{Quota, WriteLimitGrant, WritesLimiter, WritesLimiterConfig};
pub use use_case::{writes_limiter_namespace, BackendKind, UseCaseKey};
