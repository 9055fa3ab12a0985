//! strindex-storage: Storage abstraction layer
//!
//! This crate provides the row-level storage contracts for the string
//! indexer, including:
//! - `RelationalStringStore` for stores that can ignore unique conflicts
//! - `PartitionedStringStore` for range-partitioned stores that report them
//! - In-memory implementations of both for testing
//! - PostgreSQL (relational) and CockroachDB (range-partitioned) implementations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              strindex-storage               │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs    - Store traits & row types    │
//! │  memory.rs    - In-memory implementations   │
//! │  postgres.rs  - PostgreSQL relational store │
//! │  cockroach.rs - CockroachDB partitioned     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cockroach;
pub mod error;
pub mod memory;
pub mod postgres;
mod query;
pub mod traits;

// Re-export commonly used types
pub use cockroach::{CockroachConfig, CockroachStringStore};
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryPartitionedStore, MemoryRelationalStore};
pub use postgres::{PostgresConfig, PostgresStringStore};
pub use traits::{
    ConflictDetail, InsertOutcome, NewStringRow, OrgStringKey, PartitionedStringStore,
    RelationalStringStore, StringRow, DEFAULT_RETENTION_DAYS,
};
