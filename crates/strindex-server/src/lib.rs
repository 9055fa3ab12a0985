//! strindex-server: Batch orchestration and process setup
//!
//! This crate wires the indexer into a runnable process:
//! - Configuration loading (YAML file plus environment overrides)
//! - Logging initialization
//! - Indexer assembly from configuration
//! - Batch orchestration for metric payloads
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               strindex-server               │
//! ├─────────────────────────────────────────────┤
//! │  config.rs    - Configuration management    │
//! │  logging.rs   - tracing subscriber setup    │
//! │  bootstrap.rs - Indexer stack assembly      │
//! │  handlers/    - Request handlers            │
//! │    batch/       - Batch indexing            │
//! └─────────────────────────────────────────────┘
//! ```

pub mod bootstrap;
pub mod config;
pub mod handlers;
pub mod logging;

// Re-exports for convenience
pub use bootstrap::{build_indexer, BootstrapError, IndexerStack};
pub use config::{ConfigLoadError, StrindexConfig};
