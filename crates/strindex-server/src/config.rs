//! Configuration management for the strindex service.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults. The configuration is built once at
//! startup and passed to [`crate::bootstrap`]; there is no global registry.
//!
//! # Example
//!
//! ```ignore
//! use strindex_server::config::StrindexConfig;
//!
//! // Load from file with env overrides
//! let config = StrindexConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = StrindexConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use strindex_domain::ratelimit::Quota;
use strindex_domain::{
    writes_limiter_namespace, BackendKind, IndexerCacheConfig, UseCaseKey, WritesLimiterConfig,
};
use strindex_storage::memory::{DEFAULT_TABLE_NAME as DEFAULT_DISTRIBUTED_TABLE, DEFAULT_UNIQUE_INDEX_NAME};
use strindex_storage::postgres::DEFAULT_RELATIONAL_TABLE;
use strindex_storage::traits::validate_identifier;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct StrindexConfig {
    /// Indexer backend settings
    #[serde(default)]
    pub indexer: IndexerSettings,

    /// Resolved-id cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Writes limiter settings
    #[serde(default)]
    pub writes_limiter: WritesLimiterSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Indexer backend settings.
///
/// These settings can be overridden via environment variables with the
/// `STRINDEX_` prefix and `__` as the nested key separator:
///
/// - `STRINDEX_INDEXER__BACKEND=distributed`
/// - `STRINDEX_INDEXER__DATABASE_URL=postgresql://root@localhost:26257/strindex`
///
/// # Example YAML Configuration
///
/// ```yaml
/// indexer:
///   backend: relational
///   use_case: performance
///   database_url: postgres://localhost/strindex
///   pool_size: 10
/// ```
#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct IndexerSettings {
    /// Backend: "relational", "distributed", or "mock"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Use case: "release-health" or "performance"
    #[serde(default = "default_use_case")]
    pub use_case: String,

    /// Database connection URL (required for "relational" and "distributed")
    pub database_url: Option<String>,

    /// Table name; defaults depend on the backend
    pub table_name: Option<String>,

    /// Unique `(organization_id, string)` index name (distributed backend)
    #[serde(default = "default_unique_index_name")]
    pub unique_index_name: String,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Per-query timeout in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Retention period recorded on new rows
    #[serde(default = "default_retention_days")]
    pub retention_days: i32,

    /// Create tables and indexes at startup
    #[serde(default)]
    pub run_migrations: bool,
}

// Custom Debug implementation to hide credentials in database_url
impl std::fmt::Debug for IndexerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerSettings")
            .field("backend", &self.backend)
            .field("use_case", &self.use_case)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("table_name", &self.table_name)
            .field("unique_index_name", &self.unique_index_name)
            .field("pool_size", &self.pool_size)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("retention_days", &self.retention_days)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            use_case: default_use_case(),
            database_url: None,
            table_name: None,
            unique_index_name: default_unique_index_name(),
            pool_size: default_pool_size(),
            connection_timeout_secs: default_connection_timeout(),
            query_timeout_secs: default_query_timeout(),
            retention_days: default_retention_days(),
            run_migrations: false,
        }
    }
}

impl IndexerSettings {
    /// Parsed backend kind.
    pub fn backend_kind(&self) -> Result<BackendKind, ConfigLoadError> {
        self.backend.parse().map_err(|_| ConfigLoadError::Invalid {
            message: format!(
                "indexer.backend must be one of: {VALID_BACKENDS:?}, got: {}",
                self.backend
            ),
        })
    }

    /// Parsed use case.
    pub fn use_case_key(&self) -> Result<UseCaseKey, ConfigLoadError> {
        self.use_case.parse().map_err(|_| ConfigLoadError::Invalid {
            message: format!(
                "indexer.use_case must be one of: {VALID_USE_CASES:?}, got: {}",
                self.use_case
            ),
        })
    }

    /// Configured table name, or the backend's default.
    pub fn table_name_or_default(&self) -> String {
        match (&self.table_name, self.backend.as_str()) {
            (Some(name), _) => name.clone(),
            (None, "distributed") => DEFAULT_DISTRIBUTED_TABLE.to_string(),
            (None, _) => DEFAULT_RELATIONAL_TABLE.to_string(),
        }
    }
}

const VALID_BACKENDS: [&str; 3] = ["relational", "distributed", "mock"];
const VALID_USE_CASES: [&str; 2] = ["release-health", "performance"];

fn default_backend() -> String {
    "mock".to_string()
}

fn default_use_case() -> String {
    "performance".to_string()
}

fn default_unique_index_name() -> String {
    DEFAULT_UNIQUE_INDEX_NAME.to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_query_timeout() -> u64 {
    30
}

fn default_retention_days() -> i32 {
    90
}

/// Resolved-id cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    /// Enable the cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached entries
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,

    /// Entry time to live in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Key version; bump to orphan all entries
    #[serde(default = "default_cache_version")]
    pub version: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
            version: default_cache_version(),
        }
    }
}

impl CacheSettings {
    /// Converts to the domain cache configuration.
    pub fn to_cache_config(&self) -> IndexerCacheConfig {
        IndexerCacheConfig::default()
            .with_enabled(self.enabled)
            .with_max_capacity(self.max_capacity)
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_version(self.version)
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> u64 {
    1_000_000
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_version() -> u32 {
    1
}

/// Writes limiter settings.
///
/// # Example YAML Configuration
///
/// ```yaml
/// writes_limiter:
///   per_org:
///     - window_seconds: 3600
///       granularity_seconds: 60
///       limit: 10000
///   global:
///     - window_seconds: 60
///       granularity_seconds: 10
///       limit: 100000
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct WritesLimiterSettings {
    /// Counter namespace; derived from use case and backend when unset
    pub namespace: Option<String>,

    /// Quotas applied to each organization
    #[serde(default)]
    pub per_org: Vec<Quota>,

    /// Quotas applied to all organizations combined
    #[serde(default)]
    pub global: Vec<Quota>,
}

impl WritesLimiterSettings {
    /// Namespace to count under for the given use case and backend.
    pub fn namespace_for(&self, use_case: UseCaseKey, backend: BackendKind) -> String {
        self.namespace
            .clone()
            .unwrap_or_else(|| writes_limiter_namespace(use_case, backend).to_string())
    }

    /// Converts to the domain limiter configuration.
    pub fn to_limiter_config(&self) -> WritesLimiterConfig {
        WritesLimiterConfig {
            per_org: self.per_org.clone(),
            global: self.global.clone(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl StrindexConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `STRINDEX_` and use `__` as separator.
    /// For example:
    /// - `STRINDEX_INDEXER__BACKEND=relational` overrides `indexer.backend`
    /// - `STRINDEX_CACHE__TTL_SECS=60` overrides `cache.ttl_secs`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&StrindexConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("STRINDEX")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let strindex_config: StrindexConfig = config.try_deserialize()?;
        strindex_config.validate()?;

        Ok(strindex_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&StrindexConfig::default())?)
            .add_source(
                Environment::with_prefix("STRINDEX")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let strindex_config: StrindexConfig = config.try_deserialize()?;
        strindex_config.validate()?;

        Ok(strindex_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let backend = self.indexer.backend_kind()?;
        self.indexer.use_case_key()?;

        if backend != BackendKind::Mock
            && self
                .indexer
                .database_url
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "indexer.database_url is required when backend is '{}'",
                    self.indexer.backend
                ),
            });
        }

        let table_name = self.indexer.table_name_or_default();
        validate_identifier(&table_name).map_err(|e| ConfigLoadError::Invalid {
            message: format!("indexer.table_name: {e}"),
        })?;
        validate_identifier(&self.indexer.unique_index_name).map_err(|e| ConfigLoadError::Invalid {
            message: format!("indexer.unique_index_name: {e}"),
        })?;

        if self.indexer.pool_size == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "indexer.pool_size must be greater than 0".to_string(),
            });
        }
        if self.indexer.retention_days <= 0 {
            return Err(ConfigLoadError::Invalid {
                message: "indexer.retention_days must be greater than 0".to_string(),
            });
        }

        if self.cache.enabled && (self.cache.max_capacity == 0 || self.cache.ttl_secs == 0) {
            return Err(ConfigLoadError::Invalid {
                message: "cache.max_capacity and cache.ttl_secs must be greater than 0 when the cache is enabled"
                    .to_string(),
            });
        }

        for (section, quotas) in [
            ("writes_limiter.per_org", &self.writes_limiter.per_org),
            ("writes_limiter.global", &self.writes_limiter.global),
        ] {
            for (index, quota) in quotas.iter().enumerate() {
                quota.validate().map_err(|e| ConfigLoadError::Invalid {
                    message: format!("{section}[{index}]: {e}"),
                })?;
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }
}
