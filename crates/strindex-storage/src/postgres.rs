//! PostgreSQL relational storage implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};
use crate::query::{execute_with_timeout_and_metrics, row_to_string_row, split_keys};
use crate::traits::{
    organization_id_to_i64, validate_identifier, NewStringRow, OrgStringKey,
    RelationalStringStore, StringRow,
};

const BACKEND: &str = "postgres";

/// Default query timeout in seconds.
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Default relational table name.
pub const DEFAULT_RELATIONAL_TABLE: &str = "sentry_stringindexer";

/// PostgreSQL configuration options.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Table holding the string rows.
    pub table_name: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    pub min_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Maximum time to wait for a query before returning `StorageError::QueryTimeout`.
    pub query_timeout_secs: u64,
}

// Custom Debug implementation to hide credentials in database_url
impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("table_name", &self.table_name)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/strindex".to_string(),
            table_name: DEFAULT_RELATIONAL_TABLE.to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
        }
    }
}

/// PostgreSQL implementation of RelationalStringStore.
pub struct PostgresStringStore {
    pool: PgPool,
    table_name: String,
    query_timeout: std::time::Duration,
}

impl PostgresStringStore {
    /// Creates a store from an existing pool.
    pub fn new(pool: PgPool, table_name: impl Into<String>) -> StorageResult<Self> {
        let table_name = table_name.into();
        validate_identifier(&table_name)?;
        Ok(Self {
            pool,
            table_name,
            query_timeout: std::time::Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        })
    }

    /// Creates a new PostgreSQL store with the given configuration.
    #[instrument(skip(config))]
    pub async fn from_config(config: &PostgresConfig) -> StorageResult<Self> {
        validate_identifier(&config.table_name)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?;

        Ok(Self {
            pool,
            table_name: config.table_name.clone(),
            query_timeout: std::time::Duration::from_secs(config.query_timeout_secs),
        })
    }

    /// Runs database migrations to create the string table.
    #[instrument(skip(self), fields(table = %self.table_name))]
    pub async fn run_migrations(&self) -> StorageResult<()> {
        debug!("Running database migrations");

        let table = &self.table_name;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                organization_id BIGINT NOT NULL,
                string TEXT NOT NULL,
                date_added TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                last_seen TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                retention_days INTEGER NOT NULL DEFAULT 90,
                CONSTRAINT {table}_unique_org_string UNIQUE (organization_id, string)
            )
            "#
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError {
            message: format!("Failed to create {table} table: {e}"),
        })?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Returns the connection pool for testing or advanced usage.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RelationalStringStore for PostgresStringStore {
    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    async fn read_rows(&self, keys: &[OrgStringKey]) -> StorageResult<Vec<StringRow>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let (org_ids, strings) = split_keys(keys)?;
        let sql = format!(
            r#"
            SELECT t.id, t.organization_id, t.string, t.date_added, t.last_seen, t.retention_days
            FROM {} t
            JOIN UNNEST($1::int8[], $2::text[]) AS k(organization_id, string)
              ON t.organization_id = k.organization_id AND t.string = k.string
            "#,
            self.table_name
        );

        let rows = execute_with_timeout_and_metrics(BACKEND, "read_rows", self.query_timeout, async {
            sqlx::query(&sql)
                .bind(&org_ids)
                .bind(&strings)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to read rows: {e}"),
                })
        })
        .await?;

        rows.iter().map(row_to_string_row).collect()
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn insert_rows_ignore_conflicts(&self, rows: &[NewStringRow]) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut org_ids = Vec::with_capacity(rows.len());
        let mut strings = Vec::with_capacity(rows.len());
        let mut retention = Vec::with_capacity(rows.len());
        for row in rows {
            org_ids.push(organization_id_to_i64(row.organization_id)?);
            strings.push(row.string.as_str());
            retention.push(row.retention_days);
        }
        let now = Utc::now();
        let sql = format!(
            r#"
            INSERT INTO {} (organization_id, string, date_added, last_seen, retention_days)
            SELECT k.organization_id, k.string, $4, $4, k.retention_days
            FROM UNNEST($1::int8[], $2::text[], $3::int4[]) AS k(organization_id, string, retention_days)
            ON CONFLICT DO NOTHING
            "#,
            self.table_name
        );

        let result = execute_with_timeout_and_metrics(
            BACKEND,
            "insert_rows_ignore_conflicts",
            self.query_timeout,
            async {
                sqlx::query(&sql)
                    .bind(&org_ids)
                    .bind(&strings)
                    .bind(&retention)
                    .bind(now)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::QueryError {
                        message: format!("Failed to insert rows: {e}"),
                    })
            },
        )
        .await?;

        debug!(
            attempted = rows.len(),
            inserted = result.rows_affected(),
            "bulk insert finished"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_row_by_id(&self, id: i64) -> StorageResult<Option<StringRow>> {
        let sql = format!(
            "SELECT id, organization_id, string, date_added, last_seen, retention_days FROM {} WHERE id = $1",
            self.table_name
        );
        let row = execute_with_timeout_and_metrics(BACKEND, "read_row_by_id", self.query_timeout, async {
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to read row by id: {e}"),
                })
        })
        .await?;

        row.as_ref().map(row_to_string_row).transpose()
    }

    async fn health_check(&self) -> StorageResult<()> {
        execute_with_timeout_and_metrics(BACKEND, "health_check", self.query_timeout, async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| StorageError::ConnectionError {
                    message: format!("Health check failed: {e}"),
                })
        })
        .await
    }
}
