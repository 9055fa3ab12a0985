//! Helpers shared by the SQL backends.

use std::future::Future;
use std::time::{Duration, Instant};

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::error::{StorageError, StorageResult};
use crate::traits::{organization_id_from_i64, StringRow};

/// SQLSTATE for `unique_violation`.
pub(crate) const UNIQUE_VIOLATION_CODE: &str = "23505";

/// Wraps an async operation with a timeout and records metrics.
///
/// If the operation exceeds `timeout`, returns `StorageError::QueryTimeout`.
///
/// # Metrics
/// - `strindex_storage_query_duration_seconds` - Histogram of query durations
/// - `strindex_storage_query_timeout_total` - Counter of timeout events
pub(crate) async fn execute_with_timeout_and_metrics<T, F>(
    backend: &'static str,
    operation: &'static str,
    timeout: Duration,
    future: F,
) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    let start = Instant::now();
    let result = tokio::time::timeout(timeout, future).await;
    let duration = start.elapsed().as_secs_f64();

    let (status, final_result) = match result {
        Ok(Ok(value)) => ("success", Ok(value)),
        Ok(Err(e)) => ("error", Err(e)),
        Err(_elapsed) => (
            "timeout",
            Err(StorageError::QueryTimeout {
                operation: operation.to_string(),
                timeout,
            }),
        ),
    };

    metrics::histogram!(
        "strindex_storage_query_duration_seconds",
        "operation" => operation,
        "backend" => backend,
        "status" => status
    )
    .record(duration);

    if status == "timeout" {
        metrics::counter!(
            "strindex_storage_query_timeout_total",
            "operation" => operation,
            "backend" => backend
        )
        .increment(1);
    }

    final_result
}

/// Parses a database row into a StringRow.
pub(crate) fn row_to_string_row(row: &PgRow) -> StorageResult<StringRow> {
    let organization_id: i64 = row.try_get("organization_id").map_err(query_error)?;
    Ok(StringRow {
        id: row.try_get("id").map_err(query_error)?,
        organization_id: organization_id_from_i64(organization_id)?,
        string: row.try_get("string").map_err(query_error)?,
        date_added: row.try_get("date_added").map_err(query_error)?,
        last_seen: row.try_get("last_seen").map_err(query_error)?,
        retention_days: row.try_get("retention_days").map_err(query_error)?,
    })
}

fn query_error(e: sqlx::Error) -> StorageError {
    StorageError::QueryError {
        message: format!("Failed to decode row: {e}"),
    }
}

/// Splits keys into the parallel arrays bound to an `UNNEST` clause.
pub(crate) fn split_keys(keys: &[(u64, String)]) -> StorageResult<(Vec<i64>, Vec<&str>)> {
    let mut org_ids = Vec::with_capacity(keys.len());
    let mut strings = Vec::with_capacity(keys.len());
    for (organization_id, string) in keys {
        org_ids.push(crate::traits::organization_id_to_i64(*organization_id)?);
        strings.push(string.as_str());
    }
    Ok((org_ids, strings))
}

/// Returns true when the error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION_CODE),
        _ => false,
    }
}
