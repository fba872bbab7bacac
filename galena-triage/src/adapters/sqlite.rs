//! Shared read-only SQLite access for adapters.
//!
//! Artifact databases come out of seized-device backups: journal files
//! are absent, schemas vary by OS version, and TEXT columns sometimes
//! hold raw bytes. Connections are opened read-only and immutable so a
//! missing WAL can never trigger a write attempt against evidence.

use super::AdapterError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Open a staged artifact database read-only.
pub async fn open_readonly(path: &Path) -> Result<SqlitePool, AdapterError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .immutable(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| AdapterError::Open(format!("{}: {e}", path.display())))
}

/// Whether a table exists; used to tell "wrong schema version" apart
/// from "empty database" before querying.
pub async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool, AdapterError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Require a table, mapping absence to a source-level error.
pub async fn require_table(pool: &SqlitePool, table: &str) -> Result<(), AdapterError> {
    if table_exists(pool, table).await? {
        Ok(())
    } else {
        Err(AdapterError::Format(format!("table '{table}' not present")))
    }
}

/// Text column that may physically be TEXT or BLOB (CallHistory's
/// ZADDRESS is the canonical offender). BLOB bytes decode lossily.
pub fn text_value(row: &SqliteRow, column: &str) -> Option<String> {
    if let Ok(value) = row.try_get::<Option<String>, _>(column) {
        return value;
    }
    row.try_get::<Option<Vec<u8>>, _>(column)
        .ok()
        .flatten()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Integer column that may physically be INTEGER or REAL.
pub fn int_value(row: &SqliteRow, column: &str) -> Option<i64> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(column) {
        return value;
    }
    row.try_get::<Option<f64>, _>(column)
        .ok()
        .flatten()
        .map(|v| v as i64)
}

/// Real column that may physically be REAL or INTEGER (Core Data date
/// columns flip between the two across OS versions).
pub fn real_value(row: &SqliteRow, column: &str) -> Option<f64> {
    if let Ok(value) = row.try_get::<Option<f64>, _>(column) {
        return value;
    }
    row.try_get::<Option<i64>, _>(column)
        .ok()
        .flatten()
        .map(|v| v as f64)
}
