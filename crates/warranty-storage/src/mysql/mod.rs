mod barcodes;
mod batches;

use jiff::Timestamp;
use sqlx::MySqlPool;
use warranty_core::{StorageError, StorageResult};

/// Table definitions, applied in order by [`MySqlStore::apply_schema`].
pub const SCHEMA: &[&str] = &[
    include_str!("../../ddl/mysql/warranty_barcodes.sql"),
    include_str!("../../ddl/mysql/warranty_barcode_events.sql"),
    include_str!("../../ddl/mysql/warranty_batches.sql"),
    include_str!("../../ddl/mysql/warranty_batch_collisions.sql"),
    include_str!("../../ddl/mysql/warranty_sequences.sql"),
];

/// MySQL implementation of the issuance repositories: barcodes with their
/// audit log, batches, collision records and number sequences.
///
/// Timestamps are stored as unix seconds. The unique index on the barcode
/// code is the source of truth for uniqueness; violations surface as
/// [`StorageError::Duplicate`] carrying the offending code.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Creates a store from an existing MySQL connection pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Creates a store by opening a new MySQL connection pool.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let pool = MySqlPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Creates any missing tables.
    pub async fn apply_schema(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

fn timestamp(seconds: i64, column: &str) -> StorageResult<Timestamp> {
    Timestamp::from_second(seconds).map_err(|e| {
        StorageError::InvalidData(format!("invalid {column} timestamp '{seconds}': {e}"))
    })
}

fn optional_timestamp(seconds: Option<i64>, column: &str) -> StorageResult<Option<Timestamp>> {
    seconds.map(|value| timestamp(value, column)).transpose()
}

fn invalid_column(column: &str, value: &str) -> StorageError {
    StorageError::InvalidData(format!("unexpected {column} value '{value}'"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

/// Pulls the key out of MySQL's `Duplicate entry '<key>' for key ...`.
fn duplicate_entry(err: &sqlx::Error) -> Option<String> {
    let message = err.as_database_error()?.message().to_string();
    let rest = message.split_once("Duplicate entry '")?.1;
    let (key, _) = rest.split_once('\'')?;
    Some(key.to_string())
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

/// Maps a write error, turning unique violations into `Duplicate`.
fn map_write_error(err: sqlx::Error, fallback_key: &str) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::Duplicate(duplicate_entry(&err).unwrap_or_else(|| fallback_key.to_string()))
    } else {
        map_sqlx_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeouts_are_transient() {
        let mapped = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(mapped, StorageError::Timeout(_)));
        assert!(mapped.is_transient());
    }

    #[test]
    fn decode_failures_are_invalid_data() {
        let mapped = map_sqlx_error(sqlx::Error::RowNotFound);
        assert!(matches!(mapped, StorageError::InvalidData(_)));
    }

    #[test]
    fn timestamps_round_trip_through_seconds() {
        let ts = timestamp(1_704_844_800, "activated_at").unwrap();
        assert_eq!(ts.to_string(), "2024-01-10T00:00:00Z");
        assert_eq!(optional_timestamp(None, "expires_at").unwrap(), None);
    }
}
