//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("store busy after {attempts} attempts: {source}")]
    Busy {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },
}

/// True if `err` is SQLite reporting lock contention (`SQLITE_BUSY` /
/// `SQLITE_LOCKED`), the only condition the claim transaction retries.
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code == "5" || code == "6"; // SQLITE_BUSY, SQLITE_LOCKED
        }
    }
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}
