//! SQLite connection pool.
//!
//! The store backs onto a single SQLite file in WAL mode. WAL lets readers
//! run concurrently with the one writer a claim transaction needs, and
//! `BEGIN IMMEDIATE` (used by the claim query) gives us the serializing
//! semantics an atomic claim protocol requires without a database server.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::DbError;

/// Type alias for the shared SQLite pool used across the whole application.
pub type DbPool = SqlitePool;

/// Create a new connection pool from the given `database_url`
/// (e.g. `sqlite:queue.db?mode=rwc` or `sqlite::memory:` for tests).
///
/// `max_connections` controls the pool ceiling.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    info!("Connecting to database (max_connections={})", max_connections);

    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(5_000))
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(connect_options)
        .await?;

    Ok(pool)
}

/// Run embedded SQLx migrations located in `./migrations` (relative to this
/// crate's `Cargo.toml`). Re-running against an already-migrated database is
/// a no-op — sqlx tracks applied versions in its own bookkeeping table.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
