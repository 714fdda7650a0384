//! Key/value config store.
//!
//! Mirrors the original source's config table: a handful of string-encoded
//! defaults (`max_retries`, `base_backoff`, `default_timeout`,
//! `poll_interval`, `priority_default`) seeded once at `init` and readable
//! by anything that needs them (the CLI's `enqueue` command uses these as
//! its defaults when the caller doesn't override them).

use sqlx::SqlitePool;

use crate::DbError;

/// `(key, value)` pairs seeded on first run. Values are stored as text and
/// parsed by the caller.
const DEFAULTS: &[(&str, &str)] = &[
    ("max_retries", "3"),
    ("base_backoff", "2"),
    ("default_timeout", "30"),
    ("poll_interval", "1"),
    ("priority_default", "0"),
];

/// Seed default config values. Existing keys are left untouched, so this is
/// safe to call on every startup.
pub async fn init_defaults(pool: &SqlitePool) -> Result<(), DbError> {
    for (key, value) in DEFAULTS {
        sqlx::query("INSERT OR IGNORE INTO config (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Read a single config value by key.
pub async fn get_value(pool: &SqlitePool, key: &str) -> Result<Option<String>, DbError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v))
}

/// Upsert a config value.
pub async fn set_value(pool: &SqlitePool, key: &str, value: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO config (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, run_migrations};

    async fn test_pool() -> SqlitePool {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn init_defaults_seeds_all_keys_once() {
        let pool = test_pool().await;
        init_defaults(&pool).await.unwrap();
        assert_eq!(get_value(&pool, "max_retries").await.unwrap().as_deref(), Some("3"));

        set_value(&pool, "max_retries", "5").await.unwrap();
        init_defaults(&pool).await.unwrap();
        assert_eq!(get_value(&pool, "max_retries").await.unwrap().as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn set_value_upserts() {
        let pool = test_pool().await;
        set_value(&pool, "poll_interval", "2").await.unwrap();
        assert_eq!(get_value(&pool, "poll_interval").await.unwrap().as_deref(), Some("2"));
        set_value(&pool, "poll_interval", "4").await.unwrap();
        assert_eq!(get_value(&pool, "poll_interval").await.unwrap().as_deref(), Some("4"));
    }
}
