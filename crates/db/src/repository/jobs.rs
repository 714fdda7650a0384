//! Job store repository functions.
//!
//! `insert`, `get`, `conditional_update`, `select_claim_candidate`,
//! `select_by_state`, `select_stuck`, `aggregate_counts`, plus the two
//! operations that must run as a single transaction end-to-end —
//! `claim_one` and `recover_stuck`.
//!
//! No retry/backoff/DLQ decisions are made here; callers (the `queue` crate)
//! pass already-decided column values in via [`JobUpdate`].

use std::time::Duration;

use rand::Rng;
use sqlx::SqlitePool;

use crate::error::is_busy;
use crate::models::{JobRow, JobState, JobUpdate, NewJobRow, StateCounts};
use crate::DbError;

const MAX_BUSY_RETRIES: u32 = 8;

/// Retry `f` while SQLite reports lock contention, with a small jittered
/// backoff, bounded by `MAX_BUSY_RETRIES`.
async fn retry_on_busy<T, F, Fut>(mut f: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if is_busy(&e) && attempt < MAX_BUSY_RETRIES => {
                let base_ms = 2u64.saturating_pow(attempt).min(100);
                let jitter_ms: u64 = rand::thread_rng().gen_range(0..=5);
                tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(DbError::Busy {
                    attempts: attempt + 1,
                    source,
                })
            }
        }
    }
}

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, base_backoff, \
     next_run_at, last_error, locked_by, locked_at, created_at, updated_at, \
     timeout_seconds, priority, last_output, duration_seconds";

/// Insert a brand-new `pending` job row.
pub async fn insert(pool: &SqlitePool, job: NewJobRow) -> Result<JobRow, DbError> {
    sqlx::query(
        "INSERT INTO jobs (id, command, state, attempts, max_retries, base_backoff, \
         next_run_at, last_error, locked_by, locked_at, created_at, updated_at, \
         timeout_seconds, priority, last_output, duration_seconds) \
         VALUES (?, ?, 'pending', 0, ?, ?, ?, NULL, NULL, NULL, ?, ?, ?, ?, NULL, NULL)",
    )
    .bind(&job.id)
    .bind(&job.command)
    .bind(job.max_retries)
    .bind(job.base_backoff)
    .bind(&job.next_run_at)
    .bind(&job.created_at)
    .bind(&job.created_at)
    .bind(job.timeout_seconds)
    .bind(job.priority)
    .execute(pool)
    .await?;

    get(pool, &job.id).await?.ok_or(DbError::NotFound)
}

/// Fetch a single job by id.
pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<JobRow>, DbError> {
    let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// The job a claim would pick right now, without locking it. Exposed
/// separately so tests can inspect scheduler ordering without mutating
/// state.
pub async fn select_claim_candidate(pool: &SqlitePool, now: &str) -> Result<Option<JobRow>, DbError> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs \
         WHERE state = 'pending' AND (next_run_at IS NULL OR next_run_at <= ?) \
         ORDER BY priority DESC, created_at ASC \
         LIMIT 1"
    ))
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Atomically select and lock the next eligible pending job for `worker_id`.
///
/// Runs as a single `BEGIN IMMEDIATE` transaction: select the candidate,
/// then conditionally update it `WHERE id = ? AND state = 'pending'`. If the
/// conditional update affects zero rows (lost the race to another worker)
/// this returns `Ok(None)`, handled silently by the caller.
pub async fn claim_one(
    pool: &SqlitePool,
    worker_id: &str,
    now: &str,
) -> Result<Option<JobRow>, DbError> {
    retry_on_busy(|| async {
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

        let candidate = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE state = 'pending' AND (next_run_at IS NULL OR next_run_at <= ?) \
             ORDER BY priority DESC, created_at ASC \
             LIMIT 1"
        ))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE jobs SET state = 'processing', locked_by = ?, locked_at = ?, updated_at = ? \
             WHERE id = ? AND state = 'pending'",
        )
        .bind(worker_id)
        .bind(now)
        .bind(now)
        .bind(&candidate.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Another worker claimed it between our select and our update.
            tx.commit().await?;
            return Ok(None);
        }

        tx.commit().await?;

        let mut claimed = candidate;
        claimed.state = JobState::Processing.to_string();
        claimed.locked_by = Some(worker_id.to_string());
        claimed.locked_at = Some(now.to_string());
        claimed.updated_at = now.to_string();
        Ok(Some(claimed))
    })
    .await
}

/// Conditional single-row update: only applies if the row's current state
/// equals `expected_state`. Returns the number of rows affected (0 or 1) so
/// callers can detect a lost race.
pub async fn conditional_update(
    pool: &SqlitePool,
    id: &str,
    expected_state: JobState,
    update: &JobUpdate,
) -> Result<u64, DbError> {
    let mut sets: Vec<&str> = Vec::new();
    if update.state.is_some() {
        sets.push("state = ?");
    }
    if update.attempts.is_some() {
        sets.push("attempts = ?");
    }
    if update.next_run_at.is_some() {
        sets.push("next_run_at = ?");
    }
    if update.last_error.is_some() {
        sets.push("last_error = ?");
    }
    if update.last_output.is_some() {
        sets.push("last_output = ?");
    }
    if update.duration_seconds.is_some() {
        sets.push("duration_seconds = ?");
    }
    if update.locked_by.is_some() {
        sets.push("locked_by = ?");
    }
    if update.locked_at.is_some() {
        sets.push("locked_at = ?");
    }
    sets.push("updated_at = ?");

    let sql = format!(
        "UPDATE jobs SET {} WHERE id = ? AND state = ?",
        sets.join(", ")
    );
    let mut query = sqlx::query(&sql);

    if let Some(state) = update.state {
        query = query.bind(state.to_string());
    }
    if let Some(attempts) = update.attempts {
        query = query.bind(attempts);
    }
    if let Some(ref next_run_at) = update.next_run_at {
        query = query.bind(next_run_at.clone());
    }
    if let Some(ref last_error) = update.last_error {
        query = query.bind(last_error.clone());
    }
    if let Some(ref last_output) = update.last_output {
        query = query.bind(last_output.clone());
    }
    if let Some(duration) = update.duration_seconds {
        query = query.bind(duration);
    }
    if let Some(ref locked_by) = update.locked_by {
        query = query.bind(locked_by.clone());
    }
    if let Some(ref locked_at) = update.locked_at {
        query = query.bind(locked_at.clone());
    }
    query = query.bind(update.updated_at.clone());
    query = query.bind(id).bind(expected_state.to_string());

    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

/// All jobs currently in `state`, oldest first.
pub async fn select_by_state(pool: &SqlitePool, state: JobState) -> Result<Vec<JobRow>, DbError> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ? ORDER BY created_at ASC"
    ))
    .bind(state.to_string())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Jobs whose lease (`locked_at`) predates `cutoff`, read-only (no lock).
pub async fn select_stuck(pool: &SqlitePool, cutoff: &str) -> Result<Vec<JobRow>, DbError> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs \
         WHERE state = 'processing' AND locked_at IS NOT NULL AND locked_at < ? \
         ORDER BY locked_at ASC"
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Recovery sweep: in one transaction, select every stale `processing` row
/// and return it to `pending`, clearing the lease. The selected set and the
/// updated set are guaranteed equal because both run inside the same
/// transaction — the Python source this was distilled from ran these as two
/// separate queries, which races against a worker finishing mid-sweep.
pub async fn recover_stuck(pool: &SqlitePool, cutoff: &str, now: &str) -> Result<Vec<String>, DbError> {
    retry_on_busy(|| async {
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

        let stuck = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE state = 'processing' AND locked_at IS NOT NULL AND locked_at < ?"
        ))
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        for row in &stuck {
            sqlx::query(
                "UPDATE jobs SET state = 'pending', locked_by = NULL, locked_at = NULL, \
                 updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(&row.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(stuck.into_iter().map(|r| r.id).collect())
    })
    .await
}

/// Count of jobs grouped by state. Every state is present in the result even
/// when its count is zero.
pub async fn aggregate_counts(pool: &SqlitePool) -> Result<StateCounts, DbError> {
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
        .fetch_all(pool)
        .await?;

    let mut counts = StateCounts::new();
    for (state, count) in rows {
        if let Ok(state) = state.parse::<JobState>() {
            counts.insert(state, count);
        }
    }
    for state in JobState::ALL {
        counts.entry(state).or_insert(0);
    }
    Ok(counts)
}
