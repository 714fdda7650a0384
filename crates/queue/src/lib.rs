//! `queue` crate — the job-lifecycle engine.
//!
//! Wraps the `db` crate's pure store primitives with the domain rules:
//! enqueue defaults, the claim protocol, the outcome writer's
//! retry/backoff/DLQ decisions, the recovery sweep, and DLQ re-arm. No I/O
//! beyond the store lives here — process execution belongs to the `engine`
//! crate.

pub mod clock;
pub mod error;
pub mod job;

use std::collections::HashMap;

use chrono::Duration;
use db::models::{JobState, JobUpdate, NewJobRow};
use db::repository::{config, jobs};
use db::DbPool;
use tracing::{info, instrument, warn};

pub use clock::{Clock, SystemClock};
pub use error::QueueError;
pub use job::{Job, JobId};

/// Output is truncated to this many bytes before being persisted.
const MAX_OUTPUT_BYTES: usize = 5_000;

const LAST_ERROR_MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";
const LAST_ERROR_JOB_FAILED: &str = "Job failed";

/// Parameters accepted by [`JobQueue::enqueue`]. `next_run_at` and `delay`
/// are mutually exclusive.
#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest {
    pub command: String,
    pub timeout_seconds: Option<i64>,
    pub priority: Option<i64>,
    pub next_run_at: Option<String>,
    pub delay_seconds: Option<i64>,
}

/// The job-lifecycle engine's control surface.
pub struct JobQueue<C: Clock = SystemClock> {
    pool: DbPool,
    clock: C,
}

impl JobQueue<SystemClock> {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            clock: SystemClock,
        }
    }
}

impl<C: Clock> JobQueue<C> {
    pub fn with_clock(pool: DbPool, clock: C) -> Self {
        Self { pool, clock }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Create schema if absent and seed config defaults. Safe to call on
    /// every startup.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), QueueError> {
        db::pool::run_migrations(&self.pool).await?;
        config::init_defaults(&self.pool).await?;
        Ok(())
    }

    /// Enqueue a new job, defaulting `max_retries`/`base_backoff` from the
    /// config store.
    #[instrument(skip(self, req), fields(command = %req.command))]
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<JobId, QueueError> {
        if req.command.trim().is_empty() {
            return Err(QueueError::InvalidArgs("command must not be empty".into()));
        }
        if req.next_run_at.is_some() && req.delay_seconds.is_some() {
            return Err(QueueError::InvalidArgs(
                "next_run_at and delay are mutually exclusive".into(),
            ));
        }

        let now = self.clock.now();
        let now_iso = clock::format_iso(now);

        let next_run_at = if let Some(explicit) = req.next_run_at {
            let parsed = clock::parse_iso(&explicit)
                .map_err(|e| QueueError::InvalidTime(format!("{explicit}: {e}")))?;
            Some(clock::format_iso(parsed))
        } else if let Some(delay) = req.delay_seconds {
            Some(clock::format_iso(now + Duration::seconds(delay)))
        } else {
            None
        };

        let max_retries = self.config_i64("max_retries", 3).await?;
        let base_backoff = self.config_f64("base_backoff", 2.0).await?;

        let new_row = NewJobRow {
            id: job::new_job_id(),
            command: req.command,
            max_retries,
            base_backoff,
            next_run_at,
            timeout_seconds: req.timeout_seconds.unwrap_or(30),
            priority: req.priority.unwrap_or(0),
            created_at: now_iso,
        };

        let inserted = jobs::insert(&self.pool, new_row).await?;
        info!(job_id = %inserted.id, "enqueued job");
        Ok(inserted.id)
    }

    /// Atomically claim the next eligible pending job for `worker_id`.
    #[instrument(skip(self))]
    pub async fn claim_one(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let now = self.clock.now_iso();
        let claimed = jobs::claim_one(&self.pool, worker_id, &now).await?;
        Ok(claimed.map(Job::from))
    }

    /// Record a successful execution: `processing -> completed`.
    #[instrument(skip(self, output), fields(job_id = %job.id))]
    pub async fn write_success(
        &self,
        job: &Job,
        output: &str,
        duration_seconds: f64,
    ) -> Result<(), QueueError> {
        let now = self.clock.now_iso();
        let update = JobUpdate {
            state: Some(JobState::Completed),
            last_output: Some(Some(truncate_output(output))),
            duration_seconds: Some(Some(duration_seconds)),
            locked_by: Some(None),
            locked_at: Some(None),
            updated_at: now,
            ..Default::default()
        };
        let affected =
            jobs::conditional_update(&self.pool, &job.id, JobState::Processing, &update).await?;
        if affected == 0 {
            warn!(job_id = %job.id, "write_success found job no longer processing");
        }
        Ok(())
    }

    /// Record a failed execution: either `processing -> pending` (with
    /// backoff) or `processing -> dead`.
    #[instrument(skip(self, output), fields(job_id = %job.id))]
    pub async fn write_failure(
        &self,
        job: &Job,
        output: &str,
        duration_seconds: f64,
    ) -> Result<(), QueueError> {
        let now_dt = self.clock.now();
        let now = clock::format_iso(now_dt);
        let attempts_next = job.attempts + 1;

        let update = if attempts_next > job.max_retries {
            JobUpdate {
                state: Some(JobState::Dead),
                attempts: Some(attempts_next),
                last_error: Some(Some(LAST_ERROR_MAX_RETRIES_EXCEEDED.to_string())),
                last_output: Some(Some(truncate_output(output))),
                duration_seconds: Some(Some(duration_seconds)),
                locked_by: Some(None),
                locked_at: Some(None),
                updated_at: now,
                ..Default::default()
            }
        } else {
            let delay = job.base_backoff.powi(attempts_next as i32);
            let next_run_at = clock::format_iso(now_dt + duration_from_secs_f64(delay));
            JobUpdate {
                state: Some(JobState::Pending),
                attempts: Some(attempts_next),
                next_run_at: Some(Some(next_run_at)),
                last_error: Some(Some(LAST_ERROR_JOB_FAILED.to_string())),
                last_output: Some(Some(truncate_output(output))),
                duration_seconds: Some(Some(duration_seconds)),
                locked_by: Some(None),
                locked_at: Some(None),
                updated_at: now,
                ..Default::default()
            }
        };

        let affected =
            jobs::conditional_update(&self.pool, &job.id, JobState::Processing, &update).await?;
        if affected == 0 {
            warn!(job_id = %job.id, "write_failure found job no longer processing");
        }
        Ok(())
    }

    /// Return stale-leased `processing` rows to `pending` without
    /// incrementing `attempts`.
    #[instrument(skip(self))]
    pub async fn recover_stuck(&self, stale_after_seconds: i64) -> Result<Vec<JobId>, QueueError> {
        let now = self.clock.now();
        let cutoff = clock::format_iso(now - Duration::seconds(stale_after_seconds));
        let now_iso = clock::format_iso(now);
        let recovered = jobs::recover_stuck(&self.pool, &cutoff, &now_iso).await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered stuck jobs");
        }
        Ok(recovered)
    }

    /// Re-arm a dead job back to pending. Returns whether a row was
    /// affected.
    #[instrument(skip(self))]
    pub async fn retry_dead(&self, job_id: &str) -> Result<bool, QueueError> {
        let now = self.clock.now_iso();
        let update = JobUpdate {
            state: Some(JobState::Pending),
            attempts: Some(0),
            next_run_at: Some(None),
            last_error: Some(None),
            updated_at: now,
            ..Default::default()
        };
        let affected = jobs::conditional_update(&self.pool, job_id, JobState::Dead, &update).await?;
        Ok(affected > 0)
    }

    pub async fn get_counts(&self) -> Result<HashMap<JobState, i64>, QueueError> {
        Ok(jobs::aggregate_counts(&self.pool).await?)
    }

    pub async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, QueueError> {
        let rows = jobs::select_by_state(&self.pool, state).await?;
        Ok(rows.into_iter().map(Job::from).collect())
    }

    pub async fn list_dead(&self) -> Result<Vec<Job>, QueueError> {
        self.list_by_state(JobState::Dead).await
    }

    /// Set a config key/value pair, e.g. `max_retries` or `base_backoff`.
    /// Takes effect on the next `enqueue` call.
    #[instrument(skip(self))]
    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), QueueError> {
        config::set_value(&self.pool, key, value).await?;
        Ok(())
    }

    async fn config_i64(&self, key: &str, default: i64) -> Result<i64, QueueError> {
        Ok(config::get_value(&self.pool, key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    async fn config_f64(&self, key: &str, default: f64) -> Result<f64, QueueError> {
        Ok(config::get_value(&self.pool, key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }
}

/// Truncate to at most [`MAX_OUTPUT_BYTES`] bytes, never splitting a UTF-8
/// character.
fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_OUTPUT_BYTES {
        return output.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    output[..end].to_string()
}

fn duration_from_secs_f64(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}
