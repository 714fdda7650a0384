//! Domain-level job type.
//!
//! [`db::models::JobRow`] is the persistence shape (plain strings, nullable
//! columns); [`Job`] is what callers of the queue actually want to hold —
//! a typed state, parsed timestamps left as canonical strings (they're
//! already comparable and round-trip losslessly, so there's no value in
//! parsing them back into `DateTime` for storage).

use db::models::{JobRow, JobState};

/// Opaque job identifier — an 8-hex-character id, matching the original
/// source's `uuid.uuid4().hex[:8]` convention.
pub type JobId = String;

/// A job as seen by queue callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    pub attempts: i64,
    pub max_retries: i64,
    pub base_backoff: f64,
    pub next_run_at: Option<String>,
    pub last_error: Option<String>,
    pub last_output: Option<String>,
    pub duration_seconds: Option<f64>,
    pub timeout_seconds: i64,
    pub priority: i64,
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let state = row
            .state
            .parse::<JobState>()
            .unwrap_or(JobState::Pending);
        Job {
            id: row.id,
            command: row.command,
            state,
            attempts: row.attempts,
            max_retries: row.max_retries,
            base_backoff: row.base_backoff,
            next_run_at: row.next_run_at,
            last_error: row.last_error,
            last_output: row.last_output,
            duration_seconds: row.duration_seconds,
            timeout_seconds: row.timeout_seconds,
            priority: row.priority,
            locked_by: row.locked_by,
            locked_at: row.locked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Generate a fresh job id: 8 lowercase hex characters, mirroring the
/// original source's `uuid.uuid4().hex[:8]`.
pub fn new_job_id() -> JobId {
    let full = uuid::Uuid::new_v4().simple().to_string();
    full[..8].to_string()
}
