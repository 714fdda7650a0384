//! Row structs that map 1-to-1 onto the `jobs` table.
//!
//! These are *persistence* models — they carry no business logic. Retry and
//! backoff decisions live in the `queue` crate.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a job, stored as its lower-case string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }

    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Dead,
    ];
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "dead" => Ok(Self::Dead),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// A job row as persisted in (and read back from) SQLite.
///
/// Timestamps are stored as canonical RFC 3339 text (millisecond precision,
/// trailing `Z`) so lexicographic comparisons (`locked_at < cutoff`) stay
/// valid without parsing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub id: String,
    pub command: String,
    pub state: String,
    pub attempts: i64,
    pub max_retries: i64,
    pub base_backoff: f64,
    pub next_run_at: Option<String>,
    pub last_error: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub timeout_seconds: i64,
    pub priority: i64,
    pub last_output: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// Fields needed to insert a brand-new job row.
#[derive(Debug, Clone)]
pub struct NewJobRow {
    pub id: String,
    pub command: String,
    pub max_retries: i64,
    pub base_backoff: f64,
    pub next_run_at: Option<String>,
    pub timeout_seconds: i64,
    pub priority: i64,
    pub created_at: String,
}

/// A sparse set of column updates applied by `conditional_update`.
///
/// `None` means "leave this column unchanged"; nullable columns that must be
/// *cleared* use `Some(None)` (double `Option`), which is how "lock columns
/// absent outside `processing`" gets enforced on every write.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub state: Option<JobState>,
    pub attempts: Option<i64>,
    pub next_run_at: Option<Option<String>>,
    pub last_error: Option<Option<String>>,
    pub last_output: Option<Option<String>>,
    pub duration_seconds: Option<Option<f64>>,
    pub locked_by: Option<Option<String>>,
    pub locked_at: Option<Option<String>>,
    pub updated_at: String,
}

/// Aggregate job counts grouped by state, per `aggregate_counts`.
pub type StateCounts = std::collections::HashMap<JobState, i64>;
