//! Worker run loop.
//!
//! Polls the queue for claimable work, runs it through the executor, and
//! writes the outcome back. Honors a stop-flag file so an operator can ask
//! a worker to drain and exit without killing it mid-job.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, instrument, warn};

use queue::job::new_job_id;
use queue::{Clock, JobQueue, SystemClock};

use crate::executor;
use crate::EngineError;

const COOPERATIVE_QUANTUM: Duration = Duration::from_millis(200);

/// Tuning knobs for a [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep after an empty claim before polling again.
    pub poll_interval: Duration,
    /// Directory the stop-flag file (`stop.flag`) is read from and cleared
    /// in at startup.
    pub working_dir: PathBuf,
    /// `stale_after` passed to the recovery sweep run once at startup.
    pub recovery_stale_after_seconds: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            working_dir: PathBuf::from("."),
            recovery_stale_after_seconds: 60,
        }
    }
}

/// A single worker: a stable `worker_id` plus a queue handle and its own
/// config. Workers do not talk to each other — all coordination runs
/// through the store.
pub struct Worker<C: Clock = SystemClock> {
    worker_id: String,
    queue: JobQueue<C>,
    config: WorkerConfig,
}

impl Worker<SystemClock> {
    pub fn new(queue: JobQueue<SystemClock>, config: WorkerConfig) -> Self {
        Self {
            worker_id: new_job_id(),
            queue,
            config,
        }
    }
}

impl<C: Clock> Worker<C> {
    pub fn with_clock(queue: JobQueue<C>, config: WorkerConfig) -> Self {
        Self {
            worker_id: new_job_id(),
            queue,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn stop_flag_path(&self) -> PathBuf {
        self.config.working_dir.join("stop.flag")
    }

    fn stop_requested(&self) -> Result<bool, EngineError> {
        let path = self.stop_flag_path();
        match path.try_exists() {
            Ok(exists) => Ok(exists),
            Err(source) => Err(EngineError::StopFlag {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// One-time startup work: clear any stale stop-flag and run the
    /// recovery sweep so crashed workers' leases don't strand jobs forever.
    #[instrument(skip(self))]
    pub async fn startup(&self) -> Result<(), EngineError> {
        let path = self.stop_flag_path();
        if path.exists() {
            std::fs::remove_file(&path).map_err(|source| EngineError::StopFlag {
                path: path.display().to_string(),
                source,
            })?;
        }
        let recovered = self
            .queue
            .recover_stuck(self.config.recovery_stale_after_seconds)
            .await?;
        if !recovered.is_empty() {
            info!(worker_id = %self.worker_id, count = recovered.len(), "recovered stuck jobs at startup");
        }
        Ok(())
    }

    /// Run the poll/execute/write loop until the stop-flag appears.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn run(&self) -> Result<(), EngineError> {
        loop {
            if self.stop_requested()? {
                info!(worker_id = %self.worker_id, "stop flag present, exiting");
                return Ok(());
            }

            let job = match self.queue.claim_one(&self.worker_id).await? {
                Some(job) => job,
                None => {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            info!(worker_id = %self.worker_id, job_id = %job.id, command = %job.command, "claimed job");

            let timeout = Duration::from_secs(job.timeout_seconds.max(0) as u64);
            let outcome = executor::run(&job.command, timeout).await;
            let output = outcome.combined_output();

            if outcome.succeeded() {
                self.queue
                    .write_success(&job, &output, outcome.duration.as_secs_f64())
                    .await?;
            } else {
                warn!(worker_id = %self.worker_id, job_id = %job.id, exit_code = outcome.exit_code, "job failed");
                self.queue
                    .write_failure(&job, &output, outcome.duration.as_secs_f64())
                    .await?;
            }

            tokio::time::sleep(COOPERATIVE_QUANTUM).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::pool::{create_pool, run_migrations};
    use db::repository::config;
    use queue::EnqueueRequest;
    use tempfile::tempdir;

    async fn test_worker(dir: &std::path::Path) -> Worker<SystemClock> {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        config::init_defaults(&pool).await.unwrap();
        let queue = JobQueue::new(pool);
        Worker::new(
            queue,
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                working_dir: dir.to_path_buf(),
                recovery_stale_after_seconds: 60,
            },
        )
    }

    #[tokio::test]
    async fn run_exits_immediately_when_stop_flag_present() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("stop.flag"), "").unwrap();
        let worker = test_worker(dir.path()).await;

        worker.run().await.unwrap();
    }

    #[tokio::test]
    async fn startup_clears_stop_flag_and_recovers_stuck_jobs() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("stop.flag"), "").unwrap();
        let worker = test_worker(dir.path()).await;

        worker
            .queue
            .enqueue(EnqueueRequest {
                command: "sleep 100".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        worker.queue.claim_one(worker.worker_id()).await.unwrap();

        worker.startup().await.unwrap();

        assert!(!dir.path().join("stop.flag").exists());
    }

    #[tokio::test]
    async fn run_claims_and_completes_a_job_then_stops() {
        let dir = tempdir().unwrap();
        let worker = test_worker(dir.path()).await;

        worker
            .queue
            .enqueue(EnqueueRequest {
                command: "echo hi".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let stop_path = dir.path().join("stop.flag");
        let stop_path_clone = stop_path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            std::fs::write(stop_path_clone, "").unwrap();
        });

        worker.run().await.unwrap();

        let completed = worker
            .queue
            .list_by_state(db::models::JobState::Completed)
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        let _ = stop_path;
    }
}
