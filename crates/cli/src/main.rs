//! `jobq` CLI entry-point — a thin pass-through onto the `queue` and
//! `engine` crates.
//!
//! Available sub-commands:
//! - `init`    — create schema if absent, seed config defaults.
//! - `enqueue` — submit a shell command.
//! - `worker`  — run the poll/execute/write loop until the stop-flag appears.
//! - `retry`   — re-arm a dead job.
//! - `counts`  — print job counts by state.
//! - `list`    — print jobs in a given state.
//! - `config`  — set a config key (`max_retries`, `base_backoff`, ...).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use engine::{Worker, WorkerConfig};
use queue::{EnqueueRequest, JobQueue};

#[derive(Parser)]
#[command(name = "jobq", about = "Durable background job queue for shell commands", version)]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, env = "JOBQ_DATABASE_URL", default_value = "sqlite:jobq.db?mode=rwc")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create schema if absent and seed config defaults.
    Init,
    /// Submit a shell command to the queue.
    Enqueue {
        /// The shell command to run.
        command: String,
        /// Per-execution hard timeout, in seconds.
        #[arg(long)]
        timeout: Option<i64>,
        /// Scheduling priority; higher runs first.
        #[arg(long)]
        priority: Option<i64>,
        /// Absolute UTC RFC 3339 time before which the job is not eligible.
        #[arg(long, conflicts_with = "delay")]
        at: Option<String>,
        /// Delay, in seconds, before the job becomes eligible.
        #[arg(long, conflicts_with = "at")]
        delay: Option<i64>,
    },
    /// Run the worker loop: claim, execute, write outcome, repeat.
    Worker {
        /// Seconds to sleep after an empty claim before polling again.
        #[arg(long, default_value_t = 1)]
        poll_interval: u64,
        /// Directory the stop-flag file (`stop.flag`) lives in.
        #[arg(long, default_value = ".")]
        working_dir: PathBuf,
        /// `stale_after` passed to the startup recovery sweep.
        #[arg(long, default_value_t = 60)]
        recovery_stale_after: i64,
    },
    /// Re-arm a dead job back to pending.
    Retry {
        job_id: String,
    },
    /// Print job counts by state.
    Counts,
    /// Print jobs currently in the given state.
    List {
        /// One of: pending, processing, completed, dead.
        state: String,
    },
    /// Set a config key (e.g. `max_retries`, `base_backoff`), effective on
    /// the next enqueue.
    Config {
        key: String,
        value: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let pool = db::pool::create_pool(&cli.database_url, 5)
        .await
        .expect("failed to open database");
    let queue = JobQueue::new(pool);

    match cli.command {
        Command::Init => {
            queue.init().await.expect("init failed");
            info!("schema ready");
        }
        Command::Enqueue {
            command,
            timeout,
            priority,
            at,
            delay,
        } => {
            let id = queue
                .enqueue(EnqueueRequest {
                    command,
                    timeout_seconds: timeout,
                    priority,
                    next_run_at: at,
                    delay_seconds: delay,
                })
                .await
                .unwrap_or_else(|e| {
                    eprintln!("enqueue failed: {e}");
                    std::process::exit(1);
                });
            println!("{id}");
        }
        Command::Worker {
            poll_interval,
            working_dir,
            recovery_stale_after,
        } => {
            let worker = Worker::new(
                queue,
                WorkerConfig {
                    poll_interval: Duration::from_secs(poll_interval),
                    working_dir,
                    recovery_stale_after_seconds: recovery_stale_after,
                },
            );
            info!(worker_id = %worker.worker_id(), "starting worker");
            worker.startup().await.expect("worker startup failed");
            worker.run().await.expect("worker loop failed");
        }
        Command::Retry { job_id } => {
            let affected = queue.retry_dead(&job_id).await.expect("retry failed");
            if affected {
                println!("re-armed {job_id}");
            } else {
                eprintln!("no dead job with id {job_id}");
                std::process::exit(1);
            }
        }
        Command::Counts => {
            let counts = queue.get_counts().await.expect("get_counts failed");
            for state in db::models::JobState::ALL {
                println!("{state}: {}", counts.get(&state).copied().unwrap_or(0));
            }
        }
        Command::List { state } => {
            let state: db::models::JobState = state.parse().unwrap_or_else(|e| {
                eprintln!("{e}");
                std::process::exit(1);
            });
            let jobs = queue.list_by_state(state).await.expect("list failed");
            for job in jobs {
                println!(
                    "{}\t{}\tattempts={}\tpriority={}\t{}",
                    job.id, job.state, job.attempts, job.priority, job.command
                );
            }
        }
        Command::Config { key, value } => {
            queue.set_config(&key, &value).await.expect("config set failed");
            info!(%key, %value, "config updated");
        }
    }
}
