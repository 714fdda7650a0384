//! Shell command executor.
//!
//! Runs a job's `command` through the platform shell under a hard
//! wall-clock timeout, classifying the result uniformly:
//! a timeout or spawn failure never becomes a `Result::Err` here — it's
//! folded into the same `(exit_code, stdout, stderr)` shape a normal exit
//! produces, so the outcome writer has one code path to persist from.

use std::process::Stdio;
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use tracing::{instrument, warn};

/// The classified result of running a command to completion (or to its
/// timeout, or to a spawn failure).
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecutionOutcome {
    /// `stdout` then `stderr`, concatenated — the shape the outcome writer
    /// truncates and persists as `last_output`.
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

const TIMEOUT_EXIT_CODE: i32 = 124;
const SPAWN_FAILURE_EXIT_CODE: i32 = 1;

/// Run `command` under the platform shell, killing it (and its whole
/// process group) if it runs past `timeout`.
#[instrument(skip(command))]
pub async fn run(command: &str, timeout: Duration) -> ExecutionOutcome {
    let started = Instant::now();

    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            // Become our own process group leader so a timeout can kill the
            // whole tree, not just the direct `sh` child.
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, "failed to spawn command");
            return ExecutionOutcome {
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                stdout: String::new(),
                stderr: e.to_string(),
                duration: started.elapsed(),
            };
        }
    };

    let pgid = child.id().map(|pid| pid as i32);

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => ExecutionOutcome {
            exit_code: output.status.code().unwrap_or(SPAWN_FAILURE_EXIT_CODE),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        },
        Ok(Err(e)) => {
            warn!(error = %e, "command wait failed");
            ExecutionOutcome {
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                stdout: String::new(),
                stderr: e.to_string(),
                duration: started.elapsed(),
            }
        }
        Err(_elapsed) => {
            kill_process_group(pgid);
            ExecutionOutcome {
                exit_code: TIMEOUT_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("Timeout after {} seconds", timeout.as_secs()),
                duration: started.elapsed(),
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: Option<i32>) {
    if let Some(pgid) = pgid {
        // SAFETY: killpg is a plain syscall wrapper; pgid came from a child
        // we just spawned and own.
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: Option<i32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let outcome = run("echo hello", Duration::from_secs(5)).await;
        assert!(outcome.succeeded());
        assert!(outcome.stdout.contains("hello"));
        assert_eq!(outcome.stderr, "");
    }

    #[tokio::test]
    async fn nonzero_exit_is_classified_as_failure() {
        let outcome = run("exit 7", Duration::from_secs(5)).await;
        assert_eq!(outcome.exit_code, 7);
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn timeout_kills_the_child_and_reports_124() {
        let outcome = run("sleep 5", Duration::from_millis(200)).await;
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert!(outcome.stderr.contains("Timeout after"));
    }

    #[tokio::test]
    async fn unknown_command_is_a_nonzero_exit_not_a_spawn_failure() {
        // `sh -c` itself spawns fine; the shell reports "command not found"
        // on stderr and a non-zero exit code, same as any other failure.
        let outcome = run("definitely_not_a_real_command_xyz", Duration::from_secs(5)).await;
        assert_ne!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn combined_output_concatenates_stdout_then_stderr() {
        let outcome = run("echo out; echo err 1>&2", Duration::from_secs(5)).await;
        let combined = outcome.combined_output();
        assert!(combined.starts_with("out"));
        assert!(combined.contains("err"));
    }
}
