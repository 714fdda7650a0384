//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the worker run loop.
///
/// Per-job failures (spawn errors, non-zero exit, timeouts) are never
/// represented here — the executor classifies those into an
/// [`crate::executor::ExecutionOutcome`] and the outcome writer persists
/// them on the job itself. This type only covers failures the loop cannot
/// recover from by writing job state: a busted store, or an I/O error
/// reading the stop-flag file.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Queue(#[from] queue::QueueError),

    #[error("failed to access stop-flag file {path}: {source}")]
    StopFlag {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
