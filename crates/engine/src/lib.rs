//! `engine` crate — the shell command executor and worker run loop.

pub mod error;
pub mod executor;
pub mod worker;

pub use error::EngineError;
pub use executor::ExecutionOutcome;
pub use worker::{Worker, WorkerConfig};
