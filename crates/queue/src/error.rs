//! Typed error type for the queue crate.

use thiserror::Error;

/// Errors surfaced by [`crate::JobQueue`]'s control surface.
///
/// A lost claim race or a no-op recovery sweep are deliberately *not*
/// represented here — both are routine "no work found" outcomes, not
/// failures, and show up as `Ok(None)` / `Ok(vec![])` instead.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("invalid time: {0}")]
    InvalidTime(String),

    #[error(transparent)]
    Store(#[from] db::DbError),
}

impl QueueError {
    /// True for `DbError::Busy` surfaced after the store's own retry budget
    /// was exhausted.
    pub fn is_store_busy(&self) -> bool {
        matches!(self, QueueError::Store(db::DbError::Busy { .. }))
    }
}
