//! Refresh error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to callers of the orchestrator.
///
/// A single view failing to recompute is not one of these: it is recorded
/// as a failed outcome inside the batch.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("unknown view: {0}")]
    UnknownView(String),

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("view declared twice in catalog: {0}")]
    DuplicateView(String),

    #[error("no recompute strategy for view: {0}")]
    MissingRecompute(String),

    #[error("no quality checker configured")]
    NoQualityChecker,

    #[error("metadata store error: {0}")]
    Metadata(#[from] martview_state::StateError),
}

pub type RefreshResult<T> = Result<T, RefreshError>;

/// A single view's recompute failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RecomputeError {
    pub message: String,
}

impl RecomputeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn timeout(view: &str, after: Duration) -> Self {
        Self::new(format!(
            "recompute of {view} timed out after {}ms",
            after.as_millis()
        ))
    }
}
