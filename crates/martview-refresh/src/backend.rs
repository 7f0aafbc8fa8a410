//! Collaborator interfaces the orchestrator drives.
//!
//! The orchestrator never knows how a view is computed. It asks a
//! `ViewBackend` to recompute a view by name and to report row counts, and
//! asks a `QualityChecker` for the current findings. Both are resolved once
//! at start-up.

use std::future::Future;
use std::pin::Pin;

use martview_state::QualityFinding;

use crate::error::RecomputeError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Recomputes derived views.
pub trait ViewBackend: Send + Sync {
    /// Whether a recompute strategy exists for `view`.
    fn supports(&self, view: &str) -> bool;

    /// Fully recompute `view` and return its row count.
    ///
    /// `concurrent` asks the backend not to lock out readers while it
    /// rebuilds. A failed recompute must leave the previous contents visible.
    fn recompute<'a>(
        &'a self,
        view: &'a str,
        concurrent: bool,
    ) -> BoxFuture<'a, Result<u64, RecomputeError>>;

    /// Current row count, or `None` when it cannot be determined
    /// (e.g. the view has never been built).
    fn row_count<'a>(&'a self, view: &'a str) -> BoxFuture<'a, Option<u64>>;
}

/// A check that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CheckFailure {
    pub check_name: String,
    pub message: String,
}

pub type CheckResult = Result<QualityFinding, CheckFailure>;

/// Runs the data-quality battery. Checks are read-only.
pub trait QualityChecker: Send + Sync {
    fn run_all_checks(&self) -> BoxFuture<'_, Vec<CheckResult>>;
}
