//! martview-refresh — refresh orchestration for derived views.
//!
//! Recomputes an ordered set of derived views one at a time, isolates
//! per-view failures, and records every batch, view attempt and validation
//! pass in the metadata store (`martview-state`).
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── ViewRegistry (static ordered catalog, grouped by module)
//!   ├── ViewBackend (recompute + row counts, supplied by the source crate)
//!   ├── QualityChecker (optional, read-only checks)
//!   └── OperationLogger ──> MetadataStore
//!         └── LoggedOperation (closes as failed if dropped unfinished)
//! ```
//!
//! The orchestrator never builds queries itself; it only names views.

pub mod backend;
pub mod error;
pub mod logger;
pub mod orchestrator;
pub mod registry;

pub use backend::{BoxFuture, CheckFailure, CheckResult, QualityChecker, ViewBackend};
pub use error::{RecomputeError, RefreshError, RefreshResult};
pub use logger::{LoggedOperation, OperationLogger, OperationReport};
pub use orchestrator::{
    Orchestrator, OrchestratorSettings, QualityPass, RefreshBatch, RefreshRequest,
    RefreshTrigger, TriggerSource,
};
pub use registry::{ViewDefinition, ViewRegistry};
