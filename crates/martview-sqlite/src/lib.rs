//! martview-sqlite — the SQLite retail source behind martview.
//!
//! Owns everything that knows SQL: the operational schema, the derived-view
//! definitions, how a view is rebuilt, and the data-quality checks. The
//! orchestrator in `martview-refresh` only ever sees view names through the
//! [`SqliteBackend`] and [`SqliteQualityChecker`] trait objects.

pub mod backend;
pub mod catalog;
pub mod db;
pub mod error;
pub mod quality;
pub mod sample;
pub mod schema;

pub use backend::SqliteBackend;
pub use catalog::retail_catalog;
pub use db::SourceDb;
pub use error::{SourceError, SourceResult};
pub use quality::SqliteQualityChecker;
pub use sample::SAMPLE_REFERENCE_DATE;
