//! Assembly and long-running pieces of the martview daemon.
//!
//! Kept in a library so the end-to-end tests drive the same wiring the
//! binary uses.

pub mod app;
pub mod export;
pub mod schedule;

pub use app::App;
pub use export::{export_snapshot, DashboardExport};
pub use schedule::{forward_shutdown, RefreshSchedule};
