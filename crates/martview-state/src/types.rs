//! Domain types for the martview metadata store.
//!
//! These types represent the persisted view catalog, the operation log,
//! per-view refresh history and data-quality findings. All types are
//! serializable to/from JSON for storage in redb tables. Timestamps are Unix
//! epoch milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── View catalog ───────────────────────────────────────────────────

/// How a derived view materializes its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    /// Evaluated at read time; a refresh re-creates the definition.
    OnDemandView,
    /// Rows are stored; a refresh rebuilds them.
    PrecomputedSnapshot,
}

/// How often a view is expected to be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshCadence {
    Realtime,
    Hourly,
    Daily,
    Weekly,
}

/// One registered derived view and its freshness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewDescriptor {
    pub name: String,
    /// Owning module (e.g. "sales", "customers").
    pub category: String,
    pub kind: ViewKind,
    pub refresh_cadence: RefreshCadence,
    /// Completion time of the latest successful refresh.
    pub last_refreshed: Option<u64>,
    pub last_row_count: Option<u64>,
    /// Cumulative mean over every successful refresh.
    pub avg_refresh_duration_ms: Option<f64>,
    /// Number of successful refreshes folded into the average.
    pub refresh_count: u64,
    pub registered_at: u64,
}

impl ViewDescriptor {
    /// A freshly declared view that has never been refreshed.
    pub fn new(
        name: &str,
        category: &str,
        kind: ViewKind,
        refresh_cadence: RefreshCadence,
    ) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            kind,
            refresh_cadence,
            last_refreshed: None,
            last_row_count: None,
            avg_refresh_duration_ms: None,
            refresh_count: 0,
            registered_at: epoch_millis(),
        }
    }

    pub fn freshness(&self) -> ViewFreshness {
        ViewFreshness {
            name: self.name.clone(),
            last_refreshed: self.last_refreshed,
            last_row_count: self.last_row_count,
            avg_refresh_duration_ms: self.avg_refresh_duration_ms,
        }
    }
}

/// Read model handed to consumers asking "how fresh is this view?".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewFreshness {
    pub name: String,
    pub last_refreshed: Option<u64>,
    pub last_row_count: Option<u64>,
    pub avg_refresh_duration_ms: Option<f64>,
}

/// Result of a `mark_refreshed` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessUpdate {
    Applied,
    /// The update was not newer than the stored `last_refreshed`.
    Stale,
    /// No view with that name is registered.
    Unregistered,
}

// ── Operation log ──────────────────────────────────────────────────

/// The kind of tracked unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    RefreshBatch,
    RefreshView,
    Validate,
    Export,
}

/// Lifecycle status of an operation log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Running,
    Success,
    Failed,
    Partial,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        self != OperationStatus::Running
    }
}

/// Opaque handle to an operation log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogHandle(pub(crate) u64);

impl LogHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Fields supplied when an operation starts.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub operation_type: OperationType,
    pub scope_name: String,
    pub target_name: Option<String>,
    pub started_at: u64,
}

/// One record per tracked unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationLogEntry {
    pub id: u64,
    pub operation_type: OperationType,
    pub scope_name: String,
    pub target_name: Option<String>,
    pub status: OperationStatus,
    pub rows_affected: u64,
    pub duration_ms: Option<u64>,
    pub started_at: u64,
    /// Set exactly once, at the terminal transition.
    pub completed_at: Option<u64>,
    pub error_detail: Option<String>,
}

// ── Refresh history ────────────────────────────────────────────────

/// Outcome status of one view within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Success,
    Failed,
}

/// The result of attempting to refresh one view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshOutcome {
    pub view_name: String,
    pub status: RefreshStatus,
    pub rows_before: Option<u64>,
    pub rows_after: Option<u64>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RefreshStatus::Success
    }
}

/// A refresh outcome as stored in the history table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshHistoryEntry {
    pub seq: u64,
    pub batch_id: String,
    pub recorded_at: u64,
    pub outcome: RefreshOutcome,
}

// ── Data quality ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCategory {
    Completeness,
    Accuracy,
    Consistency,
    Timeliness,
    Uniqueness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Resolved,
    Ignored,
}

/// What a single quality check reported during one pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityFinding {
    pub check_name: String,
    pub category: QualityCategory,
    pub severity: Severity,
    /// Table the check reads.
    pub source: String,
    pub affected_count: u64,
    pub description: String,
}

/// One detected violation of a validation rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataQualityIssue {
    pub id: u64,
    pub check_name: String,
    pub category: QualityCategory,
    pub severity: Severity,
    pub source: String,
    pub affected_record_count: u64,
    pub description: String,
    pub status: IssueStatus,
    /// Latest pass that reported the violation.
    pub detected_at: u64,
    /// First pass that reported it while it stayed open.
    pub first_detected_at: u64,
}
