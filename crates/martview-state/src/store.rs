//! MetadataStore — redb-backed persistence for martview.
//!
//! Holds the view catalog, the operation log, refresh history and
//! data-quality issues. All values are JSON-serialized into redb's `&[u8]`
//! value columns. Readers get MVCC snapshots, so a refresh in flight never
//! exposes a half-written record. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Next key for a `u64`-keyed append-only table.
macro_rules! next_seq {
    ($table:expr) => {
        $table
            .last()
            .map_err(map_err!(Read))?
            .map(|(key, _)| key.value() + 1)
            .unwrap_or(1)
    };
}

/// Error detail given to entries found `running` when the store is opened.
pub const ORPHANED: &str = "operation interrupted before completion";

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe metadata store backed by redb.
#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<Database>,
}

impl MetadataStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::init(db)?;
        debug!(?path, "metadata store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let store = Self::with_backend(redb::backends::InMemoryBackend::new())?;
        debug!("in-memory metadata store opened");
        Ok(store)
    }

    /// Open (or create) a store over any redb storage backend.
    pub fn with_backend(backend: impl redb::StorageBackend) -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        Self::init(db)
    }

    fn init(db: Database) -> StateResult<Self> {
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        let closed = store.close_orphaned_logs()?;
        if closed > 0 {
            warn!(closed, "closed operation log entries left running by a previous process");
        }
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(VIEWS).map_err(map_err!(Table))?;
        txn.open_table(OPERATION_LOG).map_err(map_err!(Table))?;
        txn.open_table(REFRESH_HISTORY).map_err(map_err!(Table))?;
        txn.open_table(QUALITY_ISSUES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── View catalog ───────────────────────────────────────────────

    /// Register a view, or refresh the static metadata of an existing one.
    ///
    /// Freshness fields of an existing registration are kept. Re-registering
    /// with a different `kind` fails with `KindMismatch`.
    pub fn register_view(&self, descriptor: &ViewDescriptor) -> StateResult<ViewDescriptor> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored;
        {
            let mut table = txn.open_table(VIEWS).map_err(map_err!(Table))?;
            let existing: Option<ViewDescriptor> =
                match table.get(descriptor.name.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };
            stored = match existing {
                Some(current) if current.kind != descriptor.kind => {
                    return Err(StateError::KindMismatch {
                        name: current.name,
                        existing: current.kind,
                        requested: descriptor.kind,
                    });
                }
                Some(current) => ViewDescriptor {
                    category: descriptor.category.clone(),
                    refresh_cadence: descriptor.refresh_cadence,
                    ..current
                },
                None => descriptor.clone(),
            };
            let value = encode(&stored)?;
            table
                .insert(stored.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(view = %stored.name, "view registered");
        Ok(stored)
    }

    /// Get a registered view by name.
    pub fn get_view(&self, name: &str) -> StateResult<Option<ViewDescriptor>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VIEWS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all registered views, ordered by name.
    pub fn list_views(&self) -> StateResult<Vec<ViewDescriptor>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VIEWS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Freshness of a registered view.
    pub fn view_freshness(&self, name: &str) -> StateResult<Option<ViewFreshness>> {
        Ok(self.get_view(name)?.map(|view| view.freshness()))
    }

    /// Record a successful refresh.
    ///
    /// `last_refreshed` only moves forward: an update that is not strictly
    /// newer than the stored value is ignored. Unknown names are ignored and
    /// logged as an anomaly.
    pub fn mark_refreshed(
        &self,
        name: &str,
        completed_at: u64,
        row_count: u64,
        duration: Duration,
    ) -> StateResult<FreshnessUpdate> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VIEWS).map_err(map_err!(Table))?;
            let current: Option<ViewDescriptor> =
                match table.get(name).map_err(map_err!(Read))? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };
            let Some(mut view) = current else {
                warn!(view = %name, "freshness update for unregistered view ignored");
                return Ok(FreshnessUpdate::Unregistered);
            };
            if view.last_refreshed.is_some_and(|last| completed_at <= last) {
                debug!(
                    view = %name,
                    completed_at,
                    last_refreshed = ?view.last_refreshed,
                    "out-of-order freshness update ignored"
                );
                return Ok(FreshnessUpdate::Stale);
            }

            let sample = duration.as_secs_f64() * 1000.0;
            view.refresh_count += 1;
            let n = view.refresh_count as f64;
            view.avg_refresh_duration_ms = Some(match view.avg_refresh_duration_ms {
                Some(avg) => avg + (sample - avg) / n,
                None => sample,
            });
            view.last_refreshed = Some(completed_at);
            view.last_row_count = Some(row_count);

            let value = encode(&view)?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(view = %name, completed_at, row_count, "freshness updated");
        Ok(FreshnessUpdate::Applied)
    }

    // ── Operation log ──────────────────────────────────────────────

    /// Insert a `running` log entry and return its handle.
    pub fn append_log(&self, op: &NewOperation) -> StateResult<LogHandle> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id;
        {
            let mut table = txn.open_table(OPERATION_LOG).map_err(map_err!(Table))?;
            id = next_seq!(table);
            let entry = OperationLogEntry {
                id,
                operation_type: op.operation_type,
                scope_name: op.scope_name.clone(),
                target_name: op.target_name.clone(),
                status: OperationStatus::Running,
                rows_affected: 0,
                duration_ms: None,
                started_at: op.started_at,
                completed_at: None,
                error_detail: None,
            };
            let value = encode(&entry)?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(LogHandle(id))
    }

    /// Move a `running` entry to a terminal status.
    ///
    /// Finalizing an entry twice, or "finalizing" to `running`, is an
    /// `InvalidTransition`.
    pub fn finalize_log(
        &self,
        handle: LogHandle,
        status: OperationStatus,
        rows_affected: u64,
        error_detail: Option<String>,
    ) -> StateResult<OperationLogEntry> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let entry;
        {
            let mut table = txn.open_table(OPERATION_LOG).map_err(map_err!(Table))?;
            let current: OperationLogEntry = match table.get(handle.0).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(format!("log entry {}", handle.0))),
            };
            if current.status.is_terminal() || !status.is_terminal() {
                return Err(StateError::InvalidTransition {
                    id: handle.0,
                    from: current.status,
                    to: status,
                });
            }
            let completed_at = epoch_millis().max(current.started_at);
            entry = OperationLogEntry {
                status,
                rows_affected,
                duration_ms: Some(completed_at - current.started_at),
                completed_at: Some(completed_at),
                error_detail,
                ..current
            };
            let value = encode(&entry)?;
            table
                .insert(handle.0, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(entry)
    }

    /// Get a log entry by handle.
    pub fn get_log(&self, handle: LogHandle) -> StateResult<Option<OperationLogEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OPERATION_LOG).map_err(map_err!(Table))?;
        match table.get(handle.0).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Most recent log entries first.
    pub fn list_logs(&self, limit: usize) -> StateResult<Vec<OperationLogEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OPERATION_LOG).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev().take(limit) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Fail every `running` entry. Only one process can hold the database,
    /// so at open time nothing can still be working on them.
    fn close_orphaned_logs(&self) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut closed = 0;
        {
            let mut table = txn.open_table(OPERATION_LOG).map_err(map_err!(Table))?;
            let mut orphans = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let log: OperationLogEntry = decode(value.value())?;
                if !log.status.is_terminal() {
                    orphans.push(log);
                }
            }
            let now = epoch_millis();
            for log in orphans {
                let completed_at = now.max(log.started_at);
                let entry = OperationLogEntry {
                    status: OperationStatus::Failed,
                    duration_ms: Some(completed_at - log.started_at),
                    completed_at: Some(completed_at),
                    error_detail: Some(ORPHANED.to_string()),
                    ..log
                };
                let value = encode(&entry)?;
                table.insert(entry.id, value.as_slice()).map_err(map_err!(Write))?;
                closed += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(closed)
    }

    /// Delete terminal log entries completed before `older_than`.
    /// Running entries are never pruned. Returns the number deleted.
    pub fn prune_logs(&self, older_than: u64) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(OPERATION_LOG).map_err(map_err!(Table))?;
            let mut doomed = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let log: OperationLogEntry = decode(value.value())?;
                if log.completed_at.is_some_and(|at| at < older_than) {
                    doomed.push(key.value());
                }
            }
            for id in &doomed {
                table.remove(*id).map_err(map_err!(Write))?;
            }
            count = doomed.len() as u32;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deleted = count, older_than, "operation log pruned");
        Ok(count)
    }

    // ── Refresh history ────────────────────────────────────────────

    /// Append one view's outcome to the refresh history.
    pub fn append_history(
        &self,
        batch_id: &str,
        outcome: &RefreshOutcome,
        recorded_at: u64,
    ) -> StateResult<RefreshHistoryEntry> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let entry;
        {
            let mut table = txn.open_table(REFRESH_HISTORY).map_err(map_err!(Table))?;
            let seq = next_seq!(table);
            entry = RefreshHistoryEntry {
                seq,
                batch_id: batch_id.to_string(),
                recorded_at,
                outcome: outcome.clone(),
            };
            let value = encode(&entry)?;
            table.insert(seq, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(entry)
    }

    /// Most recent refresh outcomes first.
    pub fn refresh_history(&self, limit: usize) -> StateResult<Vec<RefreshHistoryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REFRESH_HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev().take(limit) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// All history entries of one batch, in attempted order.
    pub fn history_for_batch(&self, batch_id: &str) -> StateResult<Vec<RefreshHistoryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REFRESH_HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: RefreshHistoryEntry = decode(value.value())?;
            if record.batch_id == batch_id {
                results.push(record);
            }
        }
        Ok(results)
    }

    // ── Data quality ───────────────────────────────────────────────

    /// Persist a non-zero finding.
    ///
    /// A check has at most one open issue: if one exists it is updated with
    /// the latest count and detection time, otherwise a new issue is opened.
    pub fn record_finding(
        &self,
        finding: &QualityFinding,
        detected_at: u64,
    ) -> StateResult<DataQualityIssue> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let issue;
        {
            let mut table = txn.open_table(QUALITY_ISSUES).map_err(map_err!(Table))?;
            let mut open: Option<DataQualityIssue> = None;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let candidate: DataQualityIssue = decode(value.value())?;
                if candidate.status == IssueStatus::Open && candidate.check_name == finding.check_name
                {
                    open = Some(candidate);
                    break;
                }
            }
            issue = match open {
                Some(existing) => DataQualityIssue {
                    category: finding.category,
                    severity: finding.severity,
                    source: finding.source.clone(),
                    affected_record_count: finding.affected_count,
                    description: finding.description.clone(),
                    detected_at,
                    ..existing
                },
                None => DataQualityIssue {
                    id: next_seq!(table),
                    check_name: finding.check_name.clone(),
                    category: finding.category,
                    severity: finding.severity,
                    source: finding.source.clone(),
                    affected_record_count: finding.affected_count,
                    description: finding.description.clone(),
                    status: IssueStatus::Open,
                    detected_at,
                    first_detected_at: detected_at,
                },
            };
            let value = encode(&issue)?;
            table
                .insert(issue.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(issue)
    }

    /// Resolve every open issue of a check that now passes.
    pub fn resolve_open_issues(&self, check_name: &str) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(QUALITY_ISSUES).map_err(map_err!(Table))?;
            let mut resolved = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let issue: DataQualityIssue = decode(value.value())?;
                if issue.status == IssueStatus::Open && issue.check_name == check_name {
                    resolved.push(DataQualityIssue {
                        status: IssueStatus::Resolved,
                        ..issue
                    });
                }
            }
            for issue in &resolved {
                let value = encode(issue)?;
                table
                    .insert(issue.id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            count = resolved.len() as u32;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    /// Manually set an issue's status (e.g. mark it ignored).
    pub fn set_issue_status(&self, id: u64, status: IssueStatus) -> StateResult<DataQualityIssue> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let issue;
        {
            let mut table = txn.open_table(QUALITY_ISSUES).map_err(map_err!(Table))?;
            let current: DataQualityIssue = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(format!("quality issue {id}"))),
            };
            issue = DataQualityIssue { status, ..current };
            let value = encode(&issue)?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(issue)
    }

    /// All retained issues, oldest first.
    pub fn list_quality_issues(&self) -> StateResult<Vec<DataQualityIssue>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUALITY_ISSUES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Open issues only, oldest first.
    pub fn list_open_issues(&self) -> StateResult<Vec<DataQualityIssue>> {
        Ok(self
            .list_quality_issues()?
            .into_iter()
            .filter(|issue| issue.status == IssueStatus::Open)
            .collect())
    }

    /// Delete issues detected before `older_than`. Returns the number deleted.
    pub fn prune_quality_issues(&self, older_than: u64) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(QUALITY_ISSUES).map_err(map_err!(Table))?;
            let mut doomed = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let issue: DataQualityIssue = decode(value.value())?;
                if issue.detected_at < older_than {
                    doomed.push(key.value());
                }
            }
            for id in &doomed {
                table.remove(*id).map_err(map_err!(Write))?;
            }
            count = doomed.len() as u32;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deleted = count, older_than, "quality issues pruned");
        Ok(count)
    }
}
