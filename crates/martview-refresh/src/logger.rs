//! Scoped start/finish records for tracked work.
//!
//! Every tracked operation (a batch, one view's refresh, a validation pass,
//! an export) gets a `running` entry when it starts and exactly one terminal
//! transition when it ends. `LoggedOperation` is a guard: if it is dropped
//! before being finished (early return, cancelled future, panic) the entry
//! is closed as `failed`. Entries that could not be closed because the
//! metadata store itself failed are closed when the store is next opened.

use std::fmt::Display;
use std::future::Future;

use tracing::{debug, error, warn};

use martview_state::{
    epoch_millis, LogHandle, MetadataStore, NewOperation, OperationLogEntry, OperationStatus,
    OperationType, StateResult,
};

/// Error detail recorded when a guard is dropped unfinished.
pub const ABANDONED: &str = "operation abandoned before completion";

/// What a completed unit of work reports to the log.
pub trait OperationReport {
    fn rows_affected(&self) -> u64;

    /// Terminal status for work that returned normally.
    fn status(&self) -> OperationStatus {
        OperationStatus::Success
    }

    fn error_detail(&self) -> Option<String> {
        None
    }
}

impl OperationReport for u64 {
    fn rows_affected(&self) -> u64 {
        *self
    }
}

/// Appends and finalizes operation log entries.
#[derive(Clone)]
pub struct OperationLogger {
    store: MetadataStore,
}

impl OperationLogger {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    /// Record the start of an operation and return its guard.
    pub fn start(
        &self,
        operation_type: OperationType,
        scope: &str,
        target: Option<&str>,
    ) -> StateResult<LoggedOperation> {
        let handle = self.store.append_log(&NewOperation {
            operation_type,
            scope_name: scope.to_string(),
            target_name: target.map(str::to_string),
            started_at: epoch_millis(),
        })?;
        debug!(
            id = handle.id(),
            ?operation_type,
            %scope,
            target = target.unwrap_or("-"),
            "operation started"
        );
        Ok(LoggedOperation {
            store: self.store.clone(),
            handle,
            operation_type,
            finished: false,
        })
    }

    /// Run `work` as a logged operation.
    ///
    /// Normal completion is finalized with the status and row count the work
    /// reports. An error is finalized as `failed` with its text and handed
    /// back to the caller in the inner `Result`. The outer `Result` carries
    /// metadata-store failures only.
    pub async fn with_logged_operation<T, E, Fut>(
        &self,
        operation_type: OperationType,
        scope: &str,
        target: Option<&str>,
        work: Fut,
    ) -> StateResult<Result<T, E>>
    where
        Fut: Future<Output = Result<T, E>>,
        T: OperationReport,
        E: Display,
    {
        let op = self.start(operation_type, scope, target)?;
        match work.await {
            Ok(value) => {
                op.finish(value.status(), value.rows_affected(), value.error_detail())?;
                Ok(Ok(value))
            }
            Err(err) => {
                op.fail(&err.to_string())?;
                Ok(Err(err))
            }
        }
    }
}

/// Guard for one `running` log entry.
#[must_use = "dropping an unfinished operation records it as failed"]
pub struct LoggedOperation {
    store: MetadataStore,
    handle: LogHandle,
    operation_type: OperationType,
    finished: bool,
}

impl LoggedOperation {
    pub fn handle(&self) -> LogHandle {
        self.handle
    }

    pub fn succeed(self, rows_affected: u64) -> StateResult<OperationLogEntry> {
        self.finish(OperationStatus::Success, rows_affected, None)
    }

    pub fn fail(self, error_detail: &str) -> StateResult<OperationLogEntry> {
        self.finish(OperationStatus::Failed, 0, Some(error_detail.to_string()))
    }

    pub fn finish(
        mut self,
        status: OperationStatus,
        rows_affected: u64,
        error_detail: Option<String>,
    ) -> StateResult<OperationLogEntry> {
        self.finished = true;
        let entry = self
            .store
            .finalize_log(self.handle, status, rows_affected, error_detail)?;
        debug!(
            id = entry.id,
            operation_type = ?self.operation_type,
            ?status,
            rows_affected,
            duration_ms = entry.duration_ms.unwrap_or_default(),
            "operation finished"
        );
        Ok(entry)
    }
}

impl Drop for LoggedOperation {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.store.finalize_log(
            self.handle,
            OperationStatus::Failed,
            0,
            Some(ABANDONED.to_string()),
        ) {
            Ok(_) => warn!(
                id = self.handle.id(),
                operation_type = ?self.operation_type,
                "operation abandoned, recorded as failed"
            ),
            Err(e) => error!(
                id = self.handle.id(),
                error = %e,
                "failed to close abandoned operation"
            ),
        }
    }
}
