//! `ViewBackend` over the SQLite source.
//!
//! Snapshots are rebuilt with `CREATE TABLE … AS`, either inside one
//! exclusive transaction or, when `concurrent` is set, into a staging table
//! that is swapped in by a short transaction. On-demand views are dropped
//! and re-created. Any error rolls the transaction back, so readers keep
//! seeing the previous contents.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::{Connection, InterruptHandle, TransactionBehavior};
use tracing::{debug, warn};

use martview_refresh::{BoxFuture, RecomputeError, ViewBackend};
use martview_state::ViewKind;

use crate::catalog::{self, ViewSql};
use crate::db::SourceDb;
use crate::error::{SourceError, SourceResult};

pub struct SqliteBackend {
    db: SourceDb,
}

impl SqliteBackend {
    pub fn new(db: SourceDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &SourceDb {
        &self.db
    }

    /// Rebuild `view` and return its row count.
    pub async fn rebuild(&self, view: &str, concurrent: bool) -> SourceResult<u64> {
        let definition =
            *catalog::find(view).ok_or_else(|| SourceError::UnknownView(view.to_string()))?;
        let guard = InterruptOnDrop::arm(self.db.interrupt_handle());
        let cancelled = guard.flag();
        let rows = self
            .db
            .with_conn(move |conn| rebuild_blocking(conn, &definition, concurrent, &cancelled))
            .await;
        guard.disarm();
        rows
    }

    pub async fn count_rows(&self, view: &str) -> SourceResult<u64> {
        let view = checked_identifier(view)?.to_string();
        self.db.with_conn(move |conn| count(conn, &view)).await
    }
}

impl ViewBackend for SqliteBackend {
    fn supports(&self, view: &str) -> bool {
        catalog::find(view).is_some()
    }

    fn recompute<'a>(
        &'a self,
        view: &'a str,
        concurrent: bool,
    ) -> BoxFuture<'a, Result<u64, RecomputeError>> {
        Box::pin(async move {
            self.rebuild(view, concurrent)
                .await
                .map_err(|e| RecomputeError::new(e.to_string()))
        })
    }

    fn row_count<'a>(&'a self, view: &'a str) -> BoxFuture<'a, Option<u64>> {
        Box::pin(async move {
            match self.count_rows(view).await {
                Ok(rows) => Some(rows),
                Err(e) => {
                    debug!(%view, error = %e, "row count unavailable");
                    None
                }
            }
        })
    }
}

/// Interrupts the connection if the recompute future is dropped mid-flight
/// (e.g. by the orchestrator's per-view timeout).
///
/// The interrupt only reaches a statement that is already running. A rebuild
/// still queued behind the connection lock sees the cancel flag instead and
/// rolls back before committing.
struct InterruptOnDrop {
    handle: Arc<InterruptHandle>,
    cancelled: Arc<AtomicBool>,
    armed: bool,
}

impl InterruptOnDrop {
    fn arm(handle: Arc<InterruptHandle>) -> Self {
        Self {
            handle,
            cancelled: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            warn!("recompute cancelled, interrupting source statement");
            self.cancelled.store(true, Ordering::SeqCst);
            self.handle.interrupt();
        }
    }
}

/// View names are interpolated into DDL, so only `[a-z0-9_]` is accepted.
fn checked_identifier(name: &str) -> SourceResult<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(SourceError::InvalidIdentifier(name.to_string()))
    }
}

fn count(conn: &Connection, name: &str) -> SourceResult<u64> {
    let rows: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {name}"), [], |row| row.get(0))?;
    Ok(rows.max(0) as u64)
}

fn ensure_live(cancelled: &AtomicBool, name: &str) -> SourceResult<()> {
    if cancelled.load(Ordering::SeqCst) {
        Err(SourceError::Cancelled(name.to_string()))
    } else {
        Ok(())
    }
}

fn rebuild_blocking(
    conn: &mut Connection,
    view: &ViewSql,
    concurrent: bool,
    cancelled: &AtomicBool,
) -> SourceResult<u64> {
    let name = checked_identifier(view.name)?;
    let select = view.select;
    ensure_live(cancelled, name)?;
    let rows = match (view.kind, concurrent) {
        (ViewKind::OnDemandView, _) => {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute_batch(&format!(
                "DROP VIEW IF EXISTS {name}; CREATE VIEW {name} AS {select};"
            ))?;
            let rows = count(&tx, name)?;
            ensure_live(cancelled, name)?;
            tx.commit()?;
            rows
        }
        (ViewKind::PrecomputedSnapshot, false) => {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
            tx.execute_batch(&format!(
                "DROP TABLE IF EXISTS {name}; CREATE TABLE {name} AS {select};"
            ))?;
            let rows = count(&tx, name)?;
            ensure_live(cancelled, name)?;
            tx.commit()?;
            rows
        }
        (ViewKind::PrecomputedSnapshot, true) => {
            let staging = format!("{name}__staging");
            let built = conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS {staging}; CREATE TABLE {staging} AS {select};"
            ));
            let swapped = built
                .map_err(SourceError::from)
                .and_then(|()| swap_in_staging(conn, name, &staging, cancelled));
            if swapped.is_err() {
                if let Err(cleanup) = conn.execute_batch(&format!("DROP TABLE IF EXISTS {staging}")) {
                    warn!(view = %name, error = %cleanup, "failed to drop staging table");
                }
            }
            swapped?
        }
    };
    debug!(view = %name, rows, concurrent, "view rebuilt");
    Ok(rows)
}

fn swap_in_staging(
    conn: &mut Connection,
    name: &str,
    staging: &str,
    cancelled: &AtomicBool,
) -> SourceResult<u64> {
    ensure_live(cancelled, name)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {name}; ALTER TABLE {staging} RENAME TO {name};"
    ))?;
    let rows = count(&tx, name)?;
    ensure_live(cancelled, name)?;
    tx.commit()?;
    Ok(rows)
}
