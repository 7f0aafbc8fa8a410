//! Connection handling for the retail source database.
//!
//! One serialized connection guarded by a mutex. Async callers go through
//! [`SourceDb::with_conn`], which runs the closure on tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, InterruptHandle, OptionalExtension};
use tracing::{debug, info};

use martview_core::{AnalyticsConfig, QualityConfig};

use crate::error::{SourceError, SourceResult};
use crate::schema::SCHEMA;

#[derive(Clone)]
pub struct SourceDb {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SourceDb {
    /// Open (or create) the source database at `path`.
    pub fn open(path: &Path) -> SourceResult<Self> {
        let conn = Connection::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self::from_connection(conn)?;
        info!(?path, "source database opened");
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> SourceResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> SourceResult<Self> {
        apply_pragmas(&conn)?;
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        })
    }

    /// Create the operational tables and `bi_parameters` if missing.
    pub fn init_schema(&self) -> SourceResult<()> {
        self.blocking(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })?;
        debug!("source schema ensured");
        Ok(())
    }

    /// Copy configured thresholds into `bi_parameters`, where view
    /// definitions and quality checks read them.
    pub fn sync_parameters(
        &self,
        analytics: &AnalyticsConfig,
        quality: &QualityConfig,
    ) -> SourceResult<()> {
        let parameters = [
            (
                "reference_date",
                analytics
                    .reference_date
                    .clone()
                    .unwrap_or_else(|| "now".to_string()),
            ),
            ("clv_platinum", analytics.clv_tiers.platinum.to_string()),
            ("clv_gold", analytics.clv_tiers.gold.to_string()),
            ("clv_silver", analytics.clv_tiers.silver.to_string()),
            ("max_order_total", quality.max_order_total.to_string()),
            ("late_shipment_days", quality.late_shipment_days.to_string()),
            ("stale_order_hours", quality.stale_order_hours.to_string()),
        ];
        self.blocking(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO bi_parameters (name, value) VALUES (?1, ?2)
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                )?;
                for (name, value) in &parameters {
                    stmt.execute(params![name, value])?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;
        debug!(count = parameters.len(), "bi parameters synced");
        Ok(())
    }

    /// Read one parameter.
    pub fn parameter(&self, name: &str) -> SourceResult<Option<String>> {
        self.blocking(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM bi_parameters WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    /// Run `f` against the connection on the calling thread.
    pub fn blocking<F, T>(&self, f: F) -> SourceResult<T>
    where
        F: FnOnce(&mut Connection) -> SourceResult<T>,
    {
        let mut guard = self.conn.lock().map_err(|_| SourceError::Poisoned)?;
        f(&mut guard)
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn with_conn<F, T>(&self, f: F) -> SourceResult<T>
    where
        F: FnOnce(&mut Connection) -> SourceResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| SourceError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }

    /// Handle that aborts whatever statement the connection is running.
    pub fn interrupt_handle(&self) -> Arc<InterruptHandle> {
        Arc::clone(&self.interrupt)
    }
}

fn apply_pragmas(conn: &Connection) -> SourceResult<()> {
    // legacy_alter_table lets a snapshot swap rename a table that on-demand
    // views depend on without SQLite re-validating those views mid-swap.
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        PRAGMA foreign_keys = OFF;
        PRAGMA legacy_alter_table = ON;
        ",
    )?;
    Ok(())
}
