//! Dashboard export: the catalog with freshness, recent refresh outcomes and
//! open quality issues, written as one JSON document.

use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use martview_refresh::Orchestrator;
use martview_state::{
    epoch_millis, DataQualityIssue, OperationType, RefreshHistoryEntry, ViewDescriptor,
};

/// Refresh outcomes included in an export.
pub const EXPORT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct DashboardExport {
    pub generated_at: u64,
    pub views: Vec<ViewDescriptor>,
    pub recent_refreshes: Vec<RefreshHistoryEntry>,
    pub open_issues: Vec<DataQualityIssue>,
}

impl DashboardExport {
    fn records(&self) -> u64 {
        (self.views.len() + self.recent_refreshes.len() + self.open_issues.len()) as u64
    }
}

/// Write the export to `out` as a logged `export` operation.
pub fn export_snapshot(orchestrator: &Orchestrator, out: &Path) -> anyhow::Result<DashboardExport> {
    let target = out.display().to_string();
    let op = orchestrator
        .logger()
        .start(OperationType::Export, "dashboard", Some(&target))?;

    match write_export(orchestrator, out) {
        Ok(export) => {
            op.succeed(export.records())?;
            info!(path = %target, records = export.records(), "dashboard export written");
            Ok(export)
        }
        Err(e) => {
            op.fail(&format!("{e:#}"))?;
            Err(e)
        }
    }
}

fn write_export(orchestrator: &Orchestrator, out: &Path) -> anyhow::Result<DashboardExport> {
    let store = orchestrator.store();
    let export = DashboardExport {
        generated_at: epoch_millis(),
        views: store.list_views()?,
        recent_refreshes: store.refresh_history(EXPORT_HISTORY_LIMIT)?,
        open_issues: store.list_open_issues()?,
    };
    let json = serde_json::to_vec_pretty(&export)?;
    std::fs::write(out, json).with_context(|| format!("writing {}", out.display()))?;
    Ok(export)
}
