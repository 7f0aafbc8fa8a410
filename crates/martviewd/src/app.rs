//! Wires the metadata store, the SQLite source and the orchestrator.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use martview_core::MartviewConfig;
use martview_refresh::{Orchestrator, OrchestratorSettings, ViewRegistry};
use martview_sqlite::{retail_catalog, SourceDb, SqliteBackend, SqliteQualityChecker};
use martview_state::{epoch_millis, MetadataStore};

pub struct App {
    pub config: MartviewConfig,
    pub source: SourceDb,
    pub orchestrator: Arc<Orchestrator>,
}

/// Rows removed by a retention pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PruneReport {
    pub quality_issues: u32,
    pub operation_log: u32,
}

impl App {
    /// Open the on-disk store and source named in `config`.
    pub fn open(config: MartviewConfig) -> anyhow::Result<Self> {
        ensure_parent(&config.store.path)?;
        ensure_parent(&config.source.database)?;
        let store = MetadataStore::open(&config.store.path)
            .with_context(|| format!("opening metadata store {}", config.store.path.display()))?;
        let source = SourceDb::open(&config.source.database)?;
        Self::assemble(config, store, source)
    }

    /// Build the orchestrator over already-open stores.
    ///
    /// Ensures the source schema, pushes configured thresholds into it and
    /// registers the view catalog.
    pub fn assemble(
        config: MartviewConfig,
        store: MetadataStore,
        source: SourceDb,
    ) -> anyhow::Result<Self> {
        source.init_schema()?;
        source.sync_parameters(&config.analytics, &config.quality)?;

        let registry = Arc::new(ViewRegistry::new(retail_catalog())?);
        let backend = Arc::new(SqliteBackend::new(source.clone()));
        let checker = Arc::new(SqliteQualityChecker::new(source.clone()));
        let settings = OrchestratorSettings::from_config(&config)?;
        let orchestrator =
            Orchestrator::new(store, registry, backend, settings)?.with_quality_checker(checker);
        info!(views = orchestrator.registry().len(), "orchestrator ready");

        Ok(Self {
            config,
            source,
            orchestrator: Arc::new(orchestrator),
        })
    }

    /// Apply issue and operation-log retention.
    pub fn prune(&self) -> anyhow::Result<PruneReport> {
        let now = epoch_millis();
        let store = self.orchestrator.store();
        let quality_issues =
            store.prune_quality_issues(cutoff(now, self.config.quality.retention()))?;
        let operation_log = store.prune_logs(cutoff(now, self.config.quality.log_retention()))?;
        info!(quality_issues, operation_log, "retention applied");
        Ok(PruneReport {
            quality_issues,
            operation_log,
        })
    }
}

fn cutoff(now: u64, retention: Duration) -> u64 {
    now.saturating_sub(retention.as_millis() as u64)
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    Ok(())
}
