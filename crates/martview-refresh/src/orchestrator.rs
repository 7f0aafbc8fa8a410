//! Refresh orchestrator.
//!
//! Walks a list of views strictly in order, recomputing one at a time
//! through the `ViewBackend`. A view that fails is recorded and skipped;
//! the batch always runs to the end. Every batch and every view attempt is
//! a logged operation, and every outcome lands in refresh history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use martview_core::MartviewConfig;
use martview_state::{
    epoch_millis, DataQualityIssue, FreshnessUpdate, MetadataStore, OperationStatus,
    OperationType, RefreshHistoryEntry, RefreshOutcome, RefreshStatus, ViewFreshness,
};

use crate::backend::{CheckFailure, QualityChecker, ViewBackend};
use crate::error::{RecomputeError, RefreshError, RefreshResult};
use crate::logger::{OperationLogger, OperationReport};
use crate::registry::ViewRegistry;

const MS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Who asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Scheduled,
    Api,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshTrigger {
    pub source: TriggerSource,
    pub triggered_by: String,
}

impl RefreshTrigger {
    pub fn manual(by: impl Into<String>) -> Self {
        Self {
            source: TriggerSource::Manual,
            triggered_by: by.into(),
        }
    }

    pub fn scheduled(by: impl Into<String>) -> Self {
        Self {
            source: TriggerSource::Scheduled,
            triggered_by: by.into(),
        }
    }

    pub fn api(by: impl Into<String>) -> Self {
        Self {
            source: TriggerSource::Api,
            triggered_by: by.into(),
        }
    }
}

/// Parameters of one batch.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    /// Recorded as the log scope ("all", a module name, or "custom").
    pub scope: String,
    pub concurrent: bool,
    pub trigger: RefreshTrigger,
}

/// One invocation of the orchestrator over an ordered list of views.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshBatch {
    pub batch_id: String,
    pub triggered_by: String,
    pub trigger_source: TriggerSource,
    pub scope: String,
    pub concurrent: bool,
    pub started_at: u64,
    pub completed_at: u64,
    /// One per attempted view, in attempted order.
    pub outcomes: Vec<RefreshOutcome>,
}

impl RefreshBatch {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &RefreshOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// e.g. "7 of 8 views refreshed; mv_marketing_roi failed: connection lost".
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} of {} views refreshed",
            self.succeeded(),
            self.outcomes.len()
        );
        for outcome in self.failed() {
            summary.push_str(&format!(
                "; {} failed: {}",
                outcome.view_name,
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        }
        summary
    }
}

impl OperationReport for RefreshBatch {
    fn rows_affected(&self) -> u64 {
        self.outcomes.len() as u64
    }
}

/// Result of one validation pass.
#[derive(Debug, Clone, Serialize)]
pub struct QualityPass {
    /// Open issues recorded or refreshed by this pass.
    pub issues: Vec<DataQualityIssue>,
    /// Open issues closed because their check now passes.
    pub resolved: u32,
    /// Issues removed by the retention prune.
    pub pruned: u32,
    /// Checks that could not be evaluated.
    pub failures: Vec<CheckFailure>,
    pub checks_run: usize,
}

impl OperationReport for QualityPass {
    fn rows_affected(&self) -> u64 {
        self.issues.len() as u64
    }

    fn status(&self) -> OperationStatus {
        if self.failures.is_empty() {
            OperationStatus::Success
        } else if self.failures.len() == self.checks_run {
            OperationStatus::Failed
        } else {
            OperationStatus::Partial
        }
    }

    fn error_detail(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let detail: Vec<String> = self
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.check_name, f.message))
            .collect();
        Some(detail.join("; "))
    }
}

/// Orchestrator tuning taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Upper bound on a single view's recompute.
    pub view_timeout: Option<Duration>,
    /// Quality issues detected longer ago than this are purged.
    pub issue_retention: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            view_timeout: None,
            issue_retention: Duration::from_millis(7 * MS_PER_DAY),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &MartviewConfig) -> Result<Self, martview_core::ConfigError> {
        Ok(Self {
            view_timeout: config.refresh.view_timeout()?,
            issue_retention: config.quality.retention(),
        })
    }
}

pub struct Orchestrator {
    store: MetadataStore,
    logger: OperationLogger,
    registry: Arc<ViewRegistry>,
    backend: Arc<dyn ViewBackend>,
    checker: Option<Arc<dyn QualityChecker>>,
    settings: OrchestratorSettings,
    batch_lock: Mutex<()>,
}

impl Orchestrator {
    /// Wire the orchestrator and register the catalog.
    ///
    /// Fails with `MissingRecompute` if the backend cannot recompute a
    /// declared view.
    pub fn new(
        store: MetadataStore,
        registry: Arc<ViewRegistry>,
        backend: Arc<dyn ViewBackend>,
        settings: OrchestratorSettings,
    ) -> RefreshResult<Self> {
        if let Some(view) = registry.all().iter().find(|v| !backend.supports(&v.name)) {
            return Err(RefreshError::MissingRecompute(view.name.clone()));
        }
        registry.install(&store)?;
        Ok(Self {
            logger: OperationLogger::new(store.clone()),
            store,
            registry,
            backend,
            checker: None,
            settings,
            batch_lock: Mutex::new(()),
        })
    }

    pub fn with_quality_checker(mut self, checker: Arc<dyn QualityChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn logger(&self) -> &OperationLogger {
        &self.logger
    }

    /// Refresh every registered view in declaration order.
    pub async fn refresh_all(
        &self,
        concurrent: bool,
        trigger: RefreshTrigger,
    ) -> RefreshResult<RefreshBatch> {
        let request = RefreshRequest {
            scope: "all".to_string(),
            concurrent,
            trigger,
        };
        self.refresh(&self.registry.names(), &request).await
    }

    /// Refresh one module's views in their declared order.
    pub async fn refresh_module(
        &self,
        module: &str,
        concurrent: bool,
        trigger: RefreshTrigger,
    ) -> RefreshResult<RefreshBatch> {
        let names: Vec<String> = self
            .registry
            .views_in(module)
            .into_iter()
            .map(|v| v.name.clone())
            .collect();
        if names.is_empty() {
            return Err(RefreshError::UnknownModule(module.to_string()));
        }
        let request = RefreshRequest {
            scope: module.to_string(),
            concurrent,
            trigger,
        };
        self.refresh(&names, &request).await
    }

    /// Refresh `view_names` in the given order.
    ///
    /// Every name is validated before any work starts. Individual view
    /// failures are recorded in the returned batch; only metadata-store
    /// failures abort it.
    pub async fn refresh(
        &self,
        view_names: &[String],
        request: &RefreshRequest,
    ) -> RefreshResult<RefreshBatch> {
        for name in view_names {
            self.registry.get(name)?;
        }

        let _guard = self.batch_lock.lock().await;
        let batch_id = Uuid::new_v4().to_string();
        info!(
            %batch_id,
            scope = %request.scope,
            views = view_names.len(),
            concurrent = request.concurrent,
            trigger = ?request.trigger.source,
            triggered_by = %request.trigger.triggered_by,
            "refresh batch started"
        );

        let work = self.run_batch(&batch_id, view_names, request);
        let batch = self
            .logger
            .with_logged_operation(
                OperationType::RefreshBatch,
                &request.scope,
                Some(&batch_id),
                work,
            )
            .await??;

        info!(
            %batch_id,
            succeeded = batch.succeeded(),
            attempted = batch.outcomes.len(),
            duration_ms = batch.completed_at - batch.started_at,
            "refresh batch finished"
        );
        Ok(batch)
    }

    async fn run_batch(
        &self,
        batch_id: &str,
        view_names: &[String],
        request: &RefreshRequest,
    ) -> RefreshResult<RefreshBatch> {
        let started_at = epoch_millis();
        let mut outcomes = Vec::with_capacity(view_names.len());
        for name in view_names {
            let outcome = self.refresh_view(name, request).await?;
            self.store.append_history(batch_id, &outcome, epoch_millis())?;
            outcomes.push(outcome);
        }
        Ok(RefreshBatch {
            batch_id: batch_id.to_string(),
            triggered_by: request.trigger.triggered_by.clone(),
            trigger_source: request.trigger.source,
            scope: request.scope.clone(),
            concurrent: request.concurrent,
            started_at,
            completed_at: epoch_millis().max(started_at),
            outcomes,
        })
    }

    async fn refresh_view(
        &self,
        view: &str,
        request: &RefreshRequest,
    ) -> RefreshResult<RefreshOutcome> {
        let rows_before = self.backend.row_count(view).await;
        let started_at = epoch_millis();
        let clock = Instant::now();

        let result = self
            .logger
            .with_logged_operation(
                OperationType::RefreshView,
                &request.scope,
                Some(view),
                self.bounded_recompute(view, request.concurrent),
            )
            .await?;
        let duration = clock.elapsed();
        let duration_ms = duration.as_millis() as u64;

        match result {
            Ok(reported) => {
                let rows_after = self.backend.row_count(view).await.unwrap_or(reported);
                let completed_at = epoch_millis().max(started_at);
                match self
                    .store
                    .mark_refreshed(view, completed_at, rows_after, duration)?
                {
                    FreshnessUpdate::Applied => {}
                    FreshnessUpdate::Stale => warn!(
                        %view,
                        completed_at,
                        rows_after,
                        "catalog already holds a newer refresh, freshness not advanced"
                    ),
                    FreshnessUpdate::Unregistered => {
                        warn!(%view, "refreshed view missing from catalog")
                    }
                }
                info!(%view, rows_before = ?rows_before, rows_after, duration_ms, "view refreshed");
                Ok(RefreshOutcome {
                    view_name: view.to_string(),
                    status: RefreshStatus::Success,
                    rows_before,
                    rows_after: Some(rows_after),
                    duration_ms,
                    error: None,
                })
            }
            Err(err) => {
                warn!(%view, error = %err, duration_ms, "view refresh failed");
                Ok(RefreshOutcome {
                    view_name: view.to_string(),
                    status: RefreshStatus::Failed,
                    rows_before,
                    rows_after: None,
                    duration_ms,
                    error: Some(err.message),
                })
            }
        }
    }

    async fn bounded_recompute(&self, view: &str, concurrent: bool) -> Result<u64, RecomputeError> {
        let recompute = self.backend.recompute(view, concurrent);
        match self.settings.view_timeout {
            Some(limit) => tokio::time::timeout(limit, recompute)
                .await
                .unwrap_or_else(|_| Err(RecomputeError::timeout(view, limit))),
            None => recompute.await,
        }
    }

    /// Most recent outcomes first.
    pub fn get_refresh_history(&self, limit: usize) -> RefreshResult<Vec<RefreshHistoryEntry>> {
        Ok(self.store.refresh_history(limit)?)
    }

    pub fn get_view_freshness(&self, name: &str) -> RefreshResult<ViewFreshness> {
        self.registry.get(name)?;
        self.store
            .view_freshness(name)?
            .ok_or_else(|| RefreshError::UnknownView(name.to_string()))
    }

    /// Run the quality battery as a logged `validate` operation.
    ///
    /// Issues past retention are purged first. A check reporting affected
    /// rows keeps exactly one open issue; a check reporting none resolves
    /// its open issue.
    pub async fn run_quality_checks(&self) -> RefreshResult<QualityPass> {
        let checker = self
            .checker
            .clone()
            .ok_or(RefreshError::NoQualityChecker)?;
        let pass = self
            .logger
            .with_logged_operation(
                OperationType::Validate,
                "data_quality",
                None,
                self.quality_pass(checker.as_ref()),
            )
            .await??;
        info!(
            checks = pass.checks_run,
            open_issues = pass.issues.len(),
            resolved = pass.resolved,
            pruned = pass.pruned,
            failed_checks = pass.failures.len(),
            "quality checks finished"
        );
        Ok(pass)
    }

    async fn quality_pass(&self, checker: &dyn QualityChecker) -> RefreshResult<QualityPass> {
        let retention_ms = self.settings.issue_retention.as_millis() as u64;
        let cutoff = epoch_millis().saturating_sub(retention_ms);
        let pruned = self.store.prune_quality_issues(cutoff)?;

        let results = checker.run_all_checks().await;
        let checks_run = results.len();
        let detected_at = epoch_millis();
        let mut issues = Vec::new();
        let mut failures = Vec::new();
        let mut resolved = 0;
        for result in results {
            match result {
                Ok(finding) if finding.affected_count > 0 => {
                    issues.push(self.store.record_finding(&finding, detected_at)?);
                }
                Ok(finding) => {
                    resolved += self.store.resolve_open_issues(&finding.check_name)?;
                }
                Err(failure) => {
                    warn!(check = %failure.check_name, error = %failure.message, "quality check failed");
                    failures.push(failure);
                }
            }
        }
        Ok(QualityPass {
            issues,
            resolved,
            pruned,
            failures,
            checks_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use redb::backends::InMemoryBackend;
    use redb::StorageBackend;

    use martview_state::{
        IssueStatus, OperationStatus, QualityCategory, QualityFinding, RefreshCadence, Severity,
    };

    use crate::backend::{BoxFuture, CheckResult};
    use crate::registry::ViewDefinition;

    #[derive(Clone)]
    enum Script {
        Rows(u64),
        Fail(&'static str),
        Hang,
        /// Build the view, then break the metadata storage.
        BreakStore(u64, Arc<AtomicBool>),
    }

    /// Backend whose recompute behaviour is fixed per view.
    #[derive(Default)]
    struct ScriptedBackend {
        scripts: HashMap<String, Script>,
        built: StdMutex<HashMap<String, u64>>,
        calls: StdMutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(scripts: &[(&str, Script)]) -> Self {
            Self {
                scripts: scripts
                    .iter()
                    .map(|(name, s)| (name.to_string(), s.clone()))
                    .collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ViewBackend for ScriptedBackend {
        fn supports(&self, view: &str) -> bool {
            self.scripts.contains_key(view)
        }

        fn recompute<'a>(
            &'a self,
            view: &'a str,
            _concurrent: bool,
        ) -> BoxFuture<'a, Result<u64, RecomputeError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(view.to_string());
                match self.scripts.get(view).cloned() {
                    Some(Script::Rows(rows)) => {
                        self.built.lock().unwrap().insert(view.to_string(), rows);
                        Ok(rows)
                    }
                    Some(Script::BreakStore(rows, broken)) => {
                        broken.store(true, Ordering::SeqCst);
                        self.built.lock().unwrap().insert(view.to_string(), rows);
                        Ok(rows)
                    }
                    Some(Script::Fail(msg)) => Err(RecomputeError::new(msg)),
                    Some(Script::Hang) => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(0)
                    }
                    None => Err(RecomputeError::new("no definition")),
                }
            })
        }

        fn row_count<'a>(&'a self, view: &'a str) -> BoxFuture<'a, Option<u64>> {
            Box::pin(async move { self.built.lock().unwrap().get(view).copied() })
        }
    }

    /// In-memory redb storage that rejects every write while `broken` is set.
    #[derive(Debug, Clone)]
    struct BreakableStorage {
        bytes: Arc<InMemoryBackend>,
        broken: Arc<AtomicBool>,
    }

    impl BreakableStorage {
        fn new() -> Self {
            Self {
                bytes: Arc::new(InMemoryBackend::new()),
                broken: Arc::new(AtomicBool::new(false)),
            }
        }

        fn check(&self) -> io::Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                Err(io::Error::other("metadata disk unavailable"))
            } else {
                Ok(())
            }
        }
    }

    impl StorageBackend for BreakableStorage {
        fn len(&self) -> io::Result<u64> {
            self.bytes.len()
        }

        fn read(&self, offset: u64, out: &mut [u8]) -> io::Result<()> {
            self.bytes.read(offset, out)
        }

        fn set_len(&self, len: u64) -> io::Result<()> {
            self.check()?;
            self.bytes.set_len(len)
        }

        fn sync_data(&self) -> io::Result<()> {
            self.check()?;
            self.bytes.sync_data()
        }

        fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
            self.check()?;
            self.bytes.write(offset, data)
        }
    }

    struct FixedChecker(Vec<CheckResult>);

    impl QualityChecker for FixedChecker {
        fn run_all_checks(&self) -> BoxFuture<'_, Vec<CheckResult>> {
            Box::pin(async move { self.0.clone() })
        }
    }

    fn finding(check: &str, count: u64) -> CheckResult {
        Ok(QualityFinding {
            check_name: check.to_string(),
            category: QualityCategory::Accuracy,
            severity: Severity::High,
            source: "orders".to_string(),
            affected_count: count,
            description: format!("{check} violated"),
        })
    }

    fn broken(check: &str) -> CheckResult {
        Err(CheckFailure {
            check_name: check.to_string(),
            message: "no such table".to_string(),
        })
    }

    fn orchestrator(
        views: Vec<ViewDefinition>,
        backend: Arc<ScriptedBackend>,
        settings: OrchestratorSettings,
    ) -> Orchestrator {
        let store = MetadataStore::open_in_memory().unwrap();
        let registry = Arc::new(ViewRegistry::new(views).unwrap());
        Orchestrator::new(store, registry, backend, settings).unwrap()
    }

    fn daily(name: &str, module: &str) -> ViewDefinition {
        ViewDefinition::snapshot(name, module, RefreshCadence::Daily)
    }

    fn manual() -> RefreshTrigger {
        RefreshTrigger::manual("test")
    }

    #[tokio::test]
    async fn connection_lost_is_isolated() {
        let backend = Arc::new(ScriptedBackend::new(&[
            ("mv_sales", Script::Rows(12)),
            ("mv_customers", Script::Fail("connection lost")),
        ]));
        let orch = orchestrator(
            vec![daily("mv_sales", "sales"), daily("mv_customers", "customers")],
            backend,
            OrchestratorSettings::default(),
        );
        let before = orch.get_view_freshness("mv_customers").unwrap();

        let batch = orch.refresh_all(false, manual()).await.unwrap();

        assert_eq!(batch.outcomes.len(), 2);
        assert_eq!(batch.outcomes[0].view_name, "mv_sales");
        assert_eq!(batch.outcomes[0].status, RefreshStatus::Success);
        assert_eq!(batch.outcomes[0].rows_after, Some(12));
        assert_eq!(batch.outcomes[1].view_name, "mv_customers");
        assert_eq!(batch.outcomes[1].status, RefreshStatus::Failed);
        assert!(batch.outcomes[1]
            .error
            .as_deref()
            .unwrap()
            .contains("connection lost"));

        let after = orch.get_view_freshness("mv_customers").unwrap();
        assert_eq!(after.last_refreshed, before.last_refreshed);
        assert!(orch
            .get_view_freshness("mv_sales")
            .unwrap()
            .last_refreshed
            .is_some());
        assert_eq!(
            batch.summary(),
            "1 of 2 views refreshed; mv_customers failed: connection lost"
        );
    }

    #[tokio::test]
    async fn failure_does_not_stop_later_views() {
        let backend = Arc::new(ScriptedBackend::new(&[
            ("mv_a", Script::Fail("boom")),
            ("mv_b", Script::Rows(1)),
            ("mv_c", Script::Rows(2)),
        ]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales"), daily("mv_b", "sales"), daily("mv_c", "sales")],
            backend.clone(),
            OrchestratorSettings::default(),
        );

        let batch = orch.refresh_all(false, manual()).await.unwrap();

        assert_eq!(backend.calls(), vec!["mv_a", "mv_b", "mv_c"]);
        assert_eq!(batch.succeeded(), 2);
        assert_eq!(batch.failed().count(), 1);
    }

    #[tokio::test]
    async fn log_has_one_entry_per_view_plus_batch() {
        let backend = Arc::new(ScriptedBackend::new(&[
            ("mv_a", Script::Rows(3)),
            ("mv_b", Script::Fail("boom")),
            ("mv_c", Script::Rows(5)),
        ]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales"), daily("mv_b", "sales"), daily("mv_c", "stores")],
            backend,
            OrchestratorSettings::default(),
        );

        let batch = orch.refresh_all(true, manual()).await.unwrap();

        let entries = orch.store().list_logs(100).unwrap();
        assert_eq!(entries.len(), 1 + batch.outcomes.len());
        assert!(entries.iter().all(|e| e.status.is_terminal()));
        assert!(entries.iter().all(|e| e.completed_at.is_some()));

        let batch_entry = entries
            .iter()
            .find(|e| e.operation_type == OperationType::RefreshBatch)
            .unwrap();
        assert_eq!(batch_entry.status, OperationStatus::Success);
        assert_eq!(batch_entry.rows_affected, 3);
        assert_eq!(batch_entry.target_name.as_deref(), Some(batch.batch_id.as_str()));

        let failed_view = entries
            .iter()
            .find(|e| e.target_name.as_deref() == Some("mv_b"))
            .unwrap();
        assert_eq!(failed_view.status, OperationStatus::Failed);
        assert_eq!(failed_view.error_detail.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn unknown_view_fails_before_any_work() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(1))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend.clone(),
            OrchestratorSettings::default(),
        );
        let request = RefreshRequest {
            scope: "custom".to_string(),
            concurrent: false,
            trigger: manual(),
        };

        let err = orch
            .refresh(&["mv_a".to_string(), "mv_missing".to_string()], &request)
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshError::UnknownView(name) if name == "mv_missing"));
        assert!(backend.calls().is_empty());
        assert!(orch.store().list_logs(10).unwrap().is_empty());
        assert!(orch.get_refresh_history(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicates_refreshed_per_occurrence() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(4))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend.clone(),
            OrchestratorSettings::default(),
        );
        let request = RefreshRequest {
            scope: "custom".to_string(),
            concurrent: false,
            trigger: manual(),
        };

        let batch = orch
            .refresh(&["mv_a".to_string(), "mv_a".to_string()], &request)
            .await
            .unwrap();

        assert_eq!(batch.outcomes.len(), 2);
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn module_order_is_stable_across_runs() {
        let backend = Arc::new(ScriptedBackend::new(&[
            ("mv_sales_daily", Script::Rows(1)),
            ("mv_customer_summary", Script::Rows(1)),
            ("mv_sales_by_category", Script::Rows(1)),
            ("mv_sales_by_store", Script::Rows(1)),
        ]));
        let orch = orchestrator(
            vec![
                daily("mv_sales_daily", "sales"),
                daily("mv_customer_summary", "customers"),
                daily("mv_sales_by_category", "sales"),
                daily("mv_sales_by_store", "sales"),
            ],
            backend.clone(),
            OrchestratorSettings::default(),
        );

        for _ in 0..3 {
            let batch = orch.refresh_module("sales", false, manual()).await.unwrap();
            let order: Vec<&str> = batch.outcomes.iter().map(|o| o.view_name.as_str()).collect();
            assert_eq!(
                order,
                vec!["mv_sales_daily", "mv_sales_by_category", "mv_sales_by_store"]
            );
            assert_eq!(batch.scope, "sales");
        }
        assert_eq!(backend.calls().len(), 9);
    }

    #[tokio::test]
    async fn unknown_module_rejected() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(1))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend,
            OrchestratorSettings::default(),
        );

        let err = orch
            .refresh_module("finance", false, manual())
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::UnknownModule(m) if m == "finance"));
    }

    #[tokio::test]
    async fn timeout_is_recorded_as_failure() {
        let backend = Arc::new(ScriptedBackend::new(&[
            ("mv_slow", Script::Hang),
            ("mv_fast", Script::Rows(9)),
        ]));
        let orch = orchestrator(
            vec![daily("mv_slow", "sales"), daily("mv_fast", "sales")],
            backend,
            OrchestratorSettings {
                view_timeout: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        );

        let batch = orch.refresh_all(false, manual()).await.unwrap();

        assert_eq!(batch.outcomes[0].status, RefreshStatus::Failed);
        assert!(batch.outcomes[0].error.as_deref().unwrap().contains("timed out"));
        assert_eq!(batch.outcomes[1].status, RefreshStatus::Success);
        let entries = orch.store().list_logs(10).unwrap();
        assert!(entries.iter().all(|e| e.status.is_terminal()));
    }

    #[tokio::test]
    async fn metadata_failure_aborts_batch() {
        let storage = BreakableStorage::new();
        let backend = Arc::new(ScriptedBackend::new(&[
            ("mv_a", Script::BreakStore(3, storage.broken.clone())),
            ("mv_b", Script::Rows(4)),
        ]));
        let store = MetadataStore::with_backend(storage.clone()).unwrap();
        let registry =
            Arc::new(ViewRegistry::new(vec![daily("mv_a", "sales"), daily("mv_b", "sales")]).unwrap());
        let orch = Orchestrator::new(
            store,
            registry,
            backend.clone(),
            OrchestratorSettings::default(),
        )
        .unwrap();

        let err = orch.refresh_all(false, manual()).await.unwrap_err();
        assert!(matches!(err, RefreshError::Metadata(_)));
        assert_eq!(backend.calls(), vec!["mv_a"]);
        drop(orch);

        storage.broken.store(false, Ordering::SeqCst);
        let reopened = MetadataStore::with_backend(storage).unwrap();
        let entries = reopened.list_logs(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.status == OperationStatus::Failed));
        assert!(entries.iter().all(|e| e.completed_at.is_some()));
        assert!(reopened.refresh_history(10).unwrap().is_empty());
        let freshness = reopened.view_freshness("mv_a").unwrap().unwrap();
        assert_eq!(freshness.last_refreshed, None);
    }

    #[tokio::test]
    async fn stale_freshness_keeps_newer_catalog_entry() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(7))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend,
            OrchestratorSettings::default(),
        );
        let update = orch
            .store()
            .mark_refreshed("mv_a", u64::MAX, 99, Duration::from_millis(5))
            .unwrap();
        assert_eq!(update, FreshnessUpdate::Applied);

        let batch = orch.refresh_all(false, manual()).await.unwrap();

        assert_eq!(batch.outcomes[0].status, RefreshStatus::Success);
        assert_eq!(batch.outcomes[0].rows_after, Some(7));
        let freshness = orch.get_view_freshness("mv_a").unwrap();
        assert_eq!(freshness.last_refreshed, Some(u64::MAX));
        assert_eq!(freshness.last_row_count, Some(99));
    }

    #[tokio::test]
    async fn rows_before_tracks_previous_build() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(7))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend,
            OrchestratorSettings::default(),
        );

        let first = orch.refresh_all(false, manual()).await.unwrap();
        assert_eq!(first.outcomes[0].rows_before, None);
        let second = orch.refresh_all(false, manual()).await.unwrap();
        assert_eq!(second.outcomes[0].rows_before, Some(7));

        let history = orch.get_refresh_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].batch_id, second.batch_id);
        assert_eq!(history[1].batch_id, first.batch_id);
    }

    #[test]
    fn missing_recompute_rejected_at_startup() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(1))]));
        let store = MetadataStore::open_in_memory().unwrap();
        let registry =
            Arc::new(ViewRegistry::new(vec![daily("mv_a", "sales"), daily("mv_b", "sales")]).unwrap());

        let err = Orchestrator::new(store.clone(), registry, backend, OrchestratorSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, RefreshError::MissingRecompute(v) if v == "mv_b"));
        assert!(store.list_views().unwrap().is_empty());
    }

    #[tokio::test]
    async fn freshness_of_unknown_view() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(1))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend,
            OrchestratorSettings::default(),
        );
        assert!(matches!(
            orch.get_view_freshness("mv_zzz"),
            Err(RefreshError::UnknownView(_))
        ));
    }

    #[tokio::test]
    async fn quality_checks_need_a_checker() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(1))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend,
            OrchestratorSettings::default(),
        );
        assert!(matches!(
            orch.run_quality_checks().await,
            Err(RefreshError::NoQualityChecker)
        ));
    }

    #[tokio::test]
    async fn quality_pass_keeps_single_open_issue_per_check() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(1))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend,
            OrchestratorSettings::default(),
        )
        .with_quality_checker(Arc::new(FixedChecker(vec![
            finding("negative_order_totals", 3),
            finding("orders_missing_customer", 0),
        ])));

        orch.run_quality_checks().await.unwrap();
        let pass = orch.run_quality_checks().await.unwrap();

        assert_eq!(pass.issues.len(), 1);
        let open = orch.store().list_open_issues().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].check_name, "negative_order_totals");
        assert_eq!(open[0].affected_record_count, 3);

        let validations: Vec<_> = orch
            .store()
            .list_logs(10)
            .unwrap()
            .into_iter()
            .filter(|e| e.operation_type == OperationType::Validate)
            .collect();
        assert_eq!(validations.len(), 2);
        assert!(validations.iter().all(|e| e.status == OperationStatus::Success));
    }

    #[tokio::test]
    async fn passing_check_resolves_its_issue() {
        let store = MetadataStore::open_in_memory().unwrap();
        let registry = Arc::new(ViewRegistry::new(vec![daily("mv_a", "sales")]).unwrap());
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(1))]));

        let failing = Orchestrator::new(
            store.clone(),
            registry.clone(),
            backend.clone(),
            OrchestratorSettings::default(),
        )
        .unwrap()
        .with_quality_checker(Arc::new(FixedChecker(vec![finding("duplicate_customer_emails", 2)])));
        failing.run_quality_checks().await.unwrap();

        let passing = Orchestrator::new(store.clone(), registry, backend, OrchestratorSettings::default())
            .unwrap()
            .with_quality_checker(Arc::new(FixedChecker(vec![finding("duplicate_customer_emails", 0)])));
        let pass = passing.run_quality_checks().await.unwrap();

        assert_eq!(pass.resolved, 1);
        assert!(store.list_open_issues().unwrap().is_empty());
        let all = store.list_quality_issues().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, IssueStatus::Resolved);
    }

    #[tokio::test]
    async fn expired_issues_are_pruned_before_the_pass() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(1))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend,
            OrchestratorSettings::default(),
        )
        .with_quality_checker(Arc::new(FixedChecker(vec![finding("shipments_overdue", 1)])));

        let Ok(old) = finding("orders_not_recent", 5) else {
            unreachable!()
        };
        let ten_days_ago = epoch_millis() - 10 * MS_PER_DAY;
        orch.store().record_finding(&old, ten_days_ago).unwrap();

        let pass = orch.run_quality_checks().await.unwrap();

        assert_eq!(pass.pruned, 1);
        let remaining = orch.store().list_quality_issues().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].check_name, "shipments_overdue");
        let cutoff = epoch_millis() - 7 * MS_PER_DAY;
        assert!(remaining.iter().all(|i| i.detected_at >= cutoff));
    }

    #[tokio::test]
    async fn failed_checks_make_the_pass_partial() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(1))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend,
            OrchestratorSettings::default(),
        )
        .with_quality_checker(Arc::new(FixedChecker(vec![
            finding("negative_order_totals", 1),
            broken("shipments_overdue"),
        ])));

        let pass = orch.run_quality_checks().await.unwrap();

        assert_eq!(pass.status(), OperationStatus::Partial);
        let entry = &orch.store().list_logs(1).unwrap()[0];
        assert_eq!(entry.operation_type, OperationType::Validate);
        assert_eq!(entry.status, OperationStatus::Partial);
        assert!(entry.error_detail.as_deref().unwrap().contains("shipments_overdue"));
    }

    #[tokio::test]
    async fn batch_serializes_trigger_metadata() {
        let backend = Arc::new(ScriptedBackend::new(&[("mv_a", Script::Rows(2))]));
        let orch = orchestrator(
            vec![daily("mv_a", "sales")],
            backend,
            OrchestratorSettings::default(),
        );

        let batch = orch
            .refresh_all(false, RefreshTrigger::api("dashboard"))
            .await
            .unwrap();
        let json = serde_json::to_value(&batch).unwrap();

        assert_eq!(json["trigger_source"], "api");
        assert_eq!(json["triggered_by"], "dashboard");
        assert_eq!(json["outcomes"][0]["status"], "success");
        assert!(Uuid::parse_str(json["batch_id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn settings_from_config() {
        let config = MartviewConfig::from_toml_str(
            "[refresh]\nview_timeout = \"90s\"\n[quality]\nretention_days = 3\n",
        )
        .unwrap();
        let settings = OrchestratorSettings::from_config(&config).unwrap();
        assert_eq!(settings.view_timeout, Some(Duration::from_secs(90)));
        assert_eq!(settings.issue_retention, Duration::from_secs(3 * 86_400));
    }

    #[test]
    fn all_checks_failing_is_failed() {
        let pass = QualityPass {
            issues: Vec::new(),
            resolved: 0,
            pruned: 0,
            failures: vec![CheckFailure {
                check_name: "a".to_string(),
                message: "x".to_string(),
            }],
            checks_run: 1,
        };
        assert_eq!(pass.status(), OperationStatus::Failed);
    }
}
