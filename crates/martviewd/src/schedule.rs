//! Periodic full refresh for `martviewd serve`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use martview_core::{ConfigError, MartviewConfig};
use martview_refresh::{Orchestrator, RefreshBatch, RefreshResult, RefreshTrigger};

pub struct RefreshSchedule {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    concurrent: bool,
    triggered_by: String,
    quality_before_refresh: bool,
}

impl RefreshSchedule {
    pub fn from_config(
        orchestrator: Arc<Orchestrator>,
        config: &MartviewConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            orchestrator,
            interval: config.refresh.schedule_interval()?,
            concurrent: config.refresh.concurrent,
            triggered_by: config.refresh.triggered_by.clone(),
            quality_before_refresh: config.refresh.quality_before_refresh,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One scheduled cycle: optional validation, then every view.
    pub async fn tick(&self) -> RefreshResult<RefreshBatch> {
        if self.quality_before_refresh {
            if let Err(e) = self.orchestrator.run_quality_checks().await {
                warn!(error = %e, "scheduled quality checks failed");
            }
        }
        self.orchestrator
            .refresh_all(
                self.concurrent,
                RefreshTrigger::scheduled(self.triggered_by.clone()),
            )
            .await
    }

    /// Run cycles every `interval` until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            concurrent = self.concurrent,
            "refresh schedule started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.tick().await {
                        Ok(batch) => info!(batch_id = %batch.batch_id, summary = %batch.summary(), "scheduled refresh finished"),
                        Err(e) => error!(error = %e, "scheduled refresh failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("refresh schedule shutting down");
                    break;
                }
            }
        }
    }
}

/// Wait for `signal`, then tell the schedule to stop. A failed signal
/// listener counts as a shutdown request.
pub async fn forward_shutdown<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal, stopping"),
    }
    let _ = shutdown.send(true);
}
