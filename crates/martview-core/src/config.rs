//! martview.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MartviewConfig {
    pub store: StoreConfig,
    pub source: SourceConfig,
    pub refresh: RefreshConfig,
    pub quality: QualityConfig,
    pub analytics: AnalyticsConfig,
    pub api: ApiConfig,
    pub log: LogConfig,
}

/// Location of the metadata store (view catalog, logs, history, issues).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Location of the operational retail database the views are derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub database: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Rebuild snapshots without locking out readers.
    pub concurrent: bool,
    /// Upper bound for a single view's recompute (e.g. "10m").
    pub view_timeout: Option<String>,
    /// Cadence of the scheduled refresh loop (e.g. "24h").
    pub schedule_interval: String,
    /// Recorded as `triggered_by` on scheduled batches.
    pub triggered_by: String,
    /// Run the quality checks ahead of each scheduled refresh.
    pub quality_before_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Issues detected longer ago than this are purged before each pass.
    pub retention_days: u32,
    /// Completed operation-log entries older than this are pruned.
    pub log_retention_days: u32,
    /// Orders above this total are flagged by the accuracy check.
    pub max_order_total: f64,
    /// Shipments in transit longer than this are flagged as overdue.
    pub late_shipment_days: u32,
    /// No new orders for this long flags the order feed as stale.
    pub stale_order_hours: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Fixed "today" for recency calculations; `None` means the wall clock.
    pub reference_date: Option<String>,
    pub clv_tiers: ClvTiers,
}

/// Lifetime-spend cutoffs for customer tiers, highest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClvTiers {
    pub platinum: f64,
    pub gold: f64,
    pub silver: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/martview/metadata.redb"),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("/var/lib/martview/retail.db"),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            concurrent: false,
            view_timeout: None,
            schedule_interval: "24h".to_string(),
            triggered_by: "martviewd".to_string(),
            quality_before_refresh: true,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            log_retention_days: 30,
            max_order_total: 10_000.0,
            late_shipment_days: 10,
            stale_order_hours: 48,
        }
    }
}

impl Default for ClvTiers {
    fn default() -> Self {
        Self {
            platinum: 5_000.0,
            gold: 2_000.0,
            silver: 500.0,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8480 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,martview=debug".to_string(),
            json: false,
        }
    }
}

impl MartviewConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MartviewConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings that would make the refresh loop or retention meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh.schedule_interval()?.is_zero() {
            return Err(ConfigError::Invalid(
                "refresh.schedule_interval must be greater than zero".to_string(),
            ));
        }
        if let Some(timeout) = self.refresh.view_timeout()? {
            if timeout.is_zero() {
                return Err(ConfigError::Invalid(
                    "refresh.view_timeout must be greater than zero".to_string(),
                ));
            }
        }
        if self.quality.retention_days == 0 {
            return Err(ConfigError::Invalid(
                "quality.retention_days must be at least 1".to_string(),
            ));
        }
        let tiers = &self.analytics.clv_tiers;
        if !(tiers.platinum > tiers.gold && tiers.gold > tiers.silver && tiers.silver >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "analytics.clv_tiers must be descending (platinum {} > gold {} > silver {} >= 0)",
                tiers.platinum, tiers.gold, tiers.silver
            )));
        }
        Ok(())
    }
}

impl RefreshConfig {
    pub fn schedule_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.schedule_interval).ok_or_else(|| ConfigError::Duration {
            field: "refresh.schedule_interval",
            value: self.schedule_interval.clone(),
        })
    }

    pub fn view_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        match &self.view_timeout {
            Some(raw) => parse_duration(raw)
                .map(Some)
                .ok_or_else(|| ConfigError::Duration {
                    field: "refresh.view_timeout",
                    value: raw.clone(),
                }),
            None => Ok(None),
        }
    }
}

impl QualityConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 86_400)
    }

    pub fn log_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.log_retention_days) * 86_400)
    }
}
