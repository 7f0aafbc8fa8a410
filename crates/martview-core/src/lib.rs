//! martview-core — configuration shared by every martview crate.
//!
//! The configuration is loaded once at process start and handed to the
//! components that need thresholds or paths by reference. Nothing reads it
//! from ambient state.

pub mod config;
pub mod duration;

pub use config::{
    AnalyticsConfig, ApiConfig, ClvTiers, ConfigError, LogConfig, MartviewConfig, QualityConfig,
    RefreshConfig, SourceConfig, StoreConfig,
};
pub use duration::parse_duration;
