use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::MqAppConfig;

/// Staleness thresholds for the reconciliation sweep.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    /// Default: 30.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// A `Pending` row untouched this long is published again. Default: 60.
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
    /// An `Enqueued` row no worker picked up this long is requeued. Default: 300.
    #[serde(default = "default_enqueued_timeout_secs")]
    pub enqueued_timeout_secs: u64,
    /// A `Processing` row is treated as lost after this long. Default: 900.
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,
    /// Requeues allowed before a row is failed as stuck. Default: 5.
    #[serde(default = "default_max_requeue_attempts")]
    pub max_requeue_attempts: u32,
    /// Max rows handled per state per sweep. Default: 100.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_scan_interval_secs() -> u64 {
    30
}
fn default_pending_timeout_secs() -> u64 {
    60
}
fn default_enqueued_timeout_secs() -> u64 {
    300
}
fn default_processing_timeout_secs() -> u64 {
    900
}
fn default_max_requeue_attempts() -> u32 {
    5
}
fn default_batch_size() -> usize {
    100
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            pending_timeout_secs: default_pending_timeout_secs(),
            enqueued_timeout_secs: default_enqueued_timeout_secs(),
            processing_timeout_secs: default_processing_timeout_secs(),
            max_requeue_attempts: default_max_requeue_attempts(),
            batch_size: default_batch_size(),
        }
    }
}

impl ReconciliationConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    /// How often points are clamped to the problem maximum. Default: 3600.
    #[serde(default = "default_normalization_interval_secs")]
    pub normalization_interval_secs: u64,
}

fn default_normalization_interval_secs() -> u64 {
    3600
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            normalization_interval_secs: default_normalization_interval_secs(),
        }
    }
}

/// Development store settings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// JSON file of problems, tests, submission types and submissions
    /// loaded into the in-memory store at startup.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
}

/// Engine application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineAppConfig {
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl EngineAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("JUDGE_CONFIG").unwrap_or_else(|_| "config/config".to_string());
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("mq.url", "redis://localhost:6379")?
            .set_default("mq.pool_size", 5_i64)?
            .set_default("mq.queue_name", "judge_jobs")?
            .set_default("mq.result_queue_name", "judge_results")?
            .add_source(File::with_name(config_path).required(false))
            .add_source(Environment::with_prefix("JUDGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
