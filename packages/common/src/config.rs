use serde::Deserialize;

/// App-level MQ configuration shared by the engine and the workers.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Queue for judge jobs (engine publishes, worker consumes). Default: "judge_jobs".
    #[serde(default = "default_mq_queue_name")]
    pub queue_name: String,
    /// Queue for worker reports (worker publishes, engine consumes). Default: "judge_results".
    #[serde(default = "default_mq_result_queue_name")]
    pub result_queue_name: String,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_mq_queue_name() -> String {
    "judge_jobs".into()
}
fn default_mq_result_queue_name() -> String {
    "judge_results".into()
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            queue_name: default_mq_queue_name(),
            result_queue_name: default_mq_result_queue_name(),
        }
    }
}

/// Retry policy for publishing worker reports.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// How often stale tracker entries are purged.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_max_retries() -> u8 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_cleanup_interval_secs() -> u64 {
    300
}
fn default_max_age_secs() -> u64 {
    3600
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_age_secs: default_max_age_secs(),
        }
    }
}
