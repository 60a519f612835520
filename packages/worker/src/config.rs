use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{MqAppConfig, RetryConfig};

/// Worker-specific configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Unique identifier for this worker instance. Default: "worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Number of jobs judged in parallel. Default: 4.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Parent directory for per-submission workspaces. Default: "/tmp/judge-work".
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    /// Max captured bytes per stdout/stderr stream. Default: 16 MiB.
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,
    /// Watchdog sampling period. Default: 10.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Attempts made to delete a workspace before giving up. Default: 3.
    #[serde(default = "default_cleanup_attempts")]
    pub cleanup_attempts: u32,
}

fn default_worker_id() -> String {
    "worker-1".into()
}
fn default_concurrency() -> usize {
    4
}
fn default_work_root() -> PathBuf {
    PathBuf::from("/tmp/judge-work")
}
fn default_output_limit_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_cleanup_attempts() -> u32 {
    3
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            concurrency: default_concurrency(),
            work_root: default_work_root(),
            output_limit_bytes: default_output_limit_bytes(),
            poll_interval_ms: default_poll_interval_ms(),
            cleanup_attempts: default_cleanup_attempts(),
        }
    }
}

/// A program invocation with `{name}` placeholders in its arguments.
///
/// Recognised placeholders: `{source}`, `{output}`, `{workdir}`, and for
/// container harnesses `{endpoint}` and `{report}`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Substitute placeholders in the program and arguments.
    pub fn render(&self, vars: &[(&str, &str)]) -> (String, Vec<String>) {
        let substitute = |text: &str| {
            vars.iter().fold(text.to_string(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), value)
            })
        };
        (
            substitute(&self.program),
            self.args.iter().map(|a| substitute(a)).collect(),
        )
    }
}

/// How one language is built and run.
#[derive(Debug, Deserialize, Clone)]
pub struct ToolchainConfig {
    /// Compiler for compiled strategies, syntax check for interpreted ones.
    #[serde(default)]
    pub compile: Option<CommandTemplate>,
    pub run: CommandTemplate,
    /// Name the submitted source is written under. Default: "main".
    #[serde(default = "default_source_file_name")]
    pub source_file_name: String,
    /// Name of the compiler's output artefact. Default: "solution".
    #[serde(default = "default_output_file_name")]
    pub output_file_name: String,
    #[serde(default = "default_compile_time_limit_ms")]
    pub compile_time_limit_ms: u64,
    #[serde(default = "default_compile_memory_limit_bytes")]
    pub compile_memory_limit_bytes: u64,
}

fn default_source_file_name() -> String {
    "main".into()
}
fn default_output_file_name() -> String {
    "solution".into()
}
fn default_compile_time_limit_ms() -> u64 {
    10_000
}
fn default_compile_memory_limit_bytes() -> u64 {
    1024 * 1024 * 1024
}

/// A read-only bind mount added to every sandbox container.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MountConfig {
    pub host: PathBuf,
    pub container: String,
}

/// Container sandbox used by the E2E harness strategy.
#[derive(Debug, Deserialize, Clone)]
pub struct ContainerConfig {
    /// Default: "docker".
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    pub image: String,
    /// Port the served application listens on inside the container. Default: 80.
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    /// Where the submission is mounted inside the container. Default: "/usr/share/nginx/html".
    #[serde(default = "default_app_dir")]
    pub app_dir: String,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    /// Deadline for each readiness request. Default: 1000.
    #[serde(default = "default_readiness_request_timeout_ms")]
    pub readiness_request_timeout_ms: u64,
    /// Deadline for housekeeping `docker` calls (run, port, rm, ps). Default: 30000.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Default: 600000.
    #[serde(default = "default_pull_timeout_ms")]
    pub pull_timeout_ms: u64,
    /// Static analysis run inside the container before the harness.
    #[serde(default)]
    pub lint: Option<CommandTemplate>,
    /// Exceeding it fails the submission like a compile error. Default: 60000.
    #[serde(default = "default_lint_time_limit_ms")]
    pub lint_time_limit_ms: u64,
    /// Harness run on the host against `{endpoint}`, writing `{report}`.
    pub harness: CommandTemplate,
    /// Default: "report.json".
    #[serde(default = "default_report_file")]
    pub report_file: String,
    #[serde(default = "default_harness_time_limit_ms")]
    pub harness_time_limit_ms: u64,
    /// Sandboxes older than this are reaped regardless of owner. Default: 900.
    #[serde(default = "default_idle_max_age_secs")]
    pub idle_max_age_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_docker_bin() -> String {
    "docker".into()
}
fn default_container_port() -> u16 {
    80
}
fn default_app_dir() -> String {
    "/usr/share/nginx/html".into()
}
fn default_readiness_timeout_ms() -> u64 {
    30_000
}
fn default_readiness_request_timeout_ms() -> u64 {
    1_000
}
fn default_command_timeout_ms() -> u64 {
    30_000
}
fn default_pull_timeout_ms() -> u64 {
    600_000
}
fn default_lint_time_limit_ms() -> u64 {
    60_000
}
fn default_report_file() -> String {
    "report.json".into()
}
fn default_harness_time_limit_ms() -> u64 {
    300_000
}
fn default_idle_max_age_secs() -> u64 {
    900
}
fn default_reap_interval_secs() -> u64 {
    60
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Keyed by `SubmissionTypeInfo::toolchain`.
    #[serde(default)]
    pub toolchains: HashMap<String, ToolchainConfig>,
    #[serde(default)]
    pub container: Option<ContainerConfig>,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("JUDGE_CONFIG").unwrap_or_else(|_| "config/config".to_string());
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("worker.id", "worker-1")?
            .set_default("worker.concurrency", 4_i64)?
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
