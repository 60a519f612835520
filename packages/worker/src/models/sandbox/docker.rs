use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Output;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::error::SandboxError;
use crate::config::ContainerConfig;

/// Label marking containers owned by the judge.
pub const SANDBOX_LABEL: &str = "judge.sandbox";
/// Label carrying the container's creation time (unix seconds).
pub const CREATED_LABEL: &str = "judge.created";

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A running sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub name: String,
    pub host_port: u16,
}

impl SandboxHandle {
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.host_port)
    }
}

/// Drives sandbox containers through the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    config: ContainerConfig,
}

impl DockerSandbox {
    pub fn new(config: ContainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.config.command_timeout_ms)
    }

    /// Run one `docker` CLI call; the child is killed once `limit` elapses.
    async fn docker<I, S>(&self, args: I, limit: Duration) -> Result<Output, SandboxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let output = Command::new(&self.config.docker_bin)
            .args(&args)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(limit, output).await {
            Ok(result) => result.map_err(|err| {
                SandboxError::Initialization(format!(
                    "failed to execute {}: {err}",
                    self.config.docker_bin
                ))
            }),
            Err(_) => {
                let command = args
                    .first()
                    .map(|a| a.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                warn!(command = %command, limit_ms, "docker call timed out");
                Err(SandboxError::Timeout { command, limit_ms })
            }
        }
    }

    /// Pull the image unless it is already present locally.
    pub async fn ensure_image(&self) -> Result<(), SandboxError> {
        let image = &self.config.image;
        let inspect = self
            .docker(["image", "inspect", image.as_str()], self.command_timeout())
            .await?;
        if inspect.status.success() {
            return Ok(());
        }

        info!(image = %image, "Pulling sandbox image");
        let pull = self
            .docker(
                ["pull", image.as_str()],
                Duration::from_millis(self.config.pull_timeout_ms),
            )
            .await?;
        if !pull.status.success() {
            return Err(SandboxError::Initialization(format!(
                "docker pull {image} failed: {}",
                String::from_utf8_lossy(&pull.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Start a container serving `app_dir` read-only on an ephemeral loopback port.
    pub async fn start(&self, name: &str, app_dir: &Path) -> Result<SandboxHandle, SandboxError> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            name.into(),
            "--label".into(),
            SANDBOX_LABEL.into(),
            "--label".into(),
            format!("{CREATED_LABEL}={}", Utc::now().timestamp()),
            "-p".into(),
            format!("127.0.0.1::{}", self.config.container_port),
            "-v".into(),
            format!("{}:{}:ro", app_dir.display(), self.config.app_dir),
        ];
        for mount in &self.config.mounts {
            args.push("-v".into());
            args.push(format!("{}:{}:ro", mount.host.display(), mount.container));
        }
        args.push(self.config.image.clone());

        let run = self.docker(&args, self.command_timeout()).await?;
        if !run.status.success() {
            return Err(SandboxError::Initialization(format!(
                "docker run failed: {}",
                String::from_utf8_lossy(&run.stderr).trim()
            )));
        }

        let port = self
            .docker(
                [
                    "port".to_string(),
                    name.to_string(),
                    format!("{}/tcp", self.config.container_port),
                ],
                self.command_timeout(),
            )
            .await?;
        let mapping = String::from_utf8_lossy(&port.stdout);
        let host_port = parse_port_mapping(&mapping).ok_or_else(|| {
            SandboxError::Initialization(format!("no published port for {name}: '{}'", mapping.trim()))
        })?;

        debug!(container = %name, host_port, "Sandbox started");
        Ok(SandboxHandle {
            name: name.to_string(),
            host_port,
        })
    }

    /// Poll the endpoint until it answers with a non-5xx status.
    pub async fn wait_ready(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.config.readiness_request_timeout_ms))
            .no_proxy()
            .build()
            .map_err(|e| SandboxError::Initialization(format!("http client: {e}")))?;
        let endpoint = handle.endpoint();

        let deadline = Instant::now() + Duration::from_millis(self.config.readiness_timeout_ms);
        while Instant::now() < deadline {
            if is_serving(&client, &endpoint).await {
                return Ok(());
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
        Err(SandboxError::NotReady(self.config.readiness_timeout_ms))
    }

    /// Run a command inside the container, killing the CLI after `limit`.
    pub async fn exec(
        &self,
        handle: &SandboxHandle,
        program: &str,
        args: &[String],
        limit: Duration,
    ) -> Result<Output, SandboxError> {
        let mut argv = vec!["exec".to_string(), handle.name.clone(), program.to_string()];
        argv.extend(args.iter().cloned());
        self.docker(&argv, limit).await.map_err(|e| match e {
            SandboxError::Initialization(msg) => SandboxError::Execution(msg),
            other => other,
        })
    }

    pub async fn remove(&self, name: &str) -> Result<(), SandboxError> {
        let rm = self.docker(["rm", "-f", name], self.command_timeout()).await?;
        if !rm.status.success() {
            return Err(SandboxError::Execution(format!(
                "docker rm {name} failed: {}",
                String::from_utf8_lossy(&rm.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Remove every judge container older than `max_age`, whoever started it.
    pub async fn reap_idle(&self, max_age: Duration) -> Result<usize, SandboxError> {
        let listing = self
            .docker(
                [
                    "ps".to_string(),
                    "-a".to_string(),
                    "--filter".to_string(),
                    format!("label={SANDBOX_LABEL}"),
                    "--format".to_string(),
                    format!("{{{{.Names}}}} {{{{.Label \"{CREATED_LABEL}\"}}}}"),
                ],
                self.command_timeout(),
            )
            .await?;
        if !listing.status.success() {
            return Err(SandboxError::Execution(format!(
                "docker ps failed: {}",
                String::from_utf8_lossy(&listing.stderr).trim()
            )));
        }

        let now = Utc::now().timestamp();
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let mut reaped = 0;
        for (name, created) in parse_sandbox_listing(&String::from_utf8_lossy(&listing.stdout)) {
            if now.saturating_sub(created) < max_age {
                continue;
            }
            match self.remove(&name).await {
                Ok(()) => {
                    info!(container = %name, age_secs = now - created, "Reaped idle sandbox");
                    reaped += 1;
                }
                Err(e) => warn!(container = %name, error = %e, "Failed to reap sandbox"),
            }
        }
        Ok(reaped)
    }
}

async fn is_serving(client: &reqwest::Client, endpoint: &str) -> bool {
    match client.get(endpoint).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_server_error() {
                debug!(%status, "Sandbox answered but is not ready");
            }
            !status.is_server_error()
        }
        Err(_) => false,
    }
}

/// Parse `docker port` output such as `127.0.0.1:49153`.
pub fn parse_port_mapping(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse().ok())
}

/// Parse `<name> <created>` lines; lines without a valid timestamp are skipped.
pub fn parse_sandbox_listing(output: &str) -> Vec<(String, i64)> {
    output
        .lines()
        .filter_map(|line| {
            let (name, created) = line.trim().split_once(' ')?;
            Some((name.to_string(), created.trim().parse().ok()?))
        })
        .collect()
}

/// Periodically reap sandboxes left behind by crashed workers.
pub async fn run_sandbox_reaper(sandbox: Arc<DockerSandbox>) {
    let interval = Duration::from_secs(sandbox.config().reap_interval_secs.max(1));
    let max_age = Duration::from_secs(sandbox.config().idle_max_age_secs);
    info!(
        interval_secs = interval.as_secs(),
        max_age_secs = max_age.as_secs(),
        "Starting sandbox reaper"
    );

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match sandbox.reap_idle(max_age).await {
            Ok(0) => {}
            Ok(count) => info!(count, "Sandbox reaper removed idle containers"),
            Err(e) => error!(error = %e, "Sandbox reaper run failed"),
        }
    }
}
