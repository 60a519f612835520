use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::ResultType;
use common::judge_job::{ExecutionStrategyType, JobInput};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use worker::JudgeError;
use worker::config::ContainerConfig;
use worker::models::checker::TrimChecker;
use worker::models::sandbox::{DockerSandbox, SandboxError};
use worker::models::strategy::{ExecutionContext, ExecutionResult, StrategyFactory};

use crate::support;

/// A `docker` stand-in that logs every invocation and serves a fixed script per
/// subcommand.
struct FakeDocker {
    dir: TempDir,
    bin: PathBuf,
}

impl FakeDocker {
    /// `run` and `exec` are shell snippets; `ps` is the listing to print.
    fn new(port: u16, run: &str, exec: &str, ps: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("calls.log");
        let bin = dir.path().join("docker");
        let script = format!(
            "#!/bin/sh\n\
             echo \"$*\" >> '{log}'\n\
             case \"$1\" in\n\
             image) exit 0 ;;\n\
             run) {run} ;;\n\
             port) echo '127.0.0.1:{port}' ;;\n\
             exec) {exec} ;;\n\
             ps) printf '{ps}' ;;\n\
             rm) exit 0 ;;\n\
             esac\n",
            log = log.display(),
        );
        std::fs::write(&bin, script).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, bin }
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn removed(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("rm -f ").map(str::to_string))
            .collect()
    }

    fn config(&self, lint: bool, harness_script: &str) -> ContainerConfig {
        let mut config = serde_json::json!({
            "docker_bin": self.bin.to_str().unwrap(),
            "image": "nginx:alpine",
            "readiness_timeout_ms": 5_000,
            "lint_time_limit_ms": 300,
            "command_timeout_ms": 5_000,
            "harness": { "program": "/bin/sh", "args": ["-c", harness_script] },
        });
        if lint {
            config["lint"] = serde_json::json!({ "program": "htmlhint", "args": ["{workdir}"] });
        }
        serde_json::from_value(config).unwrap()
    }
}

/// A loopback HTTP server that always answers `200`.
async fn serve_ok() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
            let _ = stream.shutdown().await;
        }
    });
    port
}

const REPORT_HARNESS: &str = r#"printf '{"results":[{"test_id":1,"status":"passed","duration_ms":9},{"test_id":2,"status":"failed","message":"title missing"}]}' > {report}"#;

async fn judge(config: &ContainerConfig) -> Result<ExecutionResult, JudgeError> {
    let factory = StrategyFactory::new(&HashMap::new(), Some(config), &support::executor())
        .expect("fake docker must resolve");
    let strategy = factory
        .for_submission_type(&support::submission_type(
            ExecutionStrategyType::ContainerE2eHarness,
            "web",
        ))
        .unwrap();
    let (workspaces, _dir) = support::workspaces();

    let job = support::job(
        ExecutionStrategyType::ContainerE2eHarness,
        "web",
        "<html><title>sum</title></html>",
        JobInput::Tests {
            tests: vec![
                support::test_case(1, "", ""),
                support::test_case(2, "", ""),
            ],
        },
    );
    let ctx = ExecutionContext::from_job(&job, Arc::new(TrimChecker)).unwrap();
    strategy.safe_execute(&ctx, &workspaces).await
}

fn assert_torn_down(docker: &FakeDocker) {
    let removed = docker.removed();
    assert_eq!(removed.len(), 1, "calls: {:?}", docker.calls());
    assert!(removed[0].starts_with("judge-sbx-7-"));
}

#[tokio::test]
async fn harness_report_is_mapped_and_sandbox_removed() {
    let docker = FakeDocker::new(serve_ok().await, "exit 0", "echo 'no issues'", "");
    let result = judge(&docker.config(true, REPORT_HARNESS)).await.unwrap();

    assert!(result.is_compiled_successfully);
    assert_eq!(result.compiler_comment.as_deref(), Some("no issues"));
    let kinds: Vec<_> = result.test_results.iter().map(|r| r.result_type).collect();
    assert_eq!(kinds, vec![ResultType::CorrectAnswer, ResultType::WrongAnswer]);
    assert_torn_down(&docker);
}

#[tokio::test]
async fn failing_lint_is_a_compilation_failure() {
    let docker = FakeDocker::new(
        serve_ok().await,
        "exit 0",
        "echo 'index.html:1 tag not closed' >&2; exit 1",
        "",
    );
    let result = judge(&docker.config(true, REPORT_HARNESS)).await.unwrap();

    assert!(!result.is_compiled_successfully);
    assert!(result.test_results.is_empty());
    assert!(
        result
            .compiler_comment
            .unwrap()
            .contains("tag not closed")
    );
    assert_torn_down(&docker);
}

#[tokio::test]
async fn hanging_lint_is_cut_off_at_its_time_limit() {
    let docker = FakeDocker::new(serve_ok().await, "exit 0", "exec sleep 30", "");
    let started = Instant::now();
    let result = judge(&docker.config(true, REPORT_HARNESS)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!result.is_compiled_successfully);
    assert!(result.test_results.is_empty());
    assert!(result.compiler_comment.unwrap().contains("300 ms"));
    assert_torn_down(&docker);
}

#[tokio::test]
async fn failed_start_still_removes_the_container() {
    let docker = FakeDocker::new(
        serve_ok().await,
        "echo 'port is already allocated' >&2; exit 125",
        "exit 0",
        "",
    );
    let err = judge(&docker.config(false, REPORT_HARNESS)).await.unwrap_err();

    assert!(matches!(
        err,
        JudgeError::Sandbox(SandboxError::Initialization(ref msg)) if msg.contains("already allocated")
    ));
    assert!(err.is_retryable());
    assert_torn_down(&docker);
}

#[tokio::test]
async fn harness_without_report_still_removes_the_container() {
    let docker = FakeDocker::new(serve_ok().await, "exit 0", "exit 0", "");
    let err = judge(&docker.config(false, "exit 1")).await.unwrap_err();

    assert!(matches!(err, JudgeError::Sandbox(SandboxError::Report(_))));
    assert_torn_down(&docker);
}

#[tokio::test]
async fn hanging_docker_cli_times_out() {
    let docker = FakeDocker::new(0, "exec sleep 30", "exit 0", "");
    let mut config = docker.config(false, REPORT_HARNESS);
    config.command_timeout_ms = 300;
    let sandbox = DockerSandbox::new(config);

    let started = Instant::now();
    let err = sandbox
        .start("judge-sbx-1-stuck", docker.dir.path())
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(
        err,
        SandboxError::Timeout { ref command, limit_ms: 300 } if command == "run"
    ));
}

#[tokio::test]
async fn reaper_removes_only_expired_sandboxes() {
    let now = Utc::now().timestamp();
    let listing = format!(
        "judge-sbx-1-old {}\\njudge-sbx-2-fresh {}\\njudge-sbx-3-older {}\\n",
        now - 2_000,
        now - 10,
        now - 100_000
    );
    let docker = FakeDocker::new(0, "exit 0", "exit 0", &listing);
    let sandbox = DockerSandbox::new(docker.config(false, REPORT_HARNESS));

    let reaped = sandbox.reap_idle(Duration::from_secs(900)).await.unwrap();

    assert_eq!(reaped, 2);
    let mut removed = docker.removed();
    removed.sort();
    assert_eq!(removed, vec!["judge-sbx-1-old", "judge-sbx-3-older"]);
    assert!(docker.calls()[0].starts_with("ps -a --filter label=judge.sandbox"));
}
