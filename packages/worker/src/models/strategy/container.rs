use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::ResultType;
use common::judge_job::{JobInput, SubmissionCode, TestCaseData};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::program::unpack;
use super::{ExecutionContext, ExecutionResult, TestResult};
use crate::error::JudgeError;
use crate::models::executor::{ExecutionLimits, ProcessExecutor};
use crate::models::sandbox::{DockerSandbox, SandboxError, SandboxHandle};
use crate::models::workspace::Workspace;

/// Name the text submission is served under.
const TEXT_ENTRY_FILE: &str = "index.html";

/// Report written by the E2E harness.
#[derive(Debug, Deserialize)]
pub struct HarnessReport {
    pub results: Vec<HarnessTestResult>,
}

#[derive(Debug, Deserialize)]
pub struct HarnessTestResult {
    pub test_id: i32,
    pub status: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub message: Option<String>,
}

impl HarnessTestResult {
    fn result_type(&self) -> ResultType {
        match self.status.to_ascii_lowercase().as_str() {
            "passed" | "pass" | "ok" => ResultType::CorrectAnswer,
            "failed" | "fail" => ResultType::WrongAnswer,
            "timedout" | "timeout" => ResultType::TimeLimit,
            _ => ResultType::RunTimeError,
        }
    }
}

/// Serve the submission from a container and run an E2E harness against it.
pub struct ContainerStrategy {
    sandbox: Arc<DockerSandbox>,
    executor: ProcessExecutor,
}

impl ContainerStrategy {
    pub fn new(sandbox: Arc<DockerSandbox>, executor: ProcessExecutor) -> Self {
        Self { sandbox, executor }
    }

    #[instrument(skip_all, fields(submission_id = ctx.submission_id))]
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        workspace: &Workspace,
    ) -> Result<ExecutionResult, JudgeError> {
        let JobInput::Tests { tests } = &ctx.input else {
            return Err(JudgeError::InvalidContext(
                "container harness needs a test battery".into(),
            ));
        };

        let app_dir = workspace.join("app");
        tokio::fs::create_dir_all(&app_dir).await?;
        match &ctx.code {
            SubmissionCode::Text { content } => {
                tokio::fs::write(app_dir.join(TEXT_ENTRY_FILE), content).await?;
            }
            SubmissionCode::Binary { content } => {
                if let Err(e) = unpack(content.clone(), app_dir.clone()).await? {
                    return Ok(ExecutionResult::compile_failed(e.to_string()));
                }
            }
        }

        self.sandbox.ensure_image().await?;

        let name = format!("judge-sbx-{}-{}", ctx.submission_id, Uuid::new_v4().simple());
        let outcome = self.run_in_sandbox(&name, &app_dir, tests, workspace).await;

        // Teardown always runs; its failure never replaces the outcome.
        if let Err(e) = self.sandbox.remove(&name).await {
            warn!(container = %name, error = %e, "Failed to tear down sandbox");
        }

        outcome
    }

    async fn run_in_sandbox(
        &self,
        name: &str,
        app_dir: &Path,
        tests: &[TestCaseData],
        workspace: &Workspace,
    ) -> Result<ExecutionResult, JudgeError> {
        let config = self.sandbox.config();
        let handle = self.sandbox.start(name, app_dir).await?;
        self.sandbox.wait_ready(&handle).await?;

        let mut compiler_comment = None;
        if let Some(lint) = &config.lint {
            let (program, args) = lint.render(&[("workdir", config.app_dir.as_str())]);
            let limit = Duration::from_millis(config.lint_time_limit_ms);
            let output = match self.sandbox.exec(&handle, &program, &args, limit).await {
                Ok(output) => output,
                Err(SandboxError::Timeout { limit_ms, .. }) => {
                    info!(container = %name, limit_ms, "Lint timed out");
                    return Ok(ExecutionResult::compile_failed(format!(
                        "Lint exceeded its time limit of {limit_ms} ms"
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            let text = [
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            ]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
            if !output.status.success() {
                info!(container = %name, "Lint failed");
                return Ok(ExecutionResult::compile_failed(text));
            }
            compiler_comment = (!text.is_empty()).then_some(text);
        }

        let report = self.run_harness(&handle, workspace).await?;
        let mut result = ExecutionResult::compiled(compiler_comment);
        result.test_results = map_report(tests, report);
        Ok(result)
    }

    async fn run_harness(
        &self,
        handle: &SandboxHandle,
        workspace: &Workspace,
    ) -> Result<HarnessReport, JudgeError> {
        let config = self.sandbox.config();
        let report_path = workspace.join(&config.report_file);
        let endpoint = handle.endpoint();
        let (report, workdir) = (
            report_path.to_string_lossy(),
            workspace.path().to_string_lossy(),
        );
        let (program, args) = config.harness.render(&[
            ("endpoint", endpoint.as_str()),
            ("report", &*report),
            ("workdir", &*workdir),
        ]);

        let limits = ExecutionLimits {
            time_limit: Duration::from_millis(config.harness_time_limit_ms),
            memory_limit_bytes: u64::MAX,
        };
        let run = self
            .executor
            .execute(&program, &args, "", limits, workspace.path())
            .await?;

        let raw = tokio::fs::read_to_string(&report_path).await.map_err(|e| {
            SandboxError::Report(format!(
                "harness produced no report ({}): {e}",
                run.describe().unwrap_or_else(|| "exited normally".into())
            ))
        })?;
        parse_report(&raw).map_err(JudgeError::from)
    }
}

pub fn parse_report(raw: &str) -> Result<HarnessReport, SandboxError> {
    serde_json::from_str(raw).map_err(|e| SandboxError::Report(e.to_string()))
}

/// One result per test in battery order; tests the harness skipped are wrong.
pub fn map_report(tests: &[TestCaseData], report: HarnessReport) -> Vec<TestResult> {
    let mut by_id: HashMap<i32, HarnessTestResult> = report
        .results
        .into_iter()
        .map(|r| (r.test_id, r))
        .collect();

    tests
        .iter()
        .map(|test| match by_id.remove(&test.id) {
            Some(entry) => {
                let mut result = TestResult::for_test(test, entry.result_type());
                result.time_used_ms = entry.duration_ms;
                result.checker_details.comment = entry.message;
                result
            }
            None => {
                let mut result = TestResult::for_test(test, ResultType::WrongAnswer);
                result.checker_details.comment = Some("No result reported by harness".into());
                result
            }
        })
        .collect()
}
