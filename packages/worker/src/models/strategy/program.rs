//! The compile/run/check skeleton shared by compiled and interpreted strategies.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::ResultType;
use common::judge_job::{JobInput, SubmissionCode, TestCaseData};
use tracing::{debug, info};

use super::{ExecutionContext, ExecutionResult, OutputResult, TestResult};
use crate::config::ToolchainConfig;
use crate::error::JudgeError;
use crate::models::archive::{ArchiveError, extract_zip};
use crate::models::checker::{Checker, check_safely};
use crate::models::executor::{
    ExecutionLimits, ProcessExecutionResult, ProcessExecutor, ProcessResultType,
};
use crate::models::workspace::Workspace;

/// Outcome of the build step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Ready to run with this command line.
    Ready {
        program: String,
        args: Vec<String>,
        /// Compiler warnings worth surfacing.
        comment: Option<String>,
    },
    /// A judged compile failure; no tests are run.
    Failed { diagnostic: String },
}

/// Strategy-specific steps plugged into [`run_program`].
#[async_trait]
pub trait ProgramHooks: Send + Sync {
    fn toolchain(&self) -> &ToolchainConfig;

    fn executor(&self) -> &ProcessExecutor;

    /// Normalise submitted source text before it is written.
    fn preprocess(&self, code: &str) -> String {
        code.to_string()
    }

    /// Turn the written source into something runnable.
    async fn build(&self, workspace: &Workspace, source: &Path) -> Result<BuildOutcome, JudgeError>;
}

/// Write the submission, build it, then run and check every test in order.
pub async fn run_program<H: ProgramHooks>(
    hooks: &H,
    ctx: &ExecutionContext,
    workspace: &Workspace,
) -> Result<ExecutionResult, JudgeError> {
    let source = match write_submission(hooks, ctx, workspace).await? {
        Ok(source) => source,
        Err(diagnostic) => return Ok(ExecutionResult::compile_failed(diagnostic)),
    };

    let (program, args, comment) = match hooks.build(workspace, &source).await? {
        BuildOutcome::Ready {
            program,
            args,
            comment,
        } => (program, args, comment),
        BuildOutcome::Failed { diagnostic } => {
            info!(submission_id = ctx.submission_id, "Compilation failed");
            return Ok(ExecutionResult::compile_failed(diagnostic));
        }
    };

    let limits = ExecutionLimits::new(ctx.time_limit_ms, ctx.memory_limit_bytes);
    let mut result = ExecutionResult::compiled(comment);

    match &ctx.input {
        JobInput::Simple { input } => {
            let run = hooks
                .executor()
                .execute(&program, &args, input, limits, workspace.path())
                .await?;
            result.output = Some(OutputResult {
                time_used_ms: run.time_worked.as_millis() as u64,
                memory_used_bytes: run.memory_used,
                result_type: process_result_type(&run).unwrap_or(ResultType::CorrectAnswer),
                output: run.received_output,
            });
        }
        JobInput::Tests { tests } => {
            for test in tests {
                let run = hooks
                    .executor()
                    .execute(&program, &args, &test.input, limits, workspace.path())
                    .await?;
                let test_result = check_test(test, &run, ctx.checker.as_ref());
                debug!(
                    submission_id = ctx.submission_id,
                    test_id = test.id,
                    result = %test_result.result_type,
                    time_ms = test_result.time_used_ms,
                    "Test finished"
                );
                result.test_results.push(test_result);
            }
        }
    }

    Ok(result)
}

/// Map a process outcome that needs no checker. `None` means the run succeeded.
fn process_result_type(run: &ProcessExecutionResult) -> Option<ResultType> {
    match run.result_type {
        ProcessResultType::Success => None,
        ProcessResultType::RunTimeError => Some(ResultType::RunTimeError),
        ProcessResultType::TimeLimit => Some(ResultType::TimeLimit),
        ProcessResultType::MemoryLimit => Some(ResultType::MemoryLimit),
    }
}

/// Build a test result, consulting the checker only for clean runs.
pub(crate) fn check_test(
    test: &TestCaseData,
    run: &ProcessExecutionResult,
    checker: &dyn Checker,
) -> TestResult {
    let mut result = TestResult::for_test(test, ResultType::CorrectAnswer);
    result.time_used_ms = run.time_worked.as_millis() as u64;
    result.memory_used_bytes = run.memory_used;
    result.execution_comment = run.describe();

    if let Some(result_type) = process_result_type(run) {
        result.result_type = result_type;
        return result;
    }

    let checked = check_safely(
        checker,
        &test.input,
        &run.received_output,
        &test.expected_output,
        test.is_trial,
    );
    if !checked.is_correct {
        result.result_type = ResultType::WrongAnswer;
    }
    result.checker_details = checked.details;
    result
}

/// Place the submission in the workspace.
///
/// The inner `Err` is a judged failure (bad archive) rather than a fault.
async fn write_submission<H: ProgramHooks>(
    hooks: &H,
    ctx: &ExecutionContext,
    workspace: &Workspace,
) -> Result<Result<PathBuf, String>, JudgeError> {
    let source_name = &hooks.toolchain().source_file_name;
    let source = workspace.join(source_name);

    match &ctx.code {
        SubmissionCode::Text { content } => {
            tokio::fs::write(&source, hooks.preprocess(content)).await?;
            Ok(Ok(source))
        }
        SubmissionCode::Binary { content } => {
            match unpack(content.clone(), workspace.path().to_path_buf()).await? {
                Ok(_) if source.is_file() => Ok(Ok(source)),
                Ok(_) => Ok(Err(format!("Archive does not contain '{source_name}'"))),
                Err(e) => Ok(Err(e.to_string())),
            }
        }
    }
}

/// Extract on the blocking pool. IO faults surface as errors, archive
/// problems as the inner `Err`.
pub(crate) async fn unpack(
    data: Vec<u8>,
    target: PathBuf,
) -> Result<Result<Vec<PathBuf>, ArchiveError>, JudgeError> {
    let extracted = tokio::task::spawn_blocking(move || extract_zip(&data, &target))
        .await
        .map_err(|e| JudgeError::Workspace(std::io::Error::other(e)))?;
    match extracted {
        Err(ArchiveError::Io(e)) => Err(JudgeError::Workspace(e)),
        other => Ok(other),
    }
}

/// Result of a compiler or syntax-check invocation.
pub(crate) enum StepOutcome {
    Passed { comment: Option<String> },
    Failed { diagnostic: String },
}

/// Run a toolchain step (compiler or syntax check) in the workspace.
pub(crate) async fn run_build_step(
    hooks: &(impl ProgramHooks + ?Sized),
    workspace: &Workspace,
    program: &str,
    args: &[String],
) -> Result<StepOutcome, JudgeError> {
    let toolchain = hooks.toolchain();
    let limits = ExecutionLimits::new(
        toolchain.compile_time_limit_ms,
        toolchain.compile_memory_limit_bytes,
    );
    let run = hooks
        .executor()
        .execute(program, args, "", limits, workspace.path())
        .await?;

    let diagnostics = [run.error_output.trim(), run.received_output.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if run.is_success() {
        return Ok(StepOutcome::Passed {
            comment: (!diagnostics.is_empty()).then_some(diagnostics),
        });
    }

    let diagnostic = match (run.describe(), diagnostics.is_empty()) {
        (Some(reason), true) => reason,
        (Some(reason), false) if run.result_type != ProcessResultType::RunTimeError => {
            format!("{reason}\n{diagnostics}")
        }
        _ => diagnostics,
    };
    Ok(StepOutcome::Failed { diagnostic })
}

/// Placeholder values for toolchain templates.
pub(crate) fn template_vars<'a>(
    source: &'a str,
    output: &'a str,
    workdir: &'a str,
) -> [(&'static str, &'a str); 3] {
    [("source", source), ("output", output), ("workdir", workdir)]
}
