//! Execution strategies: how a submission type is built, run and checked.

pub mod compiled;
pub mod container;
pub mod factory;
pub mod interpreted;
pub mod program;

use std::sync::Arc;

use common::ResultType;
use common::judge_job::{ExecutionStrategyType, JobInput, JudgeJob, SubmissionCode, TestCaseData};
use tracing::debug;

use crate::error::JudgeError;
use crate::models::checker::{Checker, CheckerDetails};
use crate::models::workspace::WorkspaceManager;

pub use compiled::CompiledStrategy;
pub use container::ContainerStrategy;
pub use factory::StrategyFactory;
pub use interpreted::InterpretedStrategy;

/// Everything a strategy needs to judge one submission.
pub struct ExecutionContext {
    pub submission_id: i32,
    pub code: SubmissionCode,
    pub file_extension: Option<String>,
    pub input: JobInput,
    /// Hard limits, overhead included.
    pub time_limit_ms: u64,
    pub memory_limit_bytes: u64,
    pub checker: Arc<dyn Checker>,
}

impl ExecutionContext {
    /// Build a context, rejecting shapes no strategy can run.
    pub fn from_job(job: &JudgeJob, checker: Arc<dyn Checker>) -> Result<Self, JudgeError> {
        if let JobInput::Tests { tests } = &job.input {
            if tests.is_empty() {
                return Err(JudgeError::InvalidContext("test battery is empty".into()));
            }
        }
        if job.code.is_binary() && !job.submission_type.allow_binary_files {
            return Err(JudgeError::InvalidContext(format!(
                "submission type '{}' does not accept binary files",
                job.submission_type.name
            )));
        }
        let allowed = &job.submission_type.allowed_file_extensions;
        if let Some(ext) = &job.file_extension {
            if !allowed.is_empty() && !allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)) {
                return Err(JudgeError::InvalidContext(format!(
                    "file extension '{ext}' is not allowed"
                )));
            }
        }

        Ok(Self {
            submission_id: job.submission_id,
            code: job.code.clone(),
            file_extension: job.file_extension.clone(),
            input: job.input.clone(),
            time_limit_ms: job.effective_time_limit_ms(),
            memory_limit_bytes: job.effective_memory_limit_bytes(),
            checker,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub test_id: i32,
    pub is_trial: bool,
    pub is_open: bool,
    pub time_used_ms: u64,
    pub memory_used_bytes: u64,
    pub result_type: ResultType,
    pub execution_comment: Option<String>,
    pub checker_details: CheckerDetails,
}

impl TestResult {
    pub(crate) fn for_test(test: &TestCaseData, result_type: ResultType) -> Self {
        Self {
            test_id: test.id,
            is_trial: test.is_trial,
            is_open: test.is_open,
            time_used_ms: 0,
            memory_used_bytes: 0,
            result_type,
            execution_comment: None,
            checker_details: CheckerDetails::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputResult {
    pub time_used_ms: u64,
    pub memory_used_bytes: u64,
    pub result_type: ResultType,
    pub output: String,
}

/// What a strategy produced for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub is_compiled_successfully: bool,
    pub compiler_comment: Option<String>,
    /// In battery order; empty for ad-hoc runs and compile failures.
    pub test_results: Vec<TestResult>,
    pub output: Option<OutputResult>,
}

impl ExecutionResult {
    pub fn compile_failed(diagnostic: impl Into<String>) -> Self {
        Self {
            is_compiled_successfully: false,
            compiler_comment: Some(diagnostic.into()),
            test_results: Vec::new(),
            output: None,
        }
    }

    pub(crate) fn compiled(compiler_comment: Option<String>) -> Self {
        Self {
            is_compiled_successfully: true,
            compiler_comment,
            test_results: Vec::new(),
            output: None,
        }
    }
}

/// The strategy family, selected by `ExecutionStrategyType`.
pub enum ExecutionStrategy {
    Compiled(CompiledStrategy),
    Interpreted(InterpretedStrategy),
    Container(ContainerStrategy),
}

impl ExecutionStrategy {
    pub fn strategy_type(&self) -> ExecutionStrategyType {
        match self {
            Self::Compiled(_) => ExecutionStrategyType::CompileExecuteAndCheck,
            Self::Interpreted(_) => ExecutionStrategyType::InterpretExecuteAndCheck,
            Self::Container(_) => ExecutionStrategyType::ContainerE2eHarness,
        }
    }

    /// Judge in a fresh workspace that is deleted asynchronously afterwards.
    pub async fn safe_execute(
        &self,
        ctx: &ExecutionContext,
        workspaces: &WorkspaceManager,
    ) -> Result<ExecutionResult, JudgeError> {
        let workspace = workspaces
            .allocate(&format!("sub-{}", ctx.submission_id))
            .await?;
        debug!(
            submission_id = ctx.submission_id,
            strategy = %self.strategy_type(),
            workspace = %workspace.path().display(),
            "Executing submission"
        );

        match self {
            Self::Compiled(s) => program::run_program(s, ctx, &workspace).await,
            Self::Interpreted(s) => program::run_program(s, ctx, &workspace).await,
            Self::Container(s) => s.execute(ctx, &workspace).await,
        }
    }
}
