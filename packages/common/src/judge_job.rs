use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mq::Message;

/// How a submission type is compiled and run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategyType {
    /// Compile with a toolchain compiler, then run the produced program.
    CompileExecuteAndCheck,
    /// Run the source through an interpreter.
    InterpretExecuteAndCheck,
    /// Serve the submission from a container and run an E2E harness against it.
    ContainerE2eHarness,
}

impl ExecutionStrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompileExecuteAndCheck => "compile_execute_and_check",
            Self::InterpretExecuteAndCheck => "interpret_execute_and_check",
            Self::ContainerE2eHarness => "container_e2e_harness",
        }
    }
}

impl std::fmt::Display for ExecutionStrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission type as resolved by the engine for a single job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionTypeInfo {
    pub id: i32,
    pub name: String,
    pub strategy: ExecutionStrategyType,
    /// Key into the worker's toolchain table (e.g. "gpp", "python3").
    pub toolchain: String,
    pub allow_binary_files: bool,
    pub allowed_file_extensions: Vec<String>,
    /// Added to the problem time limit.
    pub base_time_used_ms: u64,
    /// Added to the problem memory limit.
    pub base_memory_used_bytes: u64,
}

/// Candidate code: source text or an uploaded archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmissionCode {
    Text { content: String },
    Binary { content: Vec<u8> },
}

impl SubmissionCode {
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary { .. })
    }
}

/// Checker identity: a registered verification routine plus its parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerSpec {
    /// Optional module the checker was registered from.
    pub module: Option<String>,
    /// Registered type name (e.g. "TrimChecker").
    pub type_name: String,
    pub parameter: Option<String>,
}

impl CheckerSpec {
    pub fn named(type_name: impl Into<String>) -> Self {
        Self {
            module: None,
            type_name: type_name.into(),
            parameter: None,
        }
    }

    pub fn registry_key(&self) -> String {
        match &self.module {
            Some(module) => format!("{}::{}", module, self.type_name),
            None => self.type_name.clone(),
        }
    }
}

/// Test case data needed for judging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseData {
    pub id: i32,
    pub input: String,
    pub expected_output: String,
    pub is_trial: bool,
    pub is_open: bool,
    pub hide_input: bool,
    pub order_by: i32,
}

/// Either a full battery or a single ad-hoc input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobInput {
    Tests { tests: Vec<TestCaseData> },
    Simple { input: String },
}

/// A judge job message sent to the worker queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeJob {
    /// Job identifier (UUID), unique per enqueue.
    pub job_id: String,
    pub submission_id: i32,
    pub problem_id: i32,
    pub submission_type: SubmissionTypeInfo,
    pub code: SubmissionCode,
    pub file_extension: Option<String>,
    /// Attach output fragments for every test, not just trial/open ones.
    pub verbose: bool,
    pub checker: CheckerSpec,
    pub time_limit_ms: u64,
    pub memory_limit_bytes: u64,
    pub input: JobInput,
}

impl JudgeJob {
    /// Create a new judge job with a generated UUID.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        submission_id: i32,
        problem_id: i32,
        submission_type: SubmissionTypeInfo,
        code: SubmissionCode,
        file_extension: Option<String>,
        verbose: bool,
        checker: CheckerSpec,
        time_limit_ms: u64,
        memory_limit_bytes: u64,
        input: JobInput,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            submission_id,
            problem_id,
            submission_type,
            code,
            file_extension,
            verbose,
            checker,
            time_limit_ms,
            memory_limit_bytes,
            input,
        }
    }

    /// Test ids in battery order. Empty for ad-hoc jobs.
    pub fn test_ids(&self) -> Vec<i32> {
        match &self.input {
            JobInput::Tests { tests } => tests.iter().map(|t| t.id).collect(),
            JobInput::Simple { .. } => vec![],
        }
    }

    /// Hard time limit including the submission type overhead.
    pub fn effective_time_limit_ms(&self) -> u64 {
        self.time_limit_ms
            .saturating_add(self.submission_type.base_time_used_ms)
    }

    /// Hard memory limit including the submission type overhead.
    pub fn effective_memory_limit_bytes(&self) -> u64 {
        self.memory_limit_bytes
            .saturating_add(self.submission_type.base_memory_used_bytes)
    }
}

impl Message for JudgeJob {
    fn message_type() -> &'static str {
        "judge_job"
    }

    fn message_id(&self) -> &str {
        &self.job_id
    }
}
