use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResultType;
use crate::mq::Message;

/// Maximum length of expected/user output fragments carried back to the engine.
pub const OUTPUT_FRAGMENT_LENGTH: usize = 100;

/// Truncate `text` to at most `OUTPUT_FRAGMENT_LENGTH` characters.
pub fn truncate_fragment(text: &str) -> String {
    text.chars().take(OUTPUT_FRAGMENT_LENGTH).collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeSystemErrorInfo {
    /// Machine-readable error code (e.g., "SANDBOX_ERROR", "UNKNOWN_CHECKER").
    pub code: String,
    /// Human-readable error description.
    pub message: String,
}

impl JudgeSystemErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result for a single test case execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResultPayload {
    pub test_id: i32,
    pub is_trial: bool,
    pub time_used_ms: u64,
    pub memory_used_bytes: u64,
    pub result_type: ResultType,
    /// Process-level commentary (exit code, stderr excerpt, limit breach).
    pub execution_comment: Option<String>,
    pub checker_comment: Option<String>,
    pub expected_output_fragment: Option<String>,
    pub user_output_fragment: Option<String>,
}

/// Result of an ad-hoc run with a single input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputResultPayload {
    pub time_used_ms: u64,
    pub memory_used_bytes: u64,
    pub result_type: ResultType,
    pub output: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JudgeOutcome {
    Executed {
        compiled_successfully: bool,
        compiler_comment: Option<String>,
        /// Per-test results in battery order. Empty on compile failure.
        test_results: Vec<TestResultPayload>,
        /// Present only for ad-hoc runs.
        output: Option<OutputResultPayload>,
    },
    Failed {
        error: JudgeSystemErrorInfo,
        /// Infrastructure faults may be retried by the engine.
        retryable: bool,
        execution_details: Option<serde_json::Value>,
    },
}

/// Result from worker after judging a submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JudgeResult {
    /// Original job ID.
    pub job_id: String,
    pub submission_id: i32,
    pub worker_id: String,
    pub completed_at: DateTime<Utc>,
    pub outcome: JudgeOutcome,
}

impl JudgeResult {
    /// Create a result indicating a system failure.
    pub fn failed(
        job_id: String,
        submission_id: i32,
        worker_id: String,
        error: JudgeSystemErrorInfo,
        retryable: bool,
    ) -> Self {
        Self {
            job_id,
            submission_id,
            worker_id,
            completed_at: Utc::now(),
            outcome: JudgeOutcome::Failed {
                error,
                retryable,
                execution_details: None,
            },
        }
    }

    pub fn is_compiled_successfully(&self) -> bool {
        matches!(
            self.outcome,
            JudgeOutcome::Executed {
                compiled_successfully: true,
                ..
            }
        )
    }
}

/// Everything a worker sends back on the result queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum WorkerReport {
    /// The worker picked up the job.
    Started {
        job_id: String,
        submission_id: i32,
        worker_id: String,
        at: DateTime<Utc>,
    },
    Finished(JudgeResult),
}

impl WorkerReport {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Started { job_id, .. } => job_id,
            Self::Finished(result) => &result.job_id,
        }
    }

    pub fn submission_id(&self) -> i32 {
        match self {
            Self::Started { submission_id, .. } => *submission_id,
            Self::Finished(result) => result.submission_id,
        }
    }
}

impl Message for WorkerReport {
    fn message_type() -> &'static str {
        "worker_report"
    }

    fn message_id(&self) -> &str {
        self.job_id()
    }
}
