use chrono::{DateTime, Utc};
use common::ResultType;
use common::judge_job::{CheckerSpec, SubmissionCode, TestCaseData};
use common::judge_result::TestResultPayload;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: i32,
    pub maximum_points: i32,
    pub time_limit_ms: u64,
    pub memory_limit_bytes: u64,
    pub checker: CheckerSpec,
}

/// A hidden input/expected-output pair owned by a problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub id: i32,
    pub problem_id: i32,
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_trial: bool,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub hide_input: bool,
    #[serde(default)]
    pub order_by: i32,
}

impl From<&Test> for TestCaseData {
    fn from(test: &Test) -> Self {
        Self {
            id: test.id,
            input: test.input.clone(),
            expected_output: test.expected_output.clone(),
            is_trial: test.is_trial,
            is_open: test.is_open,
            hide_input: test.hide_input,
            order_by: test.order_by,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i32,
    pub problem_id: i32,
    pub participant_id: i32,
    pub submission_type_id: i32,
    pub code: SubmissionCode,
    #[serde(default)]
    pub file_extension: Option<String>,
    #[serde(default)]
    pub is_compiled_successfully: bool,
    #[serde(default)]
    pub compilation_comment: Option<String>,
    #[serde(default)]
    pub points: i32,
    /// Error text of the last failed judging attempt.
    #[serde(default)]
    pub processing_comment: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// The outcome of one test for one submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    pub submission_id: i32,
    pub test_id: i32,
    pub time_used_ms: u64,
    pub memory_used_bytes: u64,
    pub result_type: ResultType,
    pub execution_comment: Option<String>,
    pub checker_comment: Option<String>,
    pub expected_output_fragment: Option<String>,
    pub user_output_fragment: Option<String>,
}

impl TestRun {
    pub fn from_payload(submission_id: i32, payload: &TestResultPayload) -> Self {
        Self {
            submission_id,
            test_id: payload.test_id,
            time_used_ms: payload.time_used_ms,
            memory_used_bytes: payload.memory_used_bytes,
            result_type: payload.result_type,
            execution_comment: payload.execution_comment.clone(),
            checker_comment: payload.checker_comment.clone(),
            expected_output_fragment: payload.expected_output_fragment.clone(),
            user_output_fragment: payload.user_output_fragment.clone(),
        }
    }
}

/// Best points a participant reached on a problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantScore {
    pub participant_id: i32,
    pub problem_id: i32,
    pub submission_id: i32,
    pub points: i32,
}
