//! What a participant or an administrator gets to see of a judged submission.

use std::collections::HashMap;

use common::{ProcessingState, ResultType};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::models::{Submission, SubmissionForProcessing, Test, TestRun};
use crate::store::JudgeStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum SubmissionStatusView {
    Pending,
    Processing,
    CompilationFailed,
    Judged,
    Failed,
}

impl SubmissionStatusView {
    pub fn from_state(state: ProcessingState, compiled_successfully: bool) -> Self {
        match state {
            ProcessingState::Pending | ProcessingState::Enqueued => Self::Pending,
            ProcessingState::Processing => Self::Processing,
            ProcessingState::Processed if !compiled_successfully => Self::CompilationFailed,
            ProcessingState::Processed => Self::Judged,
            ProcessingState::Failed => Self::Failed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TestRunView {
    pub test_id: i32,
    pub order_by: i32,
    pub is_trial: bool,
    pub result_type: ResultType,
    pub time_used_ms: u64,
    pub memory_used_bytes: u64,
    pub execution_comment: Option<String>,
    pub checker_comment: Option<String>,
    pub input: Option<String>,
    pub expected_output_fragment: Option<String>,
    pub user_output_fragment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubmissionView {
    pub id: i32,
    pub problem_id: i32,
    pub participant_id: i32,
    pub status: SubmissionStatusView,
    /// Only known once judged.
    pub points: Option<i32>,
    pub compilation_comment: Option<String>,
    /// Failure text, shown to privileged viewers only.
    pub processing_comment: Option<String>,
    pub test_runs: Vec<TestRunView>,
}

/// Whether a viewer may see a test's input and output fragments.
pub fn details_visible(test: &Test, privileged: bool) -> bool {
    privileged || ((test.is_trial || test.is_open) && !test.hide_input)
}

/// Project a submission for a viewer. Runs for unknown tests are omitted.
pub fn project(
    submission: &Submission,
    row: &SubmissionForProcessing,
    tests: &[Test],
    runs: &[TestRun],
    privileged: bool,
) -> SubmissionView {
    let status = SubmissionStatusView::from_state(row.state, submission.is_compiled_successfully);
    let by_id: HashMap<i32, &Test> = tests.iter().map(|t| (t.id, t)).collect();

    let mut test_runs: Vec<TestRunView> = if status == SubmissionStatusView::Judged {
        runs.iter()
            .filter_map(|run| by_id.get(&run.test_id).map(|test| view_run(run, test, privileged)))
            .collect()
    } else {
        Vec::new()
    };
    test_runs.sort_by_key(|r| (r.order_by, r.test_id));

    SubmissionView {
        id: submission.id,
        problem_id: submission.problem_id,
        participant_id: submission.participant_id,
        status,
        points: matches!(
            status,
            SubmissionStatusView::Judged | SubmissionStatusView::CompilationFailed
        )
        .then_some(submission.points),
        compilation_comment: (status == SubmissionStatusView::CompilationFailed)
            .then(|| submission.compilation_comment.clone())
            .flatten(),
        processing_comment: privileged
            .then(|| submission.processing_comment.clone())
            .flatten(),
        test_runs,
    }
}

fn view_run(run: &TestRun, test: &Test, privileged: bool) -> TestRunView {
    let visible = details_visible(test, privileged);
    TestRunView {
        test_id: run.test_id,
        order_by: test.order_by,
        is_trial: test.is_trial,
        result_type: run.result_type,
        time_used_ms: run.time_used_ms,
        memory_used_bytes: run.memory_used_bytes,
        execution_comment: run.execution_comment.clone(),
        checker_comment: visible.then(|| run.checker_comment.clone()).flatten(),
        input: visible.then(|| test.input.clone()),
        expected_output_fragment: visible.then(|| run.expected_output_fragment.clone()).flatten(),
        user_output_fragment: visible.then(|| run.user_output_fragment.clone()).flatten(),
    }
}

/// Load and project a submission.
pub async fn load_submission_view(
    store: &dyn JudgeStore,
    submission_id: i32,
    privileged: bool,
) -> Result<SubmissionView> {
    let submission = match store.submission(submission_id).await? {
        Some(s) if !s.is_deleted || privileged => s,
        _ => return Err(EngineError::not_found("Submission", submission_id)),
    };
    let row = store
        .processing(submission_id)
        .await?
        .ok_or_else(|| EngineError::not_found("SubmissionForProcessing", submission_id))?;
    let tests = store.tests_for_problem(submission.problem_id).await?;
    let runs = store.test_runs(submission_id).await?;

    Ok(project(&submission, &row, &tests, &runs, privileged))
}
