//! Persistence boundary of the engine.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ProcessingState;
use common::judge_job::SubmissionTypeInfo;

use crate::error::Result;
use crate::models::{
    ParticipantScore, Problem, Submission, SubmissionForProcessing, Test, TestRun,
};

pub use memory::{MemoryStore, Seed};

/// Storage used by the pipeline.
///
/// Processing rows use optimistic concurrency: `save_processing` and
/// `apply_execution_result` only write when the stored `version` equals the
/// caller's copy, and return `false` otherwise.
#[async_trait]
pub trait JudgeStore: Send + Sync {
    async fn submission(&self, id: i32) -> Result<Option<Submission>>;

    async fn save_submission(&self, submission: &Submission) -> Result<()>;

    async fn problem(&self, id: i32) -> Result<Option<Problem>>;

    async fn problems(&self) -> Result<Vec<Problem>>;

    /// Tests of a problem ordered by `order_by`, then id.
    async fn tests_for_problem(&self, problem_id: i32) -> Result<Vec<Test>>;

    async fn submission_type(&self, id: i32) -> Result<Option<SubmissionTypeInfo>>;

    /// Non-deleted submissions of a problem.
    async fn submissions_for_problem(&self, problem_id: i32) -> Result<Vec<Submission>>;

    /// Non-deleted submissions of one participant on one problem.
    async fn participant_submissions(
        &self,
        participant_id: i32,
        problem_id: i32,
    ) -> Result<Vec<Submission>>;

    async fn processing(&self, submission_id: i32) -> Result<Option<SubmissionForProcessing>>;

    async fn save_processing(&self, row: &SubmissionForProcessing) -> Result<bool>;

    /// Rows in `state` whose last state change is at or before `changed_before`,
    /// oldest first.
    async fn processing_in_state(
        &self,
        state: ProcessingState,
        changed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SubmissionForProcessing>>;

    async fn test_runs(&self, submission_id: i32) -> Result<Vec<TestRun>>;

    /// Atomically replace the submission's test runs and write the
    /// submission and its processing row.
    async fn apply_execution_result(
        &self,
        submission: &Submission,
        test_runs: Vec<TestRun>,
        row: &SubmissionForProcessing,
    ) -> Result<bool>;

    async fn participant_score(
        &self,
        participant_id: i32,
        problem_id: i32,
    ) -> Result<Option<ParticipantScore>>;

    async fn participant_scores_for_problem(
        &self,
        problem_id: i32,
    ) -> Result<Vec<ParticipantScore>>;

    async fn save_participant_score(&self, score: &ParticipantScore) -> Result<()>;
}
