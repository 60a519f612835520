use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ProcessingState;
use common::judge_job::SubmissionTypeInfo;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

use super::JudgeStore;
use crate::error::{EngineError, Result};
use crate::models::{
    ParticipantScore, Problem, Submission, SubmissionForProcessing, Test, TestRun,
};

/// Initial contents for a [`MemoryStore`].
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub problems: Vec<Problem>,
    #[serde(default)]
    pub tests: Vec<Test>,
    #[serde(default)]
    pub submission_types: Vec<SubmissionTypeInfo>,
    #[serde(default)]
    pub submissions: Vec<Submission>,
}

#[derive(Default)]
struct Inner {
    problems: BTreeMap<i32, Problem>,
    tests: BTreeMap<i32, Test>,
    submission_types: HashMap<i32, SubmissionTypeInfo>,
    submissions: BTreeMap<i32, Submission>,
    processing: HashMap<i32, SubmissionForProcessing>,
    test_runs: HashMap<i32, Vec<TestRun>>,
    scores: HashMap<(i32, i32), ParticipantScore>,
}

/// Process-local store for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        for problem in seed.problems {
            store.insert_problem(problem).await;
        }
        for test in seed.tests {
            store.insert_test(test).await;
        }
        for submission_type in seed.submission_types {
            store.insert_submission_type(submission_type).await;
        }
        for submission in seed.submissions {
            store.insert_submission(submission).await;
        }
        store
    }

    /// Load a JSON [`Seed`] file.
    pub async fn load_seed(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Store(format!("{}: {e}", path.display())))?;
        let seed: Seed = serde_json::from_str(&raw)?;
        info!(
            problems = seed.problems.len(),
            tests = seed.tests.len(),
            submissions = seed.submissions.len(),
            "Loaded store seed"
        );
        Ok(Self::from_seed(seed).await)
    }

    pub async fn insert_problem(&self, problem: Problem) {
        self.inner.write().await.problems.insert(problem.id, problem);
    }

    pub async fn insert_test(&self, test: Test) {
        self.inner.write().await.tests.insert(test.id, test);
    }

    pub async fn insert_submission_type(&self, submission_type: SubmissionTypeInfo) {
        self.inner
            .write()
            .await
            .submission_types
            .insert(submission_type.id, submission_type);
    }

    /// Insert a submission together with its `Pending` processing row.
    pub async fn insert_submission(&self, submission: Submission) {
        let mut inner = self.inner.write().await;
        inner
            .processing
            .entry(submission.id)
            .or_insert_with(|| SubmissionForProcessing::new(submission.id, submission.created_at));
        inner.submissions.insert(submission.id, submission);
    }
}

fn store_row(
    rows: &mut HashMap<i32, SubmissionForProcessing>,
    row: &SubmissionForProcessing,
) -> bool {
    let current = rows.get(&row.submission_id).map(|r| r.version).unwrap_or(0);
    if current != row.version {
        return false;
    }
    let mut saved = row.clone();
    saved.version += 1;
    rows.insert(row.submission_id, saved);
    true
}

#[async_trait]
impl JudgeStore for MemoryStore {
    async fn submission(&self, id: i32) -> Result<Option<Submission>> {
        Ok(self.inner.read().await.submissions.get(&id).cloned())
    }

    async fn save_submission(&self, submission: &Submission) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.submissions.contains_key(&submission.id) {
            return Err(EngineError::not_found("Submission", submission.id));
        }
        inner.submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn problem(&self, id: i32) -> Result<Option<Problem>> {
        Ok(self.inner.read().await.problems.get(&id).cloned())
    }

    async fn problems(&self) -> Result<Vec<Problem>> {
        Ok(self.inner.read().await.problems.values().cloned().collect())
    }

    async fn tests_for_problem(&self, problem_id: i32) -> Result<Vec<Test>> {
        let inner = self.inner.read().await;
        let mut tests: Vec<Test> = inner
            .tests
            .values()
            .filter(|t| t.problem_id == problem_id)
            .cloned()
            .collect();
        tests.sort_by_key(|t| (t.order_by, t.id));
        Ok(tests)
    }

    async fn submission_type(&self, id: i32) -> Result<Option<SubmissionTypeInfo>> {
        Ok(self.inner.read().await.submission_types.get(&id).cloned())
    }

    async fn submissions_for_problem(&self, problem_id: i32) -> Result<Vec<Submission>> {
        Ok(self
            .inner
            .read()
            .await
            .submissions
            .values()
            .filter(|s| s.problem_id == problem_id && !s.is_deleted)
            .cloned()
            .collect())
    }

    async fn participant_submissions(
        &self,
        participant_id: i32,
        problem_id: i32,
    ) -> Result<Vec<Submission>> {
        Ok(self
            .inner
            .read()
            .await
            .submissions
            .values()
            .filter(|s| {
                s.participant_id == participant_id && s.problem_id == problem_id && !s.is_deleted
            })
            .cloned()
            .collect())
    }

    async fn processing(&self, submission_id: i32) -> Result<Option<SubmissionForProcessing>> {
        Ok(self.inner.read().await.processing.get(&submission_id).cloned())
    }

    async fn save_processing(&self, row: &SubmissionForProcessing) -> Result<bool> {
        Ok(store_row(&mut self.inner.write().await.processing, row))
    }

    async fn processing_in_state(
        &self,
        state: ProcessingState,
        changed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SubmissionForProcessing>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<SubmissionForProcessing> = inner
            .processing
            .values()
            .filter(|r| r.state == state && r.state_changed_at <= changed_before)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.state_changed_at, r.submission_id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn test_runs(&self, submission_id: i32) -> Result<Vec<TestRun>> {
        Ok(self
            .inner
            .read()
            .await
            .test_runs
            .get(&submission_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply_execution_result(
        &self,
        submission: &Submission,
        test_runs: Vec<TestRun>,
        row: &SubmissionForProcessing,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if !inner.submissions.contains_key(&submission.id) {
            return Err(EngineError::not_found("Submission", submission.id));
        }
        if !store_row(&mut inner.processing, row) {
            return Ok(false);
        }
        inner.test_runs.insert(submission.id, test_runs);
        inner.submissions.insert(submission.id, submission.clone());
        Ok(true)
    }

    async fn participant_score(
        &self,
        participant_id: i32,
        problem_id: i32,
    ) -> Result<Option<ParticipantScore>> {
        Ok(self
            .inner
            .read()
            .await
            .scores
            .get(&(participant_id, problem_id))
            .cloned())
    }

    async fn participant_scores_for_problem(
        &self,
        problem_id: i32,
    ) -> Result<Vec<ParticipantScore>> {
        let inner = self.inner.read().await;
        let mut scores: Vec<ParticipantScore> = inner
            .scores
            .values()
            .filter(|s| s.problem_id == problem_id)
            .cloned()
            .collect();
        scores.sort_by_key(|s| s.participant_id);
        Ok(scores)
    }

    async fn save_participant_score(&self, score: &ParticipantScore) -> Result<()> {
        self.inner
            .write()
            .await
            .scores
            .insert((score.participant_id, score.problem_id), score.clone());
        Ok(())
    }
}
