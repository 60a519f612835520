use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use crate::error::{EngineError, Result};
use crate::models::SubmissionForProcessing;
use crate::publisher::Publisher;
use crate::store::JudgeStore;

const SAVE_ATTEMPTS: usize = 3;

/// Re-judges submissions on request.
pub struct Retester {
    store: Arc<dyn JudgeStore>,
    publisher: Arc<Publisher>,
}

impl Retester {
    pub fn new(store: Arc<dyn JudgeStore>, publisher: Arc<Publisher>) -> Self {
        Self { store, publisher }
    }

    /// Reset one submission and publish it. Returns whether it was enqueued.
    #[instrument(skip(self))]
    pub async fn retest_submission(&self, submission_id: i32, verbose: bool) -> Result<bool> {
        self.reset(submission_id, verbose).await?;
        info!("Submission reset for retest");
        self.publisher.publish(submission_id).await
    }

    /// Reset every non-deleted submission of a problem and publish them as one
    /// batch. Returns how many were enqueued.
    #[instrument(skip(self))]
    pub async fn retest_problem(&self, problem_id: i32, verbose: bool) -> Result<usize> {
        if self.store.problem(problem_id).await?.is_none() {
            return Err(EngineError::not_found("Problem", problem_id));
        }

        let submissions = self.store.submissions_for_problem(problem_id).await?;
        let mut ids = Vec::with_capacity(submissions.len());
        for submission in &submissions {
            self.reset(submission.id, verbose).await?;
            ids.push(submission.id);
        }
        info!(count = ids.len(), "Problem submissions reset for retest");

        if ids.is_empty() {
            return Ok(0);
        }
        self.publisher.publish_batch(&ids).await
    }

    async fn reset(&self, submission_id: i32, verbose: bool) -> Result<()> {
        let mut submission = match self.store.submission(submission_id).await? {
            Some(s) if !s.is_deleted => s,
            _ => return Err(EngineError::not_found("Submission", submission_id)),
        };

        let mut saved = false;
        for _ in 0..SAVE_ATTEMPTS {
            let now = Utc::now();
            let mut row = self
                .store
                .processing(submission_id)
                .await?
                .unwrap_or_else(|| SubmissionForProcessing::new(submission_id, now));
            row.reset_for_retest(verbose, now);
            if self.store.save_processing(&row).await? {
                saved = true;
                break;
            }
        }
        if !saved {
            return Err(EngineError::Conflict(submission_id));
        }

        if submission.processing_comment.is_some() {
            submission.processing_comment = None;
            self.store.save_submission(&submission).await?;
        }
        Ok(())
    }
}
