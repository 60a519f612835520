use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::ProcessingState;
use common::judge_job::{JobInput, JudgeJob, TestCaseData};
use mq::{Mq, MqError, publish_message, publish_messages};
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, Result};
use crate::models::{Submission, SubmissionForProcessing};
use crate::store::JudgeStore;

const SAVE_ATTEMPTS: usize = 3;

/// Destination of judge jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn send(&self, job: &JudgeJob) -> std::result::Result<(), MqError>;

    /// All-or-nothing: an error means no job may be considered delivered.
    async fn send_batch(&self, jobs: Vec<JudgeJob>) -> std::result::Result<(), MqError>;
}

/// [`JobQueue`] backed by the message broker.
pub struct BrokerJobQueue {
    mq: Arc<Mq>,
    queue_name: String,
}

impl BrokerJobQueue {
    pub fn new(mq: Arc<Mq>, queue_name: impl Into<String>) -> Self {
        Self {
            mq,
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl JobQueue for BrokerJobQueue {
    async fn send(&self, job: &JudgeJob) -> std::result::Result<(), MqError> {
        publish_message(&self.mq, &self.queue_name, job).await
    }

    async fn send_batch(&self, jobs: Vec<JudgeJob>) -> std::result::Result<(), MqError> {
        publish_messages(&self.mq, &self.queue_name, jobs).await
    }
}

/// Sends pending submissions to the workers.
///
/// A failed send leaves the row `Pending`; the reconciliation sweep owns
/// retrying it.
pub struct Publisher {
    store: Arc<dyn JudgeStore>,
    queue: Arc<dyn JobQueue>,
}

impl Publisher {
    pub fn new(store: Arc<dyn JudgeStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Build the judge job for a submission from its stored context.
    pub async fn build_job(&self, submission: &Submission, verbose: bool) -> Result<JudgeJob> {
        let problem = self
            .store
            .problem(submission.problem_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Problem", submission.problem_id))?;
        let submission_type = self
            .store
            .submission_type(submission.submission_type_id)
            .await?
            .ok_or_else(|| EngineError::not_found("SubmissionType", submission.submission_type_id))?;
        let tests: Vec<TestCaseData> = self
            .store
            .tests_for_problem(problem.id)
            .await?
            .iter()
            .map(TestCaseData::from)
            .collect();
        if tests.is_empty() {
            return Err(EngineError::InvalidJob(format!(
                "problem {} has no tests",
                problem.id
            )));
        }

        Ok(JudgeJob::new(
            submission.id,
            problem.id,
            submission_type,
            submission.code.clone(),
            submission.file_extension.clone(),
            verbose,
            problem.checker.clone(),
            problem.time_limit_ms,
            problem.memory_limit_bytes,
            JobInput::Tests { tests },
        ))
    }

    /// Publish one pending submission. Returns whether it is now `Enqueued`.
    #[instrument(skip(self))]
    pub async fn publish(&self, submission_id: i32) -> Result<bool> {
        let Some(job) = self.prepare(submission_id).await? else {
            return Ok(false);
        };

        if let Err(e) = self.queue.send(&job).await {
            warn!(job_id = %job.job_id, error = %e, "Failed to enqueue judge job, left Pending");
            return Ok(false);
        }

        self.mark_enqueued(submission_id, &job.job_id).await?;
        info!(job_id = %job.job_id, "Judge job enqueued");
        Ok(true)
    }

    /// Publish many pending submissions as one batch. Returns how many were
    /// marked `Enqueued`; zero when the batch send failed.
    #[instrument(skip_all, fields(requested = submission_ids.len()))]
    pub async fn publish_batch(&self, submission_ids: &[i32]) -> Result<usize> {
        let mut jobs = Vec::with_capacity(submission_ids.len());
        for &submission_id in submission_ids {
            if let Some(job) = self.prepare(submission_id).await? {
                jobs.push(job);
            }
        }
        if jobs.is_empty() {
            return Ok(0);
        }

        let enqueued: Vec<(i32, String)> = jobs
            .iter()
            .map(|j| (j.submission_id, j.job_id.clone()))
            .collect();
        if let Err(e) = self.queue.send_batch(jobs).await {
            warn!(count = enqueued.len(), error = %e, "Failed to enqueue batch, left Pending");
            return Ok(0);
        }

        for (submission_id, job_id) in &enqueued {
            self.mark_enqueued(*submission_id, job_id).await?;
        }
        info!(count = enqueued.len(), "Judge job batch enqueued");
        Ok(enqueued.len())
    }

    /// Build a job for a `Pending` row and record its job id on the row.
    ///
    /// Submissions that can never be judged are marked `Failed`.
    async fn prepare(&self, submission_id: i32) -> Result<Option<JudgeJob>> {
        let mut row = self
            .store
            .processing(submission_id)
            .await?
            .ok_or_else(|| EngineError::not_found("SubmissionForProcessing", submission_id))?;
        if row.state != ProcessingState::Pending {
            debug!(submission_id, state = %row.state, "Not pending, skipping publish");
            return Ok(None);
        }

        let submission = match self.store.submission(submission_id).await? {
            Some(s) if !s.is_deleted => s,
            _ => {
                self.fail(row, "SUBMISSION_DELETED", "Submission no longer exists")
                    .await?;
                return Ok(None);
            }
        };

        let job = match self.build_job(&submission, row.verbose).await {
            Ok(job) => job,
            Err(e) if e.is_permanent() => {
                self.fail(row, "INVALID_JOB", &e.to_string()).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        row.current_job_id = Some(job.job_id.clone());
        if !self.store.save_processing(&row).await? {
            debug!(submission_id, "Processing row changed concurrently, skipping publish");
            return Ok(None);
        }
        Ok(Some(job))
    }

    /// Move the row to `Enqueued` unless a worker report already moved it on.
    async fn mark_enqueued(&self, submission_id: i32, job_id: &str) -> Result<()> {
        for _ in 0..SAVE_ATTEMPTS {
            let Some(mut row) = self.store.processing(submission_id).await? else {
                return Ok(());
            };
            if row.state != ProcessingState::Pending || !row.is_current_job(job_id) {
                return Ok(());
            }
            row.transition(ProcessingState::Enqueued, Utc::now())?;
            if self.store.save_processing(&row).await? {
                return Ok(());
            }
        }
        Err(EngineError::Conflict(submission_id))
    }

    async fn fail(&self, mut row: SubmissionForProcessing, code: &str, message: &str) -> Result<()> {
        warn!(submission_id = row.submission_id, code, message, "Submission cannot be judged");
        row.fail(code, message, Utc::now())?;
        self.store.save_processing(&row).await?;
        Ok(())
    }
}
