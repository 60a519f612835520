use chrono::{DateTime, Duration, Utc};
use common::ProcessingState;
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// Judging lifecycle of one submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionForProcessing {
    pub submission_id: i32,
    pub state: ProcessingState,
    /// Job id of the latest enqueue. Reports for any other job are stale.
    pub current_job_id: Option<String>,
    /// Job id whose result was last written. Replays of it are no-ops.
    pub last_applied_job_id: Option<String>,
    pub verbose: bool,
    pub requeue_count: u32,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When `state` last changed.
    pub state_changed_at: DateTime<Utc>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub serialized_exception: Option<String>,
    pub serialized_execution_details: Option<serde_json::Value>,
    pub serialized_execution_result: Option<serde_json::Value>,
    /// Bumped by the store on every successful save.
    pub version: u64,
}

impl SubmissionForProcessing {
    pub fn new(submission_id: i32, now: DateTime<Utc>) -> Self {
        Self {
            submission_id,
            state: ProcessingState::Pending,
            current_job_id: None,
            last_applied_job_id: None,
            verbose: false,
            requeue_count: 0,
            worker_id: None,
            created_at: now,
            state_changed_at: now,
            enqueued_at: None,
            processing_started_at: None,
            processed_at: None,
            failed_at: None,
            serialized_exception: None,
            serialized_execution_details: None,
            serialized_execution_result: None,
            version: 0,
        }
    }

    pub fn can_transition(from: ProcessingState, to: ProcessingState) -> bool {
        use ProcessingState::*;
        matches!(
            (from, to),
            (_, Pending)
                | (Pending, Enqueued)
                | (Enqueued, Processing)
                | (Processing, Processed)
                | (Pending | Enqueued | Processing, Failed)
        )
    }

    pub fn transition(
        &mut self,
        to: ProcessingState,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !Self::can_transition(self.state, to) {
            return Err(TransitionError {
                submission_id: self.submission_id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.state_changed_at = now;
        match to {
            ProcessingState::Pending => {}
            ProcessingState::Enqueued => self.enqueued_at = Some(now),
            ProcessingState::Processing => self.processing_started_at = Some(now),
            ProcessingState::Processed => self.processed_at = Some(now),
            ProcessingState::Failed => self.failed_at = Some(now),
        }
        Ok(())
    }

    /// Walk forward to `Processing` through the intermediate states.
    ///
    /// A worker may report before the publisher recorded the enqueue.
    pub fn advance_to_processing(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.state == ProcessingState::Pending {
            self.transition(ProcessingState::Enqueued, now)?;
        }
        if self.state == ProcessingState::Enqueued {
            self.transition(ProcessingState::Processing, now)?;
        }
        if self.state != ProcessingState::Processing {
            return Err(TransitionError {
                submission_id: self.submission_id,
                from: self.state,
                to: ProcessingState::Processing,
            });
        }
        Ok(())
    }

    /// Back to `Pending` with no job in flight.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.state = ProcessingState::Pending;
        self.state_changed_at = now;
        self.current_job_id = None;
        self.worker_id = None;
    }

    /// Reset after a lost job; counts towards the requeue limit.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.reset(now);
        self.requeue_count += 1;
    }

    /// Reset for an explicit retest, forgetting all previous attempts.
    pub fn reset_for_retest(&mut self, verbose: bool, now: DateTime<Utc>) {
        self.reset(now);
        self.verbose = verbose;
        self.requeue_count = 0;
        self.last_applied_job_id = None;
        self.serialized_exception = None;
        self.serialized_execution_details = None;
    }

    /// Mark the row `Failed`, recording `code: message` as the exception.
    pub fn fail(
        &mut self,
        code: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(ProcessingState::Failed, now)?;
        self.serialized_exception = Some(format!("{code}: {message}"));
        self.current_job_id = None;
        Ok(())
    }

    /// True when the row has sat in its current state for at least `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now - self.state_changed_at >= threshold
    }

    pub fn is_current_job(&self, job_id: &str) -> bool {
        self.current_job_id.as_deref() == Some(job_id)
    }

    pub fn is_applied_job(&self, job_id: &str) -> bool {
        self.last_applied_job_id.as_deref() == Some(job_id)
    }
}
