use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::ProcessingState;
use common::judge_result::{JudgeOutcome, JudgeResult, TestResultPayload, WorkerReport};
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, Result};
use crate::models::{Submission, SubmissionForProcessing, Test, TestRun};
use crate::scoring;
use crate::store::JudgeStore;

const SAVE_ATTEMPTS: usize = 3;

/// What happened to a worker report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The row moved to `Processing`.
    Started,
    /// Test runs, points and state were written.
    Applied,
    /// The report was already applied.
    Duplicate,
    /// The report belongs to a superseded job.
    Stale,
    /// The submission is unknown or deleted.
    Dropped,
}

/// Applies worker reports to the store. Safe under at-least-once delivery.
pub struct ResultProcessor {
    store: Arc<dyn JudgeStore>,
}

enum Lookup {
    Found(Submission, SubmissionForProcessing),
    /// The report's job was already written to this row.
    Applied(Submission, SubmissionForProcessing),
    Skip(ReportOutcome),
}

impl ResultProcessor {
    pub fn new(store: Arc<dyn JudgeStore>) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(submission_id = report.submission_id(), job_id = %report.job_id()))]
    pub async fn process(&self, report: &WorkerReport) -> Result<ReportOutcome> {
        for _ in 0..SAVE_ATTEMPTS {
            let outcome = match report {
                WorkerReport::Started {
                    job_id,
                    submission_id,
                    worker_id,
                    at,
                } => self.on_started(*submission_id, job_id, worker_id, *at).await?,
                WorkerReport::Finished(result) => self.on_finished(result).await?,
            };
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
            debug!("Processing row changed concurrently, retrying");
        }
        Err(EngineError::Conflict(report.submission_id()))
    }

    /// `None` means the write lost a race and should be retried.
    async fn on_started(
        &self,
        submission_id: i32,
        job_id: &str,
        worker_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ReportOutcome>> {
        let (_, mut row) = match self.lookup(submission_id, job_id).await? {
            Lookup::Found(submission, row) => (submission, row),
            Lookup::Applied(..) => return Ok(Some(ReportOutcome::Duplicate)),
            Lookup::Skip(outcome) => return Ok(Some(outcome)),
        };

        match row.state {
            ProcessingState::Processing => return Ok(Some(ReportOutcome::Duplicate)),
            ProcessingState::Pending | ProcessingState::Enqueued => {}
            ProcessingState::Processed | ProcessingState::Failed => {
                return Ok(Some(ReportOutcome::Stale));
            }
        }

        row.advance_to_processing(Utc::now())?;
        row.worker_id = Some(worker_id.to_string());
        if !self.store.save_processing(&row).await? {
            return Ok(None);
        }
        info!(worker_id, started_at = %at, "Worker started judging");
        Ok(Some(ReportOutcome::Started))
    }

    async fn on_finished(&self, result: &JudgeResult) -> Result<Option<ReportOutcome>> {
        let (mut submission, mut row) = match self.lookup(result.submission_id, &result.job_id).await? {
            Lookup::Found(submission, row) => (submission, row),
            Lookup::Applied(submission, row) => {
                // The score write may have failed after the result was committed.
                if row.state == ProcessingState::Processed {
                    scoring::aggregate_score(self.store.as_ref(), &submission).await?;
                }
                return Ok(Some(ReportOutcome::Duplicate));
            }
            Lookup::Skip(outcome) => return Ok(Some(outcome)),
        };
        if row.state.is_terminal() {
            return Ok(Some(ReportOutcome::Stale));
        }

        let now = Utc::now();
        row.advance_to_processing(now)?;
        row.worker_id = Some(result.worker_id.clone());
        row.last_applied_job_id = Some(result.job_id.clone());

        match &result.outcome {
            JudgeOutcome::Executed {
                compiled_successfully,
                compiler_comment,
                test_results,
                ..
            } => {
                let Some(problem) = self.store.problem(submission.problem_id).await? else {
                    warn!(problem_id = submission.problem_id, "Problem not found, dropping result");
                    return Ok(Some(ReportOutcome::Dropped));
                };
                let tests = self.store.tests_for_problem(problem.id).await?;

                let runs = if *compiled_successfully {
                    build_test_runs(submission.id, &tests, test_results)
                } else {
                    Vec::new()
                };
                submission.is_compiled_successfully = *compiled_successfully;
                submission.compilation_comment = compiler_comment.clone();
                submission.points = scoring::calculate_points(problem.maximum_points, &tests, &runs);
                submission.processing_comment = None;

                row.transition(ProcessingState::Processed, now)?;
                row.serialized_exception = None;
                row.serialized_execution_details = None;
                row.serialized_execution_result = Some(serde_json::to_value(&result.outcome)?);

                let run_count = runs.len();
                if !self
                    .store
                    .apply_execution_result(&submission, runs, &row)
                    .await?
                {
                    return Ok(None);
                }
                scoring::aggregate_score(self.store.as_ref(), &submission).await?;

                info!(
                    compiled = submission.is_compiled_successfully,
                    test_runs = run_count,
                    points = submission.points,
                    "Processed judge result"
                );
            }
            JudgeOutcome::Failed {
                error,
                retryable,
                execution_details,
            } => {
                row.serialized_execution_details = execution_details.clone();
                if *retryable {
                    row.requeue(now);
                    row.serialized_exception = Some(format!("{}: {}", error.code, error.message));
                } else {
                    row.fail(&error.code, &error.message, now)?;
                }
                if !self.store.save_processing(&row).await? {
                    return Ok(None);
                }
                submission.processing_comment = Some(error.message.clone());
                self.store.save_submission(&submission).await?;

                warn!(
                    code = %error.code,
                    retryable,
                    state = %row.state,
                    "Worker failed to judge submission"
                );
            }
        }

        Ok(Some(ReportOutcome::Applied))
    }

    /// Resolve the submission and row, classifying reports that must not be applied.
    async fn lookup(&self, submission_id: i32, job_id: &str) -> Result<Lookup> {
        let submission = match self.store.submission(submission_id).await? {
            Some(s) if !s.is_deleted => s,
            _ => {
                warn!(submission_id, "Submission not found, dropping report");
                return Ok(Lookup::Skip(ReportOutcome::Dropped));
            }
        };
        let Some(row) = self.store.processing(submission_id).await? else {
            warn!(submission_id, "Processing row not found, dropping report");
            return Ok(Lookup::Skip(ReportOutcome::Dropped));
        };

        if row.is_applied_job(job_id) {
            debug!(submission_id, "Report already applied");
            return Ok(Lookup::Applied(submission, row));
        }
        if !row.is_current_job(job_id) {
            debug!(
                submission_id,
                current_job_id = ?row.current_job_id,
                "Report for superseded job, ignoring"
            );
            return Ok(Lookup::Skip(ReportOutcome::Stale));
        }
        Ok(Lookup::Found(submission, row))
    }
}

/// One run per known test, first result wins.
fn build_test_runs(
    submission_id: i32,
    tests: &[Test],
    payloads: &[TestResultPayload],
) -> Vec<TestRun> {
    let known: HashSet<i32> = tests.iter().map(|t| t.id).collect();
    let mut seen = HashSet::new();
    let runs: Vec<TestRun> = payloads
        .iter()
        .filter(|p| known.contains(&p.test_id) && seen.insert(p.test_id))
        .map(|p| TestRun::from_payload(submission_id, p))
        .collect();

    if runs.len() != payloads.len() {
        warn!(
            submission_id,
            received = payloads.len(),
            kept = runs.len(),
            "Discarded results for unknown or repeated tests"
        );
    }
    if runs.len() < tests.len() {
        warn!(
            submission_id,
            tests = tests.len(),
            results = runs.len(),
            "Result does not cover every test"
        );
    }
    runs
}
