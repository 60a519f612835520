use chrono::Utc;
use common::judge_job::{JobInput, JudgeJob};
use common::judge_result::{
    JudgeOutcome, JudgeResult, JudgeSystemErrorInfo, OutputResultPayload, TestResultPayload,
    truncate_fragment,
};
use serde_json::json;
use tracing::{error, info, instrument};

use crate::error::JudgeError;
use crate::models::checker::CheckerRegistry;
use crate::models::strategy::{ExecutionContext, ExecutionResult, StrategyFactory, TestResult};
use crate::models::workspace::WorkspaceManager;

/// Turns judge jobs into judge results.
pub struct JudgeHandler {
    worker_id: String,
    strategies: StrategyFactory,
    checkers: CheckerRegistry,
    workspaces: WorkspaceManager,
}

impl JudgeHandler {
    pub fn new(
        worker_id: impl Into<String>,
        strategies: StrategyFactory,
        checkers: CheckerRegistry,
        workspaces: WorkspaceManager,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            strategies,
            checkers,
            workspaces,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Handle a judge job and return the result. Never fails: faults become
    /// a `Failed` outcome carrying the error code and retry hint.
    #[instrument(skip(self, job), fields(submission_id = job.submission_id, job_id = %job.job_id))]
    pub async fn handle(&self, job: &JudgeJob) -> JudgeResult {
        match self.judge(job).await {
            Ok(execution) => {
                info!(
                    compiled = execution.is_compiled_successfully,
                    tests = execution.test_results.len(),
                    "Judging completed"
                );
                JudgeResult {
                    job_id: job.job_id.clone(),
                    submission_id: job.submission_id,
                    worker_id: self.worker_id.clone(),
                    completed_at: Utc::now(),
                    outcome: to_outcome(job, execution),
                }
            }
            Err(e) => {
                error!(code = e.code(), retryable = e.is_retryable(), error = %e, "Judging failed");
                let mut result = JudgeResult::failed(
                    job.job_id.clone(),
                    job.submission_id,
                    self.worker_id.clone(),
                    JudgeSystemErrorInfo::new(e.code(), e.to_string()),
                    e.is_retryable(),
                );
                if let JudgeOutcome::Failed {
                    execution_details, ..
                } = &mut result.outcome
                {
                    *execution_details = Some(json!({
                        "strategy": job.submission_type.strategy,
                        "toolchain": job.submission_type.toolchain,
                        "checker": job.checker.registry_key(),
                    }));
                }
                result
            }
        }
    }

    async fn judge(&self, job: &JudgeJob) -> Result<ExecutionResult, JudgeError> {
        let strategy = self.strategies.for_submission_type(&job.submission_type)?;
        let checker = self.checkers.get(&job.checker)?;
        let ctx = ExecutionContext::from_job(job, checker)?;
        strategy.safe_execute(&ctx, &self.workspaces).await
    }
}

/// Fragments are only shipped for tests the submitter may see in full.
fn to_outcome(job: &JudgeJob, execution: ExecutionResult) -> JudgeOutcome {
    let test_results = execution
        .test_results
        .into_iter()
        .map(|r| to_payload(r, job.verbose))
        .collect();

    let output = execution.output.map(|o| OutputResultPayload {
        time_used_ms: o.time_used_ms,
        memory_used_bytes: o.memory_used_bytes,
        result_type: o.result_type,
        output: match &job.input {
            JobInput::Simple { .. } => truncate_output(&o.output),
            JobInput::Tests { .. } => String::new(),
        },
    });

    JudgeOutcome::Executed {
        compiled_successfully: execution.is_compiled_successfully,
        compiler_comment: execution.compiler_comment,
        test_results,
        output,
    }
}

fn to_payload(result: TestResult, verbose: bool) -> TestResultPayload {
    let show = verbose || result.is_trial || result.is_open;
    let details = result.checker_details;
    TestResultPayload {
        test_id: result.test_id,
        is_trial: result.is_trial,
        time_used_ms: result.time_used_ms,
        memory_used_bytes: result.memory_used_bytes,
        result_type: result.result_type,
        execution_comment: result.execution_comment,
        checker_comment: details.comment,
        expected_output_fragment: details
            .expected_output_fragment
            .filter(|_| show)
            .map(|f| truncate_fragment(&f)),
        user_output_fragment: details
            .user_output_fragment
            .filter(|_| show)
            .map(|f| truncate_fragment(&f)),
    }
}

/// Ad-hoc runs return the program output, bounded for the queue.
fn truncate_output(output: &str) -> String {
    const MAX_AD_HOC_OUTPUT: usize = 64 * 1024;
    output.chars().take(MAX_AD_HOC_OUTPUT).collect()
}
