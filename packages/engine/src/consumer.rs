use std::sync::Arc;

use common::judge_result::WorkerReport;
use mq::{BroccoliError, BrokerMessage, Mq};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::processor::{ReportOutcome, ResultProcessor};

/// Consume worker reports from the result queue.
pub async fn consume_worker_reports(processor: Arc<ResultProcessor>, mq: Arc<Mq>, queue_name: String) {
    info!(queue = %queue_name, "Starting worker report consumer");

    let result = mq
        .process_messages(
            &queue_name,
            None, // sequential, reports for one submission must apply in order
            None,
            move |message: BrokerMessage<WorkerReport>| {
                let processor = processor.clone();
                async move {
                    let report = message.payload;
                    let submission_id = report.submission_id();
                    let job_id = report.job_id().to_string();

                    match processor.process(&report).await {
                        Ok(ReportOutcome::Started | ReportOutcome::Applied) => Ok(()),
                        Ok(outcome) => {
                            debug!(submission_id, job_id = %job_id, ?outcome, "Report skipped");
                            Ok(())
                        }
                        Err(e) if is_redeliverable(&e) => {
                            error!(
                                submission_id,
                                job_id = %job_id,
                                error = %e,
                                "Failed to process worker report"
                            );
                            Err(BroccoliError::Job(e.to_string()))
                        }
                        Err(e) => {
                            warn!(
                                submission_id,
                                job_id = %job_id,
                                error = %e,
                                "Dropping worker report that can never apply"
                            );
                            Ok(())
                        }
                    }
                }
            },
        )
        .await;

    if let Err(e) = result {
        error!(error = %e, "Worker report consumer stopped unexpectedly");
    }
}

/// Errors a later delivery may get past.
fn is_redeliverable(e: &EngineError) -> bool {
    matches!(
        e,
        EngineError::Conflict(_) | EngineError::Store(_) | EngineError::Queue(_)
    )
}
