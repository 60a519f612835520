use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use common::judge_job::JudgeJob;
use common::judge_result::WorkerReport;
use common::retry::{Backoff, RetryDecision, RetryTracker, spawn_purge_task};
use mq::{BroccoliError, BrokerMessage, MqConfig, init_mq, publish_message};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use worker::JudgeHandler;
use worker::config::WorkerAppConfig;
use worker::models::checker::CheckerRegistry;
use worker::models::executor::ProcessExecutor;
use worker::models::sandbox::run_sandbox_reaper;
use worker::models::strategy::StrategyFactory;
use worker::models::workspace::WorkspaceManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    std::panic::set_hook(Box::new(|panic_info| {
        error!(panic = %panic_info, "Panic occurred");
    }));

    let config = WorkerAppConfig::load().context("Failed to load config")?;
    info!("Worker starting: {}", config.worker.id);

    let executor = ProcessExecutor::new(
        Duration::from_millis(config.worker.poll_interval_ms),
        config.worker.output_limit_bytes,
    );
    let strategies = StrategyFactory::new(
        &config.toolchains,
        config.container.as_ref(),
        &executor,
    )
    .context("Failed to prepare execution strategies")?;

    tokio::fs::create_dir_all(&config.worker.work_root)
        .await
        .context("Failed to create work root")?;
    let (workspaces, _cleanup_handle) =
        WorkspaceManager::start(&config.worker.work_root, config.worker.cleanup_attempts);

    if let Some(sandbox) = strategies.sandbox() {
        tokio::spawn(run_sandbox_reaper(sandbox));
    }

    let handler = Arc::new(JudgeHandler::new(
        config.worker.id.clone(),
        strategies,
        CheckerRegistry::with_builtins(),
        workspaces,
    ));

    let mq = Arc::new(
        init_mq(MqConfig {
            url: config.mq.url.clone(),
            pool_size: config.mq.pool_size,
        })
        .await
        .context("Failed to initialize MQ")?,
    );

    info!(
        queue_name = %config.mq.queue_name,
        result_queue_name = %config.mq.result_queue_name,
        concurrency = config.worker.concurrency,
        max_retries = config.retry.max_retries,
        "MQ connected"
    );

    let retry_tracker = Arc::new(Mutex::new(RetryTracker::new(
        config.retry.max_retries,
        Backoff {
            base_ms: config.retry.base_delay_ms,
            max_ms: config.retry.max_delay_ms,
        },
    )));
    let _purge_handle = spawn_purge_task(
        Arc::clone(&retry_tracker),
        Duration::from_secs(config.retry.cleanup_interval_secs),
        Duration::from_secs(config.retry.max_age_secs),
    );

    let result_queue = config.mq.result_queue_name.clone();
    let mq_for_handler = Arc::clone(&mq);

    let result = mq
        .process_messages(
            &config.mq.queue_name,
            Some(config.worker.concurrency),
            None,
            move |message: BrokerMessage<JudgeJob>| {
                let mq = Arc::clone(&mq_for_handler);
                let handler = Arc::clone(&handler);
                let result_queue = result_queue.clone();
                let retry_tracker = Arc::clone(&retry_tracker);
                async move {
                    process_job(message.payload, &handler, &mq, &result_queue, &retry_tracker)
                        .await
                }
            },
        )
        .await;

    if let Err(e) = result {
        error!(error = %e, "Worker stopped unexpectedly");
    }

    Ok(())
}

async fn process_job(
    job: JudgeJob,
    handler: &JudgeHandler,
    mq: &mq::Mq,
    result_queue: &str,
    retry_tracker: &Mutex<RetryTracker>,
) -> Result<(), BroccoliError> {
    info!(
        submission_id = job.submission_id,
        job_id = %job.job_id,
        tests = job.test_ids().len(),
        "Processing judge job"
    );

    let started = WorkerReport::Started {
        job_id: job.job_id.clone(),
        submission_id: job.submission_id,
        worker_id: handler.worker_id().to_string(),
        at: Utc::now(),
    };
    if let Err(e) = publish_message(mq, result_queue, &started).await {
        warn!(submission_id = job.submission_id, error = %e, "Failed to publish start report");
    }

    let report = WorkerReport::Finished(handler.handle(&job).await);
    publish_with_retry(&report, mq, result_queue, retry_tracker).await;
    Ok(())
}

/// Publish a finished report, backing off between attempts.
///
/// When retries run out the report is dropped; the engine's reconcile sweep
/// re-enqueues the submission once it goes stale.
async fn publish_with_retry(
    report: &WorkerReport,
    mq: &mq::Mq,
    result_queue: &str,
    retry_tracker: &Mutex<RetryTracker>,
) {
    let job_id = report.job_id();
    let submission_id = report.submission_id();

    loop {
        match publish_message(mq, result_queue, report).await {
            Ok(()) => {
                retry_tracker.lock().await.clear(job_id);
                info!(submission_id, job_id, "Published result to queue");
                return;
            }
            Err(e) => {
                let decision = retry_tracker
                    .lock()
                    .await
                    .record_failure(job_id, &e.to_string());

                match decision {
                    RetryDecision::Retry { attempt, delay } => {
                        warn!(
                            submission_id,
                            job_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retrying result publish"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::Exhausted { history } => {
                        error!(
                            submission_id,
                            job_id,
                            retry_count = history.len(),
                            error = %e,
                            "Max retries exhausted, dropping result"
                        );
                        return;
                    }
                }
            }
        }
    }
}
