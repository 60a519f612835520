use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::ProcessingState;
use tracing::{error, info, warn};

use crate::config::ReconciliationConfig;
use crate::error::Result;
use crate::models::SubmissionForProcessing;
use crate::publisher::Publisher;
use crate::store::JudgeStore;

pub const STUCK_JOB: &str = "STUCK_JOB";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows enqueued again by this sweep.
    pub republished: usize,
    /// Lost `Enqueued`/`Processing` rows reset to `Pending`.
    pub requeued: usize,
    /// Rows given up on.
    pub failed: usize,
}

/// Recovers submissions whose job was lost between engine and worker.
pub struct Reconciler {
    store: Arc<dyn JudgeStore>,
    publisher: Arc<Publisher>,
    config: ReconciliationConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn JudgeStore>,
        publisher: Arc<Publisher>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut to_publish = Vec::new();

        for row in self
            .stale_rows(ProcessingState::Pending, self.config.pending_timeout_secs, now)
            .await?
        {
            if self.over_limit(&row) {
                self.give_up(row, now, &mut report).await?;
            } else {
                to_publish.push(row.submission_id);
            }
        }

        for (state, timeout_secs) in [
            (ProcessingState::Enqueued, self.config.enqueued_timeout_secs),
            (ProcessingState::Processing, self.config.processing_timeout_secs),
        ] {
            for mut row in self.stale_rows(state, timeout_secs, now).await? {
                if self.over_limit(&row) {
                    self.give_up(row, now, &mut report).await?;
                    continue;
                }
                warn!(
                    submission_id = row.submission_id,
                    state = %row.state,
                    requeue_count = row.requeue_count,
                    "Job presumed lost, requeueing"
                );
                row.requeue(now);
                if self.store.save_processing(&row).await? {
                    report.requeued += 1;
                    to_publish.push(row.submission_id);
                }
            }
        }

        if !to_publish.is_empty() {
            report.republished = self.publisher.publish_batch(&to_publish).await?;
        }
        Ok(report)
    }

    async fn stale_rows(
        &self,
        state: ProcessingState,
        timeout_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SubmissionForProcessing>> {
        let threshold = Duration::seconds(i64::try_from(timeout_secs).unwrap_or(i64::MAX));
        let changed_before = now.checked_sub_signed(threshold).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store
            .processing_in_state(state, changed_before, self.config.batch_size)
            .await
    }

    fn over_limit(&self, row: &SubmissionForProcessing) -> bool {
        row.requeue_count >= self.config.max_requeue_attempts
    }

    async fn give_up(
        &self,
        mut row: SubmissionForProcessing,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        error!(
            submission_id = row.submission_id,
            state = %row.state,
            requeue_count = row.requeue_count,
            "Submission stuck after repeated requeues, marking failed"
        );
        let message = format!(
            "No result after {} requeue attempts (last state {})",
            row.requeue_count, row.state
        );
        row.fail(STUCK_JOB, &message, now)?;
        if self.store.save_processing(&row).await? {
            report.failed += 1;
        }
        Ok(())
    }
}

/// Run the reconciliation sweep as a background task.
pub async fn run_reconciliation(reconciler: Arc<Reconciler>) {
    let config = reconciler.config();
    info!(
        scan_interval_secs = config.scan_interval_secs,
        pending_timeout_secs = config.pending_timeout_secs,
        enqueued_timeout_secs = config.enqueued_timeout_secs,
        processing_timeout_secs = config.processing_timeout_secs,
        "Starting reconciliation sweep"
    );

    let mut interval = tokio::time::interval(config.scan_interval());

    loop {
        interval.tick().await;

        match reconciler.sweep(Utc::now()).await {
            Ok(report) if report != SweepReport::default() => info!(
                republished = report.republished,
                requeued = report.requeued,
                failed = report.failed,
                "Reconciliation sweep recovered submissions"
            ),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Reconciliation sweep failed"),
        }
    }
}
