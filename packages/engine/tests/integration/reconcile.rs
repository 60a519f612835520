use chrono::{Duration, Utc};
use common::ProcessingState;
use engine::SweepReport;
use engine::config::ReconciliationConfig;
use engine::reconcile::STUCK_JOB;
use engine::store::JudgeStore;

use crate::support::{ALL_CORRECT, Harness, finished, started};

#[tokio::test]
async fn failed_publish_is_recovered_by_sweep() {
    let h = Harness::new().await;
    h.submit(1, 100).await;

    h.queue.fail_sends(true);
    assert!(!h.publisher.publish(1).await.unwrap());
    assert_eq!(h.state(1).await, ProcessingState::Pending);
    assert!(h.queue.jobs().is_empty());

    h.queue.fail_sends(false);
    let later = Utc::now() + Duration::seconds(61);
    let report = h.reconciler.sweep(later).await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            republished: 1,
            requeued: 0,
            failed: 0,
        }
    );
    assert_eq!(h.state(1).await, ProcessingState::Enqueued);

    h.judge_enqueued(1).await;
    assert_eq!(h.state(1).await, ProcessingState::Processed);
}

#[tokio::test]
async fn fresh_rows_are_left_alone() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.submit(2, 100).await;
    h.publisher.publish(2).await.unwrap();

    let report = h.reconciler.sweep(Utc::now()).await.unwrap();
    assert_eq!(report, SweepReport::default());
    assert_eq!(h.state(1).await, ProcessingState::Pending);
    assert_eq!(h.state(2).await, ProcessingState::Enqueued);
}

#[tokio::test]
async fn lost_job_is_requeued_and_old_report_ignored() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.publisher.publish(1).await.unwrap();
    let lost = h.queue.last_job_for(1);
    h.processor.process(&started(&lost)).await.unwrap();

    let later = Utc::now() + Duration::seconds(901);
    let report = h.reconciler.sweep(later).await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.republished, 1);

    let row = h.store.processing(1).await.unwrap().unwrap();
    assert_eq!(row.state, ProcessingState::Enqueued);
    assert_eq!(row.requeue_count, 1);
    let fresh = h.queue.last_job_for(1);
    assert_ne!(fresh.job_id, lost.job_id);

    assert_eq!(
        h.processor
            .process(&finished(&lost, &ALL_CORRECT))
            .await
            .unwrap(),
        engine::ReportOutcome::Stale
    );
    assert_eq!(h.state(1).await, ProcessingState::Enqueued);
}

#[tokio::test]
async fn rows_past_requeue_limit_are_failed() {
    let h = Harness::with_reconciliation(ReconciliationConfig {
        max_requeue_attempts: 1,
        ..ReconciliationConfig::default()
    })
    .await;
    h.submit(1, 100).await;
    h.publisher.publish(1).await.unwrap();

    let first = h
        .reconciler
        .sweep(Utc::now() + Duration::seconds(301))
        .await
        .unwrap();
    assert_eq!(first.requeued, 1);

    let second = h
        .reconciler
        .sweep(Utc::now() + Duration::seconds(301))
        .await
        .unwrap();
    assert_eq!(second.failed, 1);
    assert_eq!(second.republished, 0);

    let row = h.store.processing(1).await.unwrap().unwrap();
    assert_eq!(row.state, ProcessingState::Failed);
    assert!(row.serialized_exception.unwrap().starts_with(STUCK_JOB));
    assert!(row.current_job_id.is_none());
}
