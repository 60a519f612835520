use std::sync::Arc;

use common::ProcessingState;
use common::ResultType::{CorrectAnswer, TimeLimit, WrongAnswer};
use engine::scoring::normalize_points;
use engine::store::JudgeStore;
use engine::{EngineError, ReportOutcome, ResultProcessor};

use crate::support::{
    self, ALL_CORRECT, EMPTY_PROBLEM_ID, FlakyScores, Harness, MAXIMUM_POINTS, TEST_IDS,
    compile_failed, failed, finished, started,
};

#[tokio::test]
async fn correct_submission_gets_full_points() {
    let h = Harness::new().await;
    h.submit(1, 100).await;

    assert!(h.publisher.publish(1).await.unwrap());
    assert_eq!(h.state(1).await, ProcessingState::Enqueued);

    let job = h.queue.last_job_for(1);
    assert_eq!(job.test_ids(), TEST_IDS.to_vec());
    assert_eq!(
        h.processor.process(&started(&job)).await.unwrap(),
        ReportOutcome::Started
    );
    assert_eq!(h.state(1).await, ProcessingState::Processing);

    assert_eq!(
        h.processor
            .process(&finished(&job, &ALL_CORRECT))
            .await
            .unwrap(),
        ReportOutcome::Applied
    );

    let runs = h.store.test_runs(1).await.unwrap();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.result_type == CorrectAnswer));
    assert_eq!(h.points(1).await, MAXIMUM_POINTS);
    assert_eq!(h.state(1).await, ProcessingState::Processed);
    assert_eq!(h.best(100).await, Some((1, MAXIMUM_POINTS)));

    let row = h.store.processing(1).await.unwrap().unwrap();
    assert_eq!(row.worker_id.as_deref(), Some("worker-1"));
    assert!(row.serialized_execution_result.is_some());
    assert!(row.processed_at.is_some());
}

#[tokio::test]
async fn partial_points_are_floored() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.judge(1, &[CorrectAnswer, WrongAnswer, TimeLimit]).await;

    assert_eq!(h.points(1).await, 10);
    let runs = h.store.test_runs(1).await.unwrap();
    assert_eq!(runs[2].result_type, TimeLimit);
}

#[tokio::test]
async fn replayed_result_is_a_no_op() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.judge(1, &ALL_CORRECT).await;
    let job = h.queue.last_job_for(1);
    let row_before = h.store.processing(1).await.unwrap();

    let replay = finished(&job, &[WrongAnswer, WrongAnswer, WrongAnswer]);
    assert_eq!(
        h.processor.process(&replay).await.unwrap(),
        ReportOutcome::Duplicate
    );
    assert_eq!(
        h.processor.process(&started(&job)).await.unwrap(),
        ReportOutcome::Duplicate
    );

    assert_eq!(h.store.processing(1).await.unwrap(), row_before);
    assert_eq!(h.store.test_runs(1).await.unwrap().len(), 3);
    assert_eq!(h.points(1).await, MAXIMUM_POINTS);
}

#[tokio::test]
async fn redelivered_result_retries_failed_score_write() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.publisher.publish(1).await.unwrap();
    let job = h.queue.last_job_for(1);

    let store = Arc::new(FlakyScores::new(h.store.clone()));
    let processor = ResultProcessor::new(store.clone());
    let report = finished(&job, &ALL_CORRECT);

    store.fail_next_score_write();
    let err = processor.process(&report).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert_eq!(h.state(1).await, ProcessingState::Processed);
    assert!(h.best(100).await.is_none());

    assert_eq!(
        processor.process(&report).await.unwrap(),
        ReportOutcome::Duplicate
    );
    assert_eq!(h.best(100).await, Some((1, MAXIMUM_POINTS)));
    assert_eq!(h.store.test_runs(1).await.unwrap().len(), 3);
}

#[tokio::test]
async fn result_without_started_report_is_applied() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.publisher.publish(1).await.unwrap();
    let job = h.queue.last_job_for(1);

    assert_eq!(
        h.processor
            .process(&finished(&job, &ALL_CORRECT))
            .await
            .unwrap(),
        ReportOutcome::Applied
    );
    let row = h.store.processing(1).await.unwrap().unwrap();
    assert_eq!(row.state, ProcessingState::Processed);
    assert!(row.processing_started_at.is_some());
}

#[tokio::test]
async fn compilation_failure_scores_zero_without_runs() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.publisher.publish(1).await.unwrap();
    let job = h.queue.last_job_for(1);

    h.processor.process(&compile_failed(&job)).await.unwrap();

    let submission = h.store.submission(1).await.unwrap().unwrap();
    assert!(!submission.is_compiled_successfully);
    assert!(submission.compilation_comment.unwrap().contains("syntax error"));
    assert_eq!(submission.points, 0);
    assert!(h.store.test_runs(1).await.unwrap().is_empty());
    assert_eq!(h.state(1).await, ProcessingState::Processed);
    assert_eq!(h.best(100).await, Some((1, 0)));
}

#[tokio::test]
async fn reports_for_unknown_or_deleted_submissions_are_dropped() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.publisher.publish(1).await.unwrap();
    let mut job = h.queue.last_job_for(1);

    let mut deleted = h.store.submission(1).await.unwrap().unwrap();
    deleted.is_deleted = true;
    h.store.save_submission(&deleted).await.unwrap();
    assert_eq!(
        h.processor
            .process(&finished(&job, &ALL_CORRECT))
            .await
            .unwrap(),
        ReportOutcome::Dropped
    );
    assert!(h.store.test_runs(1).await.unwrap().is_empty());

    job.submission_id = 999;
    assert_eq!(
        h.processor.process(&started(&job)).await.unwrap(),
        ReportOutcome::Dropped
    );
}

#[tokio::test]
async fn report_for_superseded_job_is_ignored() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.publisher.publish(1).await.unwrap();
    let old_job = h.queue.last_job_for(1);

    h.retester.retest_submission(1, false).await.unwrap();
    let new_job = h.queue.last_job_for(1);
    assert_ne!(old_job.job_id, new_job.job_id);

    assert_eq!(
        h.processor
            .process(&finished(&old_job, &ALL_CORRECT))
            .await
            .unwrap(),
        ReportOutcome::Stale
    );
    assert_eq!(h.state(1).await, ProcessingState::Enqueued);

    h.processor
        .process(&finished(&new_job, &[CorrectAnswer, WrongAnswer, WrongAnswer]))
        .await
        .unwrap();
    assert_eq!(h.points(1).await, 10);
}

#[tokio::test]
async fn retryable_failure_returns_row_to_pending() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.publisher.publish(1).await.unwrap();
    let job = h.queue.last_job_for(1);
    h.processor.process(&started(&job)).await.unwrap();

    h.processor
        .process(&failed(&job, "SANDBOX_ERROR", true))
        .await
        .unwrap();

    let row = h.store.processing(1).await.unwrap().unwrap();
    assert_eq!(row.state, ProcessingState::Pending);
    assert_eq!(row.requeue_count, 1);
    assert!(row.current_job_id.is_none());
    assert_eq!(
        row.serialized_exception.as_deref(),
        Some("SANDBOX_ERROR: judging aborted")
    );
    let submission = h.store.submission(1).await.unwrap().unwrap();
    assert_eq!(submission.processing_comment.as_deref(), Some("judging aborted"));

    assert!(h.publisher.publish(1).await.unwrap());
}

#[tokio::test]
async fn non_retryable_failure_marks_row_failed() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.publisher.publish(1).await.unwrap();
    let job = h.queue.last_job_for(1);

    h.processor
        .process(&failed(&job, "CHECKER_ERROR", false))
        .await
        .unwrap();

    let row = h.store.processing(1).await.unwrap().unwrap();
    assert_eq!(row.state, ProcessingState::Failed);
    assert!(row.failed_at.is_some());
    assert_eq!(
        row.serialized_exception.as_deref(),
        Some("CHECKER_ERROR: judging aborted")
    );
    assert_eq!(
        row.serialized_execution_details,
        Some(serde_json::json!({ "toolchain": "shell" }))
    );
    assert!(!h.publisher.publish(1).await.unwrap());
    assert!(h.best(100).await.is_none());
}

#[tokio::test]
async fn equal_points_prefer_later_submission() {
    let h = Harness::new().await;
    for id in [1, 2, 3] {
        h.submit(id, 100).await;
    }

    h.judge(2, &[CorrectAnswer, CorrectAnswer, WrongAnswer]).await;
    assert_eq!(h.best(100).await, Some((2, 20)));

    h.judge(1, &[CorrectAnswer, CorrectAnswer, WrongAnswer]).await;
    assert_eq!(h.best(100).await, Some((2, 20)));

    h.judge(3, &[WrongAnswer, CorrectAnswer, CorrectAnswer]).await;
    assert_eq!(h.best(100).await, Some((3, 20)));
}

#[tokio::test]
async fn batch_publish_is_all_or_nothing() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.submit(2, 101).await;

    h.queue.fail_sends(true);
    assert_eq!(h.publisher.publish_batch(&[1, 2]).await.unwrap(), 0);
    assert_eq!(h.state(1).await, ProcessingState::Pending);
    assert_eq!(h.state(2).await, ProcessingState::Pending);

    h.queue.fail_sends(false);
    assert_eq!(h.publisher.publish_batch(&[1, 2]).await.unwrap(), 2);
    assert_eq!(h.state(1).await, ProcessingState::Enqueued);
    assert_eq!(h.state(2).await, ProcessingState::Enqueued);
    assert_eq!(h.queue.jobs().len(), 2);
}

#[tokio::test]
async fn problem_without_tests_fails_the_submission() {
    let h = Harness::new().await;
    h.store
        .insert_submission(support::submission(1, EMPTY_PROBLEM_ID, 100))
        .await;

    assert!(!h.publisher.publish(1).await.unwrap());
    let row = h.store.processing(1).await.unwrap().unwrap();
    assert_eq!(row.state, ProcessingState::Failed);
    assert!(row.serialized_exception.unwrap().starts_with("INVALID_JOB"));
    assert!(h.queue.jobs().is_empty());
}

#[tokio::test]
async fn normalization_clamps_points() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.judge(1, &ALL_CORRECT).await;

    let mut submission = h.store.submission(1).await.unwrap().unwrap();
    submission.points = MAXIMUM_POINTS + 20;
    h.store.save_submission(&submission).await.unwrap();

    let report = normalize_points(&*h.store).await.unwrap();
    assert_eq!(report.submissions, 1);
    assert_eq!(report.scores, 0);
    assert_eq!(h.points(1).await, MAXIMUM_POINTS);
}
