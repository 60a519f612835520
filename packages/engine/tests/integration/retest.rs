use common::ProcessingState;
use common::ResultType::{CorrectAnswer, WrongAnswer};
use engine::EngineError;
use engine::store::JudgeStore;

use crate::support::{ALL_CORRECT, Harness, MAXIMUM_POINTS, PROBLEM_ID, failed, finished, started};

#[tokio::test]
async fn retest_replaces_previous_runs() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.judge(1, &ALL_CORRECT).await;
    let first_job = h.queue.last_job_for(1);

    assert!(h.retester.retest_submission(1, true).await.unwrap());
    assert_eq!(h.state(1).await, ProcessingState::Enqueued);

    let job = h.queue.last_job_for(1);
    assert_ne!(job.job_id, first_job.job_id);
    assert!(job.verbose);
    assert!(h.store.processing(1).await.unwrap().unwrap().verbose);

    h.processor.process(&started(&job)).await.unwrap();
    assert_eq!(h.state(1).await, ProcessingState::Processing);
    h.processor
        .process(&finished(&job, &[WrongAnswer, CorrectAnswer, WrongAnswer]))
        .await
        .unwrap();

    let runs = h.store.test_runs(1).await.unwrap();
    let verdicts: Vec<_> = runs.iter().map(|r| (r.test_id, r.result_type)).collect();
    assert_eq!(
        verdicts,
        vec![(11, WrongAnswer), (12, CorrectAnswer), (13, WrongAnswer)]
    );
    assert_eq!(h.points(1).await, 10);
    assert_eq!(h.state(1).await, ProcessingState::Processed);
}

#[tokio::test]
async fn rejudged_best_that_dropped_yields_to_next_best() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.submit(2, 100).await;
    h.judge(2, &[CorrectAnswer, CorrectAnswer, WrongAnswer]).await;
    h.judge(1, &ALL_CORRECT).await;
    assert_eq!(h.best(100).await, Some((1, MAXIMUM_POINTS)));

    h.retester.retest_submission(1, false).await.unwrap();
    let job = h.queue.last_job_for(1);
    h.processor
        .process(&finished(&job, &[WrongAnswer, WrongAnswer, WrongAnswer]))
        .await
        .unwrap();

    assert_eq!(h.best(100).await, Some((2, 20)));
}

#[tokio::test]
async fn retest_problem_republishes_live_submissions() {
    let h = Harness::new().await;
    for id in [1, 2, 3] {
        h.submit(id, 100 + id).await;
        h.judge(id, &ALL_CORRECT).await;
    }
    let mut deleted = h.store.submission(3).await.unwrap().unwrap();
    deleted.is_deleted = true;
    h.store.save_submission(&deleted).await.unwrap();
    let sent_before = h.queue.jobs().len();

    assert_eq!(h.retester.retest_problem(PROBLEM_ID, false).await.unwrap(), 2);

    assert_eq!(h.queue.jobs().len(), sent_before + 2);
    assert_eq!(h.state(1).await, ProcessingState::Enqueued);
    assert_eq!(h.state(2).await, ProcessingState::Enqueued);
    assert_eq!(h.state(3).await, ProcessingState::Processed);
}

#[tokio::test]
async fn retest_clears_failure() {
    let h = Harness::new().await;
    h.submit(1, 100).await;
    h.publisher.publish(1).await.unwrap();
    let job = h.queue.last_job_for(1);
    h.processor
        .process(&failed(&job, "CHECKER_ERROR", false))
        .await
        .unwrap();
    assert_eq!(h.state(1).await, ProcessingState::Failed);

    assert!(h.retester.retest_submission(1, false).await.unwrap());

    let row = h.store.processing(1).await.unwrap().unwrap();
    assert_eq!(row.state, ProcessingState::Enqueued);
    assert!(row.serialized_exception.is_none());
    assert!(row.serialized_execution_details.is_none());
    let submission = h.store.submission(1).await.unwrap().unwrap();
    assert!(submission.processing_comment.is_none());
}

#[tokio::test]
async fn retest_of_missing_submission_is_not_found() {
    let h = Harness::new().await;
    let err = h.retester.retest_submission(42, false).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { id: 42, .. }));

    let err = h.retester.retest_problem(77, false).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { id: 77, .. }));
}
