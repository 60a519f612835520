//! Points, best-score aggregation and normalization.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::ProcessingState;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::models::{ParticipantScore, Submission, Test, TestRun};
use crate::store::JudgeStore;

pub fn clamp_points(points: i32, maximum_points: i32) -> i32 {
    points.clamp(0, maximum_points.max(0))
}

/// `floor(correct * maximum / total)` over non-trial tests.
///
/// Runs for unknown tests and duplicate runs are ignored.
pub fn calculate_points(maximum_points: i32, tests: &[Test], runs: &[TestRun]) -> i32 {
    let scored: HashSet<i32> = tests.iter().filter(|t| !t.is_trial).map(|t| t.id).collect();
    if scored.is_empty() {
        return 0;
    }
    let correct: HashSet<i32> = runs
        .iter()
        .filter(|r| r.result_type.is_correct() && scored.contains(&r.test_id))
        .map(|r| r.test_id)
        .collect();

    let points = correct.len() as i64 * i64::from(maximum_points) / scored.len() as i64;
    clamp_points(points as i32, maximum_points)
}

/// Strictly more points, or equal points from a later submission.
pub fn should_replace(current: Option<&ParticipantScore>, submission_id: i32, points: i32) -> bool {
    match current {
        None => true,
        Some(best) => {
            points > best.points || (points == best.points && submission_id > best.submission_id)
        }
    }
}

/// Fold a freshly judged submission into the participant's best score.
pub async fn aggregate_score(store: &dyn JudgeStore, submission: &Submission) -> Result<()> {
    let current = store
        .participant_score(submission.participant_id, submission.problem_id)
        .await?;

    let rejudged_best = current
        .as_ref()
        .is_some_and(|best| best.submission_id == submission.id);

    let next = match &current {
        Some(best) if rejudged_best && submission.points < best.points => {
            best_processed_submission(store, submission).await?
        }
        Some(_) if rejudged_best => Some((submission.id, submission.points)),
        current if should_replace(current.as_ref(), submission.id, submission.points) => {
            Some((submission.id, submission.points))
        }
        _ => None,
    };

    let Some((submission_id, points)) = next else {
        debug!(submission_id = submission.id, "Best score unchanged");
        return Ok(());
    };
    if current
        .as_ref()
        .is_some_and(|best| best.submission_id == submission_id && best.points == points)
    {
        return Ok(());
    }

    store
        .save_participant_score(&ParticipantScore {
            participant_id: submission.participant_id,
            problem_id: submission.problem_id,
            submission_id,
            points,
        })
        .await?;
    info!(
        participant_id = submission.participant_id,
        problem_id = submission.problem_id,
        best_submission_id = submission_id,
        points,
        "Updated participant score"
    );
    Ok(())
}

/// Best `(id, points)` among the participant's processed submissions.
async fn best_processed_submission(
    store: &dyn JudgeStore,
    submission: &Submission,
) -> Result<Option<(i32, i32)>> {
    let mut best = Some((submission.id, submission.points));
    for candidate in store
        .participant_submissions(submission.participant_id, submission.problem_id)
        .await?
    {
        if candidate.id == submission.id {
            continue;
        }
        let processed = store
            .processing(candidate.id)
            .await?
            .is_some_and(|row| row.state == ProcessingState::Processed);
        if !processed {
            continue;
        }
        if best.is_none_or(|(id, points)| (candidate.points, candidate.id) > (points, id)) {
            best = Some((candidate.id, candidate.points));
        }
    }
    Ok(best)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizationReport {
    pub submissions: usize,
    pub scores: usize,
}

/// Clamp stored points into `[0, maximum_points]` for every problem.
pub async fn normalize_points(store: &dyn JudgeStore) -> Result<NormalizationReport> {
    let mut report = NormalizationReport::default();

    for problem in store.problems().await? {
        for mut submission in store.submissions_for_problem(problem.id).await? {
            let clamped = clamp_points(submission.points, problem.maximum_points);
            if clamped != submission.points {
                submission.points = clamped;
                store.save_submission(&submission).await?;
                report.submissions += 1;
            }
        }
        for mut score in store.participant_scores_for_problem(problem.id).await? {
            let clamped = clamp_points(score.points, problem.maximum_points);
            if clamped != score.points {
                score.points = clamped;
                store.save_participant_score(&score).await?;
                report.scores += 1;
            }
        }
    }

    Ok(report)
}

/// Run points normalization as a background task.
pub async fn run_normalization(store: Arc<dyn JudgeStore>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Starting points normalization");

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match normalize_points(store.as_ref()).await {
            Ok(report) if report != NormalizationReport::default() => info!(
                submissions = report.submissions,
                scores = report.scores,
                "Normalized out-of-range points"
            ),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Points normalization failed"),
        }
    }
}
