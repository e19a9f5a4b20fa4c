//! Re-grades every affected student of one change tracker.
//!
//! A [`Worker`] drives a tracker from `pending` to a terminal state. Students
//! are processed one at a time in `affected_student_ids` order and the
//! accumulated [`ExecutionDetails`] are checkpointed after each one, so a
//! retried job that still owns the claim picks up where the last attempt
//! stopped instead of calling the execution engine again for students that
//! were already graded.
//!
//! Grading is lenient: passing at least one active test case marks the
//! question complete with full marks.

use std::sync::Arc;

use code_runner::{ExecutionEngine, ExecutionRequest, first_error, run_tests, test_stats};
use db::models::test_case_change_tracker::{self, ExecutionDetails, TrackerStatus};
use db::models::{question, student_score, test_case};
use sea_orm::{DatabaseConnection, DbErr};

use crate::error::ReexecutionError;

/// One unit of dispatched work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub tracker_id: i64,
    /// Attempts started so far, including the current one.
    pub attempt: u32,
    /// Set once this job has moved the tracker to `in_progress`.
    pub owns_claim: bool,
}

impl Job {
    pub fn new(tracker_id: i64) -> Self {
        Self {
            tracker_id,
            attempt: 0,
            owns_claim: false,
        }
    }
}

/// What a single [`Worker::handle`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Tracker missing, already finished, or owned by another job.
    Skipped,
    Completed(ExecutionDetails),
    /// A precondition failed; the tracker is terminal and not retried.
    Failed(String),
}

enum Precondition {
    Met,
    Failed(&'static str),
}

pub struct Worker {
    db: DatabaseConnection,
    engine: Arc<dyn ExecutionEngine>,
}

impl Worker {
    pub fn new(db: DatabaseConnection, engine: Arc<dyn ExecutionEngine>) -> Self {
        Self { db, engine }
    }

    /// Processes the tracker named by `job`.
    ///
    /// Returns `Err` only for unexpected failures. In that case the tracker
    /// has already been marked `failed` with `"Job failed: <message>"` when
    /// the database allowed it, and the caller may retry.
    pub async fn handle(&self, job: &mut Job) -> Result<Outcome, ReexecutionError> {
        let Some(tracker) =
            test_case_change_tracker::Model::find_by_id(&self.db, job.tracker_id).await?
        else {
            tracing::warn!(tracker_id = job.tracker_id, "Tracker not found, skipping");
            return Ok(Outcome::Skipped);
        };

        let mut details = match tracker.status {
            TrackerStatus::Pending => {
                if !test_case_change_tracker::Model::claim(&self.db, tracker.id).await? {
                    tracing::info!(tracker_id = tracker.id, "Tracker claimed elsewhere, skipping");
                    return Ok(Outcome::Skipped);
                }
                job.owns_claim = true;
                ExecutionDetails::default()
            }
            TrackerStatus::InProgress if job.owns_claim => {
                let details = tracker.execution_details.clone().unwrap_or_default();
                tracing::info!(
                    tracker_id = tracker.id,
                    already_handled = details.handled_student_ids.len(),
                    "Resuming tracker"
                );
                details
            }
            status => {
                tracing::info!(tracker_id = tracker.id, %status, "Tracker not pending, skipping");
                return Ok(Outcome::Skipped);
            }
        };

        match self.process(&tracker, &mut details).await {
            Ok(Precondition::Met) => {
                if !test_case_change_tracker::Model::mark_completed(&self.db, tracker.id, &details)
                    .await?
                {
                    tracing::warn!(
                        tracker_id = tracker.id,
                        "Tracker left in_progress during the run, completion not recorded"
                    );
                    return Ok(Outcome::Skipped);
                }
                tracing::info!(
                    tracker_id = tracker.id,
                    processed = details.processed,
                    success = details.success,
                    failed = details.failed,
                    "Re-execution completed"
                );
                Ok(Outcome::Completed(details))
            }
            Ok(Precondition::Failed(reason)) => {
                details.error = Some(reason.to_string());
                test_case_change_tracker::Model::mark_failed(&self.db, tracker.id, &details)
                    .await?;
                tracing::warn!(tracker_id = tracker.id, reason, "Re-execution failed");
                Ok(Outcome::Failed(reason.to_string()))
            }
            Err(e) => {
                details.error = Some(format!("Job failed: {e}"));
                if let Err(mark_err) =
                    test_case_change_tracker::Model::mark_failed(&self.db, tracker.id, &details)
                        .await
                {
                    tracing::error!(
                        tracker_id = tracker.id,
                        error = %mark_err,
                        "Could not record tracker failure"
                    );
                }
                tracing::error!(tracker_id = tracker.id, error = %e, "Re-execution aborted");
                Err(e.into())
            }
        }
    }

    /// Marks the tracker `failed` after a [`Worker::handle`] call for `job`
    /// panicked, keeping the last checkpoint. Does nothing unless `job` owns
    /// the claim.
    pub async fn record_panic(&self, job: &Job, message: &str) {
        if !job.owns_claim {
            return;
        }
        if let Err(e) = self.fail_from_checkpoint(job.tracker_id, message).await {
            tracing::error!(
                tracker_id = job.tracker_id,
                error = %e,
                "Could not record tracker failure"
            );
        }
    }

    async fn fail_from_checkpoint(&self, tracker_id: i64, message: &str) -> Result<(), DbErr> {
        let mut details = test_case_change_tracker::Model::find_by_id(&self.db, tracker_id)
            .await?
            .and_then(|tracker| tracker.execution_details)
            .unwrap_or_default();
        details.error = Some(format!("Job failed: {message}"));
        test_case_change_tracker::Model::mark_failed(&self.db, tracker_id, &details).await?;
        Ok(())
    }

    async fn process(
        &self,
        tracker: &test_case_change_tracker::Model,
        details: &mut ExecutionDetails,
    ) -> Result<Precondition, DbErr> {
        if question::Model::find_by_id(&self.db, tracker.question_id)
            .await?
            .is_none()
        {
            return Ok(Precondition::Failed("Question not found"));
        }

        let test_cases =
            test_case::Model::find_active_by_question(&self.db, tracker.question_id).await?;
        if test_cases.is_empty() {
            return Ok(Precondition::Failed("No active test cases found"));
        }
        let inputs: Vec<String> = test_cases.into_iter().map(|tc| tc.input).collect();

        for &student_id in &tracker.affected_student_ids.0 {
            if details.is_handled(student_id) {
                continue;
            }

            self.grade_student(tracker.question_id, student_id, &inputs, details)
                .await?;

            details.mark_handled(student_id);
            test_case_change_tracker::Model::record_progress(&self.db, tracker.id, details).await?;
        }

        Ok(Precondition::Met)
    }

    async fn grade_student(
        &self,
        question_id: i64,
        student_id: i64,
        inputs: &[String],
        details: &mut ExecutionDetails,
    ) -> Result<(), DbErr> {
        let Some(score) =
            student_score::Model::find_by_user_and_question(&self.db, student_id, question_id)
                .await?
        else {
            tracing::debug!(student_id, question_id, "No score record, skipping student");
            return Ok(());
        };

        let submission = score
            .authoritative_execution_result(&self.db)
            .await?
            .filter(|result| result.has_code());
        let Some(submission) = submission else {
            details.errors.push(format!("No code found for student ID: {student_id}"));
            details.failed += 1;
            return Ok(());
        };

        let request = ExecutionRequest::test(
            submission.code.clone(),
            inputs.to_vec(),
            question_id,
            student_id,
        );
        let events = run_tests(self.engine.as_ref(), &request).await;

        let (passed, total) = match test_stats(&events) {
            Some(stats) => (stats.success, stats.total),
            None => {
                let diagnostic = first_error(&events).unwrap_or("engine returned no test_stats");
                details.errors.push(format!(
                    "No test results for student ID: {student_id}: {diagnostic}"
                ));
                (0, 0)
            }
        };
        let (passed_count, total_count) = (to_count(passed), to_count(total));

        details.processed += 1;
        if passed > 0 {
            score
                .mark_complete(&self.db, submission.id, passed_count, total_count)
                .await?;
            details.success += 1;
        } else {
            score
                .mark_incomplete(&self.db, passed_count, total_count)
                .await?;
            details.failed += 1;
        }

        tracing::debug!(student_id, question_id, passed, total, "Student re-graded");
        Ok(())
    }
}

fn to_count(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
