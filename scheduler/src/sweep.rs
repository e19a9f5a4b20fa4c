use chrono::{DateTime, Utc};
use db::models::test_case_change_tracker::{self, TrackerStatus};
use sea_orm::{DatabaseConnection, DbErr};

use crate::dispatcher::DispatchTarget;
use crate::error::ReexecutionError;

/// Dispatches up to `batch_size` due pending trackers, earliest first.
///
/// Returns the dispatched ids without waiting for any of them to run.
pub async fn sweep(
    db: &DatabaseConnection,
    target: &dyn DispatchTarget,
    batch_size: u64,
    now: DateTime<Utc>,
) -> Result<Vec<i64>, DbErr> {
    let due = test_case_change_tracker::Model::find_due(db, now, batch_size).await?;
    tracing::info!(count = due.len(), batch_size, "Found due test case change trackers");

    let mut dispatched = Vec::with_capacity(due.len());
    for tracker in due {
        target.dispatch(tracker.id);
        tracing::info!(
            tracker_id = tracker.id,
            question_id = tracker.question_id,
            scheduled_at = %tracker.scheduled_at,
            "Dispatched re-execution job"
        );
        dispatched.push(tracker.id);
    }

    Ok(dispatched)
}

/// Dispatches one tracker immediately, ignoring its `scheduled_at`.
pub async fn execute_now(
    db: &DatabaseConnection,
    target: &dyn DispatchTarget,
    tracker_id: i64,
) -> Result<(), ReexecutionError> {
    let tracker = test_case_change_tracker::Model::find_by_id(db, tracker_id)
        .await?
        .ok_or(ReexecutionError::TrackerNotFound(tracker_id))?;

    if tracker.status != TrackerStatus::Pending {
        return Err(ReexecutionError::NotPending {
            id: tracker.id,
            status: tracker.status,
        });
    }

    target.dispatch(tracker.id);
    tracing::info!(tracker_id, "Dispatched re-execution job on request");
    Ok(())
}
