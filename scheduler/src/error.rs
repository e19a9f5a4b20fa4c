use db::models::test_case_change_tracker::TrackerStatus;
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReexecutionError {
    #[error(transparent)]
    Db(#[from] DbErr),

    #[error("Tracker {0} not found")]
    TrackerNotFound(i64),

    /// Manual execution only accepts trackers that have not started.
    #[error("Tracker {id} is {status}, not pending")]
    NotPending { id: i64, status: TrackerStatus },

    #[error("Job panicked: {0}")]
    Panicked(String),
}
