//! Re-grades student submissions after test cases change.
//!
//! [`sweep`](sweep::sweep) finds due change trackers and hands them to a
//! [`Dispatcher`], whose [`Worker`]s re-run each affected student's code
//! through the execution engine and update their scores.

pub mod dispatcher;
pub mod error;
mod queue;
pub mod sweep;
pub mod worker;

pub use dispatcher::{
    DispatchTarget, Dispatcher, DispatcherSettings, JobReport, run_with_retries,
};
pub use error::ReexecutionError;
pub use sweep::{execute_now, sweep};
pub use worker::{Job, Outcome, Worker};
