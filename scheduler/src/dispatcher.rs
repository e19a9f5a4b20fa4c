use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use util::config;

use crate::error::ReexecutionError;
use crate::queue::Slots;
use crate::worker::{Job, Outcome, Worker};

/// Anything that accepts tracker ids for re-execution.
pub trait DispatchTarget: Send + Sync {
    /// Queues `tracker_id`. Must not wait for the job to run.
    fn dispatch(&self, tracker_id: i64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Jobs allowed to run at once.
    pub concurrency: usize,
    /// Total attempts per job, first run included.
    pub max_attempts: u32,
    /// Delay before retry `n` is `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl DispatcherSettings {
    pub fn from_config() -> Self {
        Self {
            concurrency: config::worker_concurrency(),
            max_attempts: config::max_attempts(),
            retry_backoff: Duration::from_millis(config::retry_backoff_ms()),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1000),
        }
    }
}

/// Runs dispatched jobs in the background.
///
/// Jobs go through an unbounded channel and wait for one of
/// `concurrency` slots before running. A job whose worker returns an error
/// or panics is retried until `max_attempts` is reached.
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
    runner: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawns the job loop on the current runtime.
    pub fn start(worker: Arc<Worker>, settings: DispatcherSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = tokio::spawn(run_jobs(rx, worker, settings));
        Self { tx, runner }
    }

    /// Stops accepting jobs and waits for every queued and running job.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.runner.await {
            tracing::error!(error = %e, "Dispatcher loop panicked");
        }
    }
}

impl DispatchTarget for Dispatcher {
    fn dispatch(&self, tracker_id: i64) {
        if self.tx.send(Job::new(tracker_id)).is_err() {
            tracing::error!(tracker_id, "Dispatcher stopped, job dropped");
        }
    }
}

async fn run_jobs(
    mut rx: mpsc::UnboundedReceiver<Job>,
    worker: Arc<Worker>,
    settings: DispatcherSettings,
) {
    let slots = Slots::new(settings.concurrency);
    let mut in_flight = JoinSet::new();

    while let Some(job) = rx.recv().await {
        let worker = Arc::clone(&worker);
        let slots = slots.clone();

        in_flight.spawn(async move {
            let _slot = slots.acquire().await;
            run_with_retries(&worker, job, settings).await;
        });

        // Reap finished jobs so the set does not grow with every dispatch.
        while let Some(res) = in_flight.try_join_next() {
            log_panic(res);
        }
    }

    while let Some(res) = in_flight.join_next().await {
        log_panic(res);
    }
}

fn log_panic(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        tracing::error!(error = %e, "Re-execution job panicked");
    }
}

/// How a job ended after its last attempt.
#[derive(Debug)]
pub struct JobReport {
    pub job: Job,
    pub result: Result<Outcome, ReexecutionError>,
}

/// Runs `job` until the worker returns `Ok` or `max_attempts` attempts have
/// failed, sleeping `attempt * retry_backoff` between attempts. A panic in the
/// worker counts as a failed attempt.
pub async fn run_with_retries(
    worker: &Worker,
    mut job: Job,
    settings: DispatcherSettings,
) -> JobReport {
    let max_attempts = settings.max_attempts.max(1);

    loop {
        job.attempt += 1;
        let attempt = AssertUnwindSafe(worker.handle(&mut job))
            .catch_unwind()
            .await;
        let result = match attempt {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(&*payload);
                worker.record_panic(&job, &message).await;
                Err(ReexecutionError::Panicked(message))
            }
        };

        match result {
            Ok(outcome) => {
                return JobReport {
                    job,
                    result: Ok(outcome),
                };
            }
            Err(e) if job.attempt < max_attempts => {
                let delay = settings.retry_backoff * job.attempt;
                tracing::warn!(
                    tracker_id = job.tracker_id,
                    attempt = job.attempt,
                    max_attempts,
                    error = %e,
                    "Re-execution attempt failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::error!(
                    tracker_id = job.tracker_id,
                    attempts = job.attempt,
                    error = %e,
                    "Re-execution gave up"
                );
                return JobReport { job, result: Err(e) };
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
