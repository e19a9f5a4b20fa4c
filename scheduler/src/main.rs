use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use code_runner::HttpExecutionEngine;
use db::models::test_case_change_tracker::{self, TrackerStatus};
use scheduler::{Dispatcher, DispatcherSettings, Worker, execute_now, sweep};
use sea_orm::DatabaseConnection;
use util::{config, logging::init_logging};

#[derive(Parser, Debug)]
#[command(version, about = "Re-executes student code after test case changes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sweep over due trackers and wait for the jobs to finish (default)
    Process {
        /// Maximum trackers to pick up. Defaults to TEST_CASE_REEXECUTION_BATCH_SIZE
        #[arg(long)]
        batch_size: Option<u64>,
    },
    /// Sweep every SWEEP_INTERVAL_SECS until Ctrl-C
    Run,
    /// Re-execute one pending tracker now, ignoring its schedule
    Execute { tracker_id: i64 },
    /// Print tracker counts by status
    Stats,
    /// List trackers, newest first
    List {
        /// Only trackers in this status (pending, in_progress, completed, failed)
        #[arg(long)]
        status: Option<TrackerStatus>,
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long, default_value_t = 20)]
        per_page: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&config::log_file());

    let db = db::connect().await.context("Failed to connect to database")?;

    match cli.command.unwrap_or(Command::Process { batch_size: None }) {
        Command::Process { batch_size } => {
            let dispatcher = start_dispatcher(&db)?;
            let batch_size = batch_size.unwrap_or_else(config::batch_size);
            let dispatched = sweep(&db, &dispatcher, batch_size, Utc::now()).await?;
            dispatcher.shutdown().await;
            println!("Processed {} test case change trackers", dispatched.len());
        }
        Command::Run => {
            let dispatcher = start_dispatcher(&db)?;
            run_forever(&db, &dispatcher).await;
            dispatcher.shutdown().await;
        }
        Command::Execute { tracker_id } => {
            let dispatcher = start_dispatcher(&db)?;
            let queued = execute_now(&db, &dispatcher, tracker_id).await;
            dispatcher.shutdown().await;
            queued?;
            println!("Re-execution of tracker {tracker_id} finished");
        }
        Command::Stats => {
            let stats = test_case_change_tracker::Model::count_by_status(&db).await?;
            println!("pending:     {}", stats.pending);
            println!("in_progress: {}", stats.in_progress);
            println!("completed:   {}", stats.completed);
            println!("failed:      {}", stats.failed);
        }
        Command::List {
            status,
            page,
            per_page,
        } => {
            let (trackers, total) =
                test_case_change_tracker::Model::list(&db, status, page, per_page).await?;
            for tracker in &trackers {
                let completed_at = tracker
                    .completed_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>6}  question {:<6} {:<8} {:<12} scheduled {}  completed {}",
                    tracker.id,
                    tracker.question_id,
                    tracker.change_type,
                    tracker.status,
                    tracker.scheduled_at.to_rfc3339(),
                    completed_at,
                );
            }
            println!("{} of {} trackers (page {})", trackers.len(), total, page.max(1));
        }
    }

    Ok(())
}

fn start_dispatcher(db: &DatabaseConnection) -> Result<Dispatcher> {
    let engine = HttpExecutionEngine::from_config().context("Failed to build engine client")?;
    tracing::info!(engine = engine.base_url(), "Using execution engine");

    let worker = Arc::new(Worker::new(db.clone(), Arc::new(engine)));
    Ok(Dispatcher::start(worker, DispatcherSettings::from_config()))
}

async fn run_forever(db: &DatabaseConnection, dispatcher: &Dispatcher) {
    let period = Duration::from_secs(config::sweep_interval_secs().max(1));
    let mut ticker = tokio::time::interval(period);
    tracing::info!(
        "{} sweeping every {}s",
        config::project_name(),
        period.as_secs()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sweep(db, dispatcher, config::batch_size(), Utc::now()).await {
                    tracing::error!(error = %e, "Sweep failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested, draining jobs");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_parses_status_filter() {
        let cli = Cli::try_parse_from(["scheduler", "list", "--status", "in_progress"]).unwrap();
        match cli.command {
            Some(Command::List {
                status,
                page,
                per_page,
            }) => {
                assert_eq!(status, Some(TrackerStatus::InProgress));
                assert_eq!(page, 1);
                assert_eq!(per_page, 20);
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn list_rejects_unknown_status() {
        assert!(Cli::try_parse_from(["scheduler", "list", "--status", "stalled"]).is_err());
    }
}
