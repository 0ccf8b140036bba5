// crates/cli/src/main.rs
//! `jobctl`: list, start, watch and control long-running server jobs.

mod args;
mod render;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use clap::Parser;
use console_jobs_core::{HttpJobService, JobTracker};
use console_jobs_observability::init_tracing;
use console_jobs_types::{JobCommand, JobId, JobRecord};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use crate::args::{Cli, Command};
use crate::render::ProgressBoard;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // reqwest and sentry pull different rustls backends; pick one up front.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let _log_guard = init_tracing(&cli.log_config())?;

    if let Some(addr) = cli.metrics_addr {
        install_metrics(addr)?;
    }

    let config = cli.resolve_config()?;
    let remote = Arc::new(HttpJobService::new(&config.service)?);
    tracing::debug!(base_url = remote.base_url(), "using job service");
    let tracker = JobTracker::new(remote, config.tracker.clone());

    let result = run(cli.command, &tracker).await;
    tracker.shutdown();
    result
}

fn install_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("starting metrics exporter on {addr}"))?;
    console_jobs_core::metrics::describe_metrics();
    tracing::info!(%addr, "serving Prometheus metrics");
    Ok(())
}

async fn run(command: Command, tracker: &JobTracker) -> Result<()> {
    match command {
        Command::List { json } => {
            tracker.load_existing().await?;
            let jobs = tracker.list();
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                print!("{}", render::table(&jobs));
            }
            Ok(())
        }
        Command::Watch { exit_when_done } => {
            tracker.load_existing().await?;
            follow(tracker, None, exit_when_done).await
        }
        Command::Start {
            kind,
            params,
            follow: keep_following,
        } => {
            let params = parse_params(params.as_deref())?;
            let record = tracker.start(kind, params).await?;
            println!("{}", record.id);
            if keep_following {
                follow(tracker, Some(record.id), true).await?;
            }
            Ok(())
        }
        other => match other.job_command() {
            Some((command, id)) => run_job_command(tracker, command, &id).await,
            None => Ok(()),
        },
    }
}

async fn run_job_command(tracker: &JobTracker, command: JobCommand, id: &JobId) -> Result<()> {
    // The tracker validates commands against the job's current status, so
    // it needs to know the job first.
    tracker.load_existing().await?;

    let record = match command {
        JobCommand::Retry => tracker.retry(id).await?,
        JobCommand::Cancel => tracker.cancel(id).await?,
        JobCommand::Pause => tracker.pause(id).await?,
        JobCommand::Resume => tracker.resume(id).await?,
        JobCommand::Delete => {
            let removed = tracker.delete(id).await?;
            println!("deleted {}", removed.id);
            return Ok(());
        }
    };
    println!("{} {}", record.id, render::detail(&record));
    Ok(())
}

fn parse_params(raw: Option<&str>) -> Result<serde_json::Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("--params is not valid JSON"),
        None => Ok(serde_json::Value::Object(Default::default())),
    }
}

fn lock(board: &Mutex<ProgressBoard>) -> MutexGuard<'_, ProgressBoard> {
    board.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Draw progress bars until Ctrl-C, or until the jobs are done when
/// `exit_when_done` is set. With `only`, a single job is shown.
async fn follow(tracker: &JobTracker, only: Option<JobId>, exit_when_done: bool) -> Result<()> {
    let visible = {
        let only = only.clone();
        move |jobs: &[JobRecord]| -> Vec<JobRecord> {
            jobs.iter()
                .filter(|job| only.as_ref().map_or(true, |id| job.id == *id))
                .cloned()
                .collect()
        }
    };

    let board = Arc::new(Mutex::new(ProgressBoard::new()));
    let initial = tracker.list();
    lock(&board).update(&visible(&initial));
    let (done_tx, mut done_rx) = watch::channel(render::done(&initial, only.as_ref()));

    let _subscription = {
        let board = board.clone();
        tracker.subscribe(move |jobs: &[JobRecord]| {
            lock(&board).update(&visible(jobs));
            done_tx.send_replace(render::done(jobs, only.as_ref()));
        })
    };

    let mut notices = tracker.errors();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if exit_when_done && *done_rx.borrow_and_update() {
            break;
        }
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("listening for Ctrl-C")?;
                tracing::debug!("interrupted");
                break;
            }
            notice = notices.recv() => match notice {
                Ok(notice) => lock(&board).println(&render::describe_notice(&notice)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "tracking notices dropped");
                }
                Err(RecvError::Closed) => break,
            },
            changed = done_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    lock(&board).finish();
    Ok(())
}
