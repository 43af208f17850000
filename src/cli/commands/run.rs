//! `compensator run`: schedule every enabled job until Ctrl-C.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, render_list, CommandOutput};
use crate::domain::models::{Config, TickOutcome};
use crate::services::{JobScheduler, JobStatus};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Seconds to wait for in-flight ticks after Ctrl-C
    #[arg(long, default_value = "30")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub drained: bool,
    pub jobs: Vec<JobStatus>,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["job", "schedule", "fires", "skipped", "last outcome"]);
        for job in &self.jobs {
            let last = job.last_report.as_ref().map_or_else(
                || "-".to_string(),
                |report| match &report.outcome {
                    TickOutcome::Completed { summary, .. } => {
                        format!("{}/{} ok", summary.succeeded, summary.total)
                    }
                    TickOutcome::LockHeld => "lock held".to_string(),
                    TickOutcome::Misconfigured { .. } => "misconfigured".to_string(),
                    TickOutcome::Failed { .. } => "failed".to_string(),
                },
            );
            table.add_row(vec![
                job.name.clone(),
                job.schedule.clone(),
                job.fire_count.to_string(),
                job.skipped_count.to_string(),
                last,
            ]);
        }
        let status = if self.drained {
            "Scheduler stopped."
        } else {
            "Scheduler stopped with ticks still in flight; their locks will expire."
        };
        format!("{status}\n{}", render_list("job", &table, self.jobs.len()))
    }
}

pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let scheduler = JobScheduler::new(ctx.config.scheduler.clone()).with_housekeeping(ctx.locks.clone());

    let mut registered = 0usize;
    for job in ctx.config.enabled_jobs() {
        let driver = match ctx.driver(job) {
            Ok(driver) => Arc::new(driver),
            Err(e) => {
                tracing::error!(job = %job.name, error = %format!("{e:#}"), "job could not be built, skipping");
                continue;
            }
        };
        match scheduler.register(driver).await {
            Ok(Some(_)) => registered += 1,
            Ok(None) => {}
            Err(e) => tracing::error!(job = %job.name, error = %e, "job could not be scheduled, skipping"),
        }
    }

    if registered == 0 {
        tracing::warn!("no enabled jobs to run; set `enabled: true` on a job in the config");
    }
    tracing::info!(jobs = registered, "scheduler starting");

    let handle = scheduler.start();
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested");

    scheduler.stop();
    let drained = scheduler.drain(Duration::from_secs(args.shutdown_timeout_secs)).await;
    handle.abort();

    output(
        &RunOutput {
            drained,
            jobs: scheduler.list().await,
        },
        json_mode,
    );
    ctx.close().await;
    Ok(())
}
