//! `compensator scan --job <name>`: dry-run a job's stale scan.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::{Config, WorkUnit};

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Job name as configured
    #[arg(long, short = 'J')]
    pub job: String,
}

#[derive(Debug, Serialize)]
pub struct ScanOutput {
    pub job: String,
    pub kind: String,
    pub window_secs: u64,
    pub units: Vec<WorkUnit>,
}

impl CommandOutput for ScanOutput {
    fn to_human(&self) -> String {
        let now = Utc::now();
        let mut table = list_table(&["resource", "status", "updated", "age", "retries", "owner"]);
        for unit in &self.units {
            table.add_row(vec![
                unit.id.to_string(),
                unit.status.to_string(),
                unit.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                format!("{}s", (now - unit.updated_at).num_seconds()),
                unit.retry_count.to_string(),
                truncate(unit.owner_hint.as_deref().unwrap_or("-"), 24),
            ]);
        }
        format!(
            "Job {} scans '{}' over the last {}s\n{}",
            self.job,
            self.kind,
            self.window_secs,
            render_list("stale unit", &table, self.units.len())
        )
    }
}

pub async fn execute(args: ScanArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let job = ctx.job(&args.job)?.clone();
    job.validate()?;

    let units = ctx.driver(&job)?.preview().await;
    output(
        &ScanOutput {
            job: job.name.clone(),
            kind: job.scan.kind.clone(),
            window_secs: job.scan.window_secs,
            units,
        },
        json_mode,
    );

    ctx.close().await;
    Ok(())
}
