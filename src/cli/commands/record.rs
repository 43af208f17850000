//! `compensator record`: append a work record to the ledger.
//!
//! The normal processing path writes these; the command exists for
//! operators and for seeding test environments.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, ResourceId, WorkStatus, WorkUnit};

#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Ledger namespace (e.g. message, sandbox_task)
    #[arg(long, short)]
    pub kind: String,

    /// Resource id
    #[arg(long)]
    pub id: ResourceId,

    /// Status of the record
    #[arg(long, short, default_value = "pending", value_parser = parse_status)]
    pub status: WorkStatus,

    /// Free-form owner hint carried into logs
    #[arg(long)]
    pub owner: Option<String>,
}

fn parse_status(s: &str) -> Result<WorkStatus, String> {
    WorkStatus::from_str(s).ok_or_else(|| format!("unknown status '{s}'"))
}

#[derive(Debug, Serialize)]
pub struct RecordOutput {
    pub success: bool,
    pub unit: WorkUnit,
}

impl CommandOutput for RecordOutput {
    fn to_human(&self) -> String {
        format!(
            "Recorded {} {} as {}",
            self.unit.kind, self.unit.id, self.unit.status
        )
    }
}

pub async fn execute(args: RecordArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    let mut unit = WorkUnit::new(args.kind, args.id).with_status(args.status);
    if let Some(owner) = args.owner {
        unit = unit.with_owner_hint(owner);
    }
    ctx.ledger.record(&unit).await.context("Failed to record work unit")?;

    output(&RecordOutput { success: true, unit }, json_mode);
    ctx.close().await;
    Ok(())
}
