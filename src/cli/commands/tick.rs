//! `compensator tick --job <name>`: run one tick now.

use anyhow::Result;
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::{Config, TickOutcome, TickReport};

#[derive(Args, Debug)]
pub struct TickArgs {
    /// Job name as configured
    #[arg(long, short = 'J')]
    pub job: String,

    /// Run even if the job is disabled
    #[arg(long)]
    pub include_disabled: bool,
}

impl CommandOutput for TickReport {
    fn to_human(&self) -> String {
        let header = format!("Job {} tick {} ({}ms)", self.job_name, self.tick_id, self.duration_ms);
        match &self.outcome {
            TickOutcome::LockHeld => format!("{header}: skipped, another process holds the job lock"),
            TickOutcome::Misconfigured { reason } => format!("{header}: job misconfigured: {reason}"),
            TickOutcome::Failed { reason } => format!("{header}: failed: {reason}"),
            TickOutcome::Completed { summary, results } => {
                let mut lines = vec![format!(
                    "{header}: {} candidate(s), {} succeeded, {} failed, {} item(s) processed",
                    summary.total, summary.succeeded, summary.failed, summary.processed
                )];
                let failures: Vec<_> = results.iter().filter(|r| !r.success).collect();
                if !failures.is_empty() {
                    let mut table = list_table(&["resource", "reason", "error"]);
                    for failure in &failures {
                        table.add_row(vec![
                            failure.unit_id.to_string(),
                            failure.reason.map(|r| r.to_string()).unwrap_or_default(),
                            truncate(failure.error.as_deref().unwrap_or("-"), 60),
                        ]);
                    }
                    lines.push(table.to_string());
                }
                lines.join("\n")
            }
        }
    }
}

pub async fn execute(args: TickArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let job = ctx.job(&args.job)?.clone();
    if !job.enabled && !args.include_disabled {
        anyhow::bail!("Job '{}' is disabled. Pass --include-disabled to run it anyway.", job.name);
    }

    let driver = ctx.driver(&job)?;
    let report = driver.tick().await;
    output(&report, json_mode);

    ctx.close().await;
    Ok(())
}
