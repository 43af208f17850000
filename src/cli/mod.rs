//! Command-line interface.

pub mod commands;
pub mod context;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::init::InitArgs;
use commands::jobs::JobsArgs;
use commands::locks::LocksArgs;
use commands::record::RecordArgs;
use commands::run::RunArgs;
use commands::scan::ScanArgs;
use commands::tick::TickArgs;

#[derive(Parser, Debug)]
#[command(name = "compensator")]
#[command(about = "Compensation and reconciliation control loops", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Config file to use instead of .compensator/config.yaml
    #[arg(short, long, global = true, env = "COMPENSATOR_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create .compensator/ with a starter config and the database
    Init(InitArgs),
    /// Run the scheduler for all enabled jobs until interrupted
    Run(RunArgs),
    /// Run one tick of a job now
    Tick(TickArgs),
    /// List configured jobs
    Jobs(JobsArgs),
    /// Show what a job's scan would pick up, without touching anything
    Scan(ScanArgs),
    /// Inspect live locks
    Locks(LocksArgs),
    /// Record a work unit in the ledger
    Record(RecordArgs),
}

/// Print an error in the requested format and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": chain.get(1..).unwrap_or_default(),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["compensator", "tick", "--job", "topic_compensation", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Tick(args) => assert_eq!(args.job, "topic_compensation"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_requires_job_for_tick() {
        assert!(Cli::try_parse_from(["compensator", "tick"]).is_err());
    }
}
