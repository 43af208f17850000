//! Implementation of the `compensator init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::config::loader::CONFIG_DIR;

/// Starter configuration. Both jobs ship disabled.
const STARTER_CONFIG: &str = r"# compensator configuration
#
# Every key can be overridden with COMPENSATOR_<SECTION>__<KEY> environment
# variables, and .compensator/local.yaml is merged on top of this file.

database:
  path: .compensator/compensator.db
  max_connections: 10

logging:
  level: info
  format: json
  rotation: daily
  # log_dir: .compensator/logs

lock_store:
  # sqlite shares locks with every process using this database.
  backend: sqlite

scheduler:
  tick_interval_ms: 1000

jobs:
  # Re-drive message groups whose latest message never finished.
  - name: topic_compensation
    enabled: false
    schedule:
      type: interval
      every_secs: 60
    global_lock_ttl_secs: 300
    scan:
      kind: message
      statuses: [pending, processing]
      window_secs: 1200
      window_field: updated_at
      limit: 50
    action:
      type: compensate
      handler_url: http://localhost:8080/compensate
      sub_batch_size: 20
      resource_lock_ttl_secs: 30
      handler_timeout_secs: 30

  # Settle sandbox tasks the runtime no longer knows about.
  - name: sandbox_reconcile
    enabled: false
    schedule:
      type: cron
      expression: '0 0 * * * *'
    # Must exceed a full sweep: limit x (poll_timeout + inter_unit_delay).
    global_lock_ttl_secs: 600
    scan:
      kind: sandbox_task
      statuses: [running]
      window_secs: 10800
      window_field: created_at
      limit: 50
    action:
      type: reconcile
      authority_url: http://localhost:9000
      inter_unit_delay_ms: 100
      resource_lock_ttl_secs: 30
      poll_timeout_secs: 10
";

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub config_written: bool,
    pub database_path: PathBuf,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if self.config_written {
            lines.push(format!("\nWrote {CONFIG_DIR}/config.yaml (jobs start disabled)"));
        }
        lines.push(format!("Database ready at {}", self.database_path.display()));
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };

    let config_dir = target_path.join(CONFIG_DIR);
    fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;

    let config_path = config_dir.join("config.yaml");
    let config_written = if !config_path.exists() || args.force {
        fs::write(&config_path, STARTER_CONFIG)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        true
    } else {
        false
    };

    let database_path = config_dir.join("compensator.db");
    let pool = initialize_database(&format!("sqlite:{}", database_path.display()), None)
        .await
        .context("Failed to initialize database")?;
    pool.close().await;

    let message = if config_written {
        "Project initialized successfully."
    } else {
        "Existing config kept (use --force to overwrite); database is up to date."
    };

    output(
        &InitOutput {
            success: true,
            message: message.to_string(),
            initialized_path: target_path,
            config_written,
            database_path,
        },
        json_mode,
    );
    Ok(())
}
