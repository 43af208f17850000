//! `compensator locks`: inspect live locks.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, render_list, CommandOutput};
use crate::domain::models::{Config, LockRecord};

#[derive(Args, Debug)]
pub struct LocksArgs {
    /// Only show keys starting with this prefix (e.g. a job name)
    #[arg(long, short, default_value = "")]
    pub prefix: String,

    /// Delete expired lock rows first
    #[arg(long)]
    pub purge: bool,
}

#[derive(Debug, Serialize)]
pub struct LocksOutput {
    pub purged: Option<u64>,
    pub locks: Vec<LockRecord>,
}

impl CommandOutput for LocksOutput {
    fn to_human(&self) -> String {
        let now = Utc::now();
        let mut table = list_table(&["key", "owner", "expires in"]);
        for lock in &self.locks {
            table.add_row(vec![
                lock.key.clone(),
                lock.owner.clone(),
                format!("{}s", (lock.expires_at - now).num_seconds().max(0)),
            ]);
        }
        let mut rendered = render_list("lock", &table, self.locks.len());
        if let Some(purged) = self.purged {
            rendered = format!("Purged {purged} expired lock(s).\n{rendered}");
        }
        rendered
    }
}

pub async fn execute(args: LocksArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    let purged = if args.purge {
        Some(ctx.locks.purge_expired().await.context("Failed to purge expired locks")?)
    } else {
        None
    };
    let locks = ctx
        .locks
        .inspect(&args.prefix)
        .await
        .context("Failed to read lock store")?;

    output(&LocksOutput { purged, locks }, json_mode);
    ctx.close().await;
    Ok(())
}
