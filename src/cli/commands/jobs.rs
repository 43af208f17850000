//! `compensator jobs`: list configured jobs.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::{list_table, output, render_list, CommandOutput};
use crate::domain::models::{Config, ScheduleConfig};

#[derive(Args, Debug)]
pub struct JobsArgs {
    /// Only show enabled jobs
    #[arg(long)]
    pub enabled_only: bool,
}

#[derive(Debug, Serialize)]
pub struct JobRow {
    pub name: String,
    pub enabled: bool,
    pub action: String,
    pub schedule: String,
    pub kind: String,
    pub window_secs: u64,
    pub limit: usize,
    /// `None` when the job is valid.
    pub problem: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub jobs: Vec<JobRow>,
}

impl CommandOutput for JobList {
    fn to_human(&self) -> String {
        let mut table = list_table(&["name", "enabled", "action", "schedule", "kind", "window", "limit", "status"]);
        for job in &self.jobs {
            table.add_row(vec![
                job.name.clone(),
                if job.enabled { "yes" } else { "no" }.to_string(),
                job.action.clone(),
                job.schedule.clone(),
                job.kind.clone(),
                format!("{}s", job.window_secs),
                job.limit.to_string(),
                job.problem.clone().unwrap_or_else(|| "ok".to_string()),
            ]);
        }
        render_list("job", &table, self.jobs.len())
    }
}

pub fn describe_schedule(schedule: &ScheduleConfig) -> String {
    match schedule {
        ScheduleConfig::Interval { every_secs } => format!("every {every_secs}s"),
        ScheduleConfig::Cron { expression } => format!("cron '{expression}'"),
    }
}

pub fn list(config: &Config, enabled_only: bool) -> JobList {
    let jobs = config
        .jobs
        .iter()
        .filter(|job| !enabled_only || job.enabled)
        .map(|job| JobRow {
            name: job.name.clone(),
            enabled: job.enabled,
            action: job.action.as_str().to_string(),
            schedule: describe_schedule(&job.schedule),
            kind: job.scan.kind.clone(),
            window_secs: job.scan.window_secs,
            limit: job.scan.limit,
            problem: job.validate().err().map(|e| e.to_string()),
        })
        .collect();
    JobList { jobs }
}

pub async fn execute(args: JobsArgs, config: Config, json_mode: bool) -> Result<()> {
    output(&list(&config, args.enabled_only), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_flags_broken_jobs() {
        let config: Config = serde_yaml::from_str(
            r"
jobs:
  - name: ok_job
    enabled: true
    scan: { kind: message, window_secs: 600 }
    action: { type: compensate, handler_url: 'http://localhost:1/h' }
  - name: broken_job
    scan: { kind: message }
    action: { type: compensate, handler_url: 'http://localhost:1/h' }
",
        )
        .unwrap();

        let all = list(&config, false);
        assert_eq!(all.jobs.len(), 2);
        assert!(all.jobs[0].problem.is_none());
        assert!(all.jobs[1].problem.as_deref().unwrap().contains("window_secs"));
        assert_eq!(all.jobs[0].schedule, "every 60s");

        let enabled = list(&config, true);
        assert_eq!(enabled.jobs.len(), 1);
        assert!(enabled.to_human().contains("ok_job"));
    }
}
