//! Declarative job configuration.
//!
//! Each control-loop job is described by one [`JobConfig`]: when it fires,
//! what it scans for, and which pipeline it drives (compensation through
//! a handler, or reconciliation against an external authority).

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use super::work_unit::{WindowField, WorkStatus};
use crate::domain::errors::{DomainError, DomainResult};

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleConfig {
    /// Fire at a fixed interval.
    Interval { every_secs: u64 },
    /// Fire according to a cron expression (seconds field included).
    Cron { expression: String },
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::Interval { every_secs: 60 }
    }
}

/// What the stale-work scanner looks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Ledger namespace to scan.
    #[serde(default)]
    pub kind: String,

    /// Statuses that count as "not finished".
    #[serde(default = "WorkStatus::default_stale_statuses")]
    pub statuses: Vec<WorkStatus>,

    /// Width of the stale window in seconds. Must be set per job.
    #[serde(default)]
    pub window_secs: u64,

    /// Timestamp column bounding the window.
    #[serde(default)]
    pub window_field: WindowField,

    /// Maximum candidates per tick.
    #[serde(default = "default_scan_limit")]
    pub limit: usize,
}

const fn default_scan_limit() -> usize {
    50
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            kind: String::new(),
            statuses: WorkStatus::default_stale_statuses(),
            window_secs: 0,
            window_field: WindowField::default(),
            limit: default_scan_limit(),
        }
    }
}

impl ScanConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Re-drive stale units through an idempotent handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensateConfig {
    #[serde(default)]
    pub handler_url: String,

    #[serde(default = "default_sub_batch_size")]
    pub sub_batch_size: usize,

    #[serde(default = "default_resource_lock_ttl_secs")]
    pub resource_lock_ttl_secs: u64,

    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

const fn default_sub_batch_size() -> usize {
    20
}

const fn default_resource_lock_ttl_secs() -> u64 {
    30
}

const fn default_handler_timeout_secs() -> u64 {
    30
}

/// Reconcile running units against an external authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub authority_url: String,

    #[serde(default = "default_inter_unit_delay_ms")]
    pub inter_unit_delay_ms: u64,

    #[serde(default = "default_resource_lock_ttl_secs")]
    pub resource_lock_ttl_secs: u64,

    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Warn once a unit has been reported active more than this many times.
    #[serde(default)]
    pub max_active_polls: Option<u32>,
}

const fn default_inter_unit_delay_ms() -> u64 {
    100
}

const fn default_poll_timeout_secs() -> u64 {
    10
}

/// Pipeline a job drives after scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobAction {
    Compensate(CompensateConfig),
    Reconcile(ReconcileConfig),
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compensate(_) => "compensate",
            Self::Reconcile(_) => "reconcile",
        }
    }
}

/// Full description of one control-loop job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,

    /// Jobs stay off unless explicitly enabled.
    #[serde(default)]
    pub enabled: bool,

    /// In-process hint: skip a local fire while the previous one is running.
    /// The global lock is the actual guarantee.
    #[serde(default = "default_true")]
    pub singleton: bool,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Must exceed the worst-case duration of one tick.
    #[serde(default = "default_global_lock_ttl_secs")]
    pub global_lock_ttl_secs: u64,

    #[serde(default)]
    pub scan: ScanConfig,

    pub action: JobAction,
}

const fn default_true() -> bool {
    true
}

const fn default_global_lock_ttl_secs() -> u64 {
    300
}

impl JobConfig {
    pub fn global_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.global_lock_ttl_secs)
    }

    /// Longest one tick can run when every unit hits its timeout.
    ///
    /// Compensation runs `ceil(limit / sub_batch_size)` sub-batches one after
    /// another, each bounded by the handler timeout. Reconciliation polls
    /// `limit` units one at a time, each bounded by the poll timeout plus the
    /// pause before the next unit.
    pub fn worst_case_tick(&self) -> Duration {
        let limit = u64::try_from(self.scan.limit).unwrap_or(u64::MAX);
        match &self.action {
            JobAction::Compensate(c) => {
                let sub_batch = u64::try_from(c.sub_batch_size.max(1)).unwrap_or(u64::MAX);
                Duration::from_secs(limit.div_ceil(sub_batch).saturating_mul(c.handler_timeout_secs))
            }
            JobAction::Reconcile(r) => {
                let per_unit_ms = r
                    .poll_timeout_secs
                    .saturating_mul(1000)
                    .saturating_add(r.inter_unit_delay_ms);
                Duration::from_millis(limit.saturating_mul(per_unit_ms))
            }
        }
    }

    /// Validate the job. Called on every tick; a failing job no-ops.
    pub fn validate(&self) -> DomainResult<()> {
        let invalid = |reason: String| DomainError::InvalidJobConfig {
            job: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("job name cannot be empty".to_string()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(invalid(format!(
                "job name '{}' may only contain ASCII letters, digits, '_', '-' and '.'",
                self.name
            )));
        }
        if self.global_lock_ttl_secs == 0 {
            return Err(invalid("global_lock_ttl_secs must be positive".to_string()));
        }

        match &self.schedule {
            ScheduleConfig::Interval { every_secs } if *every_secs == 0 => {
                return Err(invalid("schedule interval must be positive".to_string()));
            }
            ScheduleConfig::Cron { expression } => {
                cron::Schedule::from_str(expression)
                    .map_err(|e| invalid(format!("invalid cron expression '{expression}': {e}")))?;
            }
            ScheduleConfig::Interval { .. } => {}
        }

        if self.scan.kind.is_empty() {
            return Err(invalid("scan.kind is required".to_string()));
        }
        if self.scan.statuses.is_empty() {
            return Err(invalid("scan.statuses cannot be empty".to_string()));
        }
        if self.scan.window_secs == 0 {
            return Err(invalid("scan.window_secs is required".to_string()));
        }
        if self.scan.limit == 0 {
            return Err(invalid("scan.limit must be at least 1".to_string()));
        }

        match &self.action {
            JobAction::Compensate(c) => {
                validate_url(&c.handler_url).map_err(|e| invalid(format!("handler_url: {e}")))?;
                if c.sub_batch_size == 0 {
                    return Err(invalid("sub_batch_size must be at least 1".to_string()));
                }
                if c.resource_lock_ttl_secs == 0 {
                    return Err(invalid("resource_lock_ttl_secs must be positive".to_string()));
                }
                if c.handler_timeout_secs == 0 || c.handler_timeout_secs > c.resource_lock_ttl_secs {
                    return Err(invalid(format!(
                        "handler_timeout_secs ({}) must be positive and not exceed resource_lock_ttl_secs ({})",
                        c.handler_timeout_secs, c.resource_lock_ttl_secs
                    )));
                }
            }
            JobAction::Reconcile(r) => {
                validate_url(&r.authority_url)
                    .map_err(|e| invalid(format!("authority_url: {e}")))?;
                if r.resource_lock_ttl_secs == 0 {
                    return Err(invalid("resource_lock_ttl_secs must be positive".to_string()));
                }
                if r.poll_timeout_secs == 0 || r.poll_timeout_secs > r.resource_lock_ttl_secs {
                    return Err(invalid(format!(
                        "poll_timeout_secs ({}) must be positive and not exceed resource_lock_ttl_secs ({})",
                        r.poll_timeout_secs, r.resource_lock_ttl_secs
                    )));
                }
            }
        }

        // The global lock must outlive the tick it guards, or a second
        // process can start the same job mid-sweep.
        let worst_case = self.worst_case_tick();
        if self.global_lock_ttl() <= worst_case {
            return Err(invalid(format!(
                "global_lock_ttl_secs ({}) must exceed the worst-case tick duration ({}s)",
                self.global_lock_ttl_secs,
                worst_case.as_secs_f64().ceil()
            )));
        }

        Ok(())
    }
}

fn validate_url(url: &str) -> Result<(), String> {
    if url.is_empty() {
        return Err("missing".to_string());
    }
    let parsed = reqwest::Url::parse(url).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme '{other}'")),
    }
}
