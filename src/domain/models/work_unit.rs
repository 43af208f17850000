//! Work unit domain model.
//!
//! A work unit is the smallest granularity of recoverable work: a topic
//! whose messages were never answered, a sandbox task that never reported
//! back, and so on. The ledger stores individual records; a `WorkUnit`
//! summarises the latest record of one resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a recoverable resource (topic id, task id, message group key).
pub type ResourceId = i64;

/// Status of a work unit as recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    /// Enqueued, not yet picked up.
    Pending,
    /// Picked up by a consumer, result not yet written.
    Processing,
    /// Executing in an external runtime (e.g. a sandbox).
    Running,
    /// Finished unsuccessfully.
    Error,
    /// Finished successfully.
    Done,
}

impl Default for WorkStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Running => "running",
            Self::Error => "error",
            Self::Done => "done",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "running" => Some(Self::Running),
            "error" | "failed" => Some(Self::Error),
            "done" | "complete" | "completed" => Some(Self::Done),
            _ => None,
        }
    }

    /// Statuses the compensation scan looks for by default.
    pub fn default_stale_statuses() -> Vec<WorkStatus> {
        vec![Self::Pending, Self::Processing]
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recoverable item, as seen by the control loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Resource identifier (one candidate per resource).
    pub id: ResourceId,
    /// Ledger namespace, e.g. `message` or `sandbox_task`.
    pub kind: String,
    pub status: WorkStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Process or worker last seen handling this unit, if known.
    pub owner_hint: Option<String>,
    /// How many times an external authority reported this unit still active.
    pub retry_count: u32,
}

impl WorkUnit {
    /// Create a fresh pending unit, as the normal processing path would.
    pub fn new(kind: impl Into<String>, id: ResourceId) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: kind.into(),
            status: WorkStatus::Pending,
            created_at: now,
            updated_at: now,
            owner_hint: None,
            retry_count: 0,
        }
    }

    pub fn with_status(mut self, status: WorkStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn with_owner_hint(mut self, owner: impl Into<String>) -> Self {
        self.owner_hint = Some(owner.into());
        self
    }
}

/// Which timestamp column bounds the stale window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowField {
    CreatedAt,
    #[default]
    UpdatedAt,
}

impl WindowField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    /// Pick the matching timestamp off a unit.
    pub fn of(&self, unit: &WorkUnit) -> DateTime<Utc> {
        match self {
            Self::CreatedAt => unit.created_at,
            Self::UpdatedAt => unit.updated_at,
        }
    }
}

/// Bounds of one stale-work scan. Recomputed every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanWindow {
    /// Inclusive lower bound on the window timestamp.
    pub threshold: DateTime<Utc>,
    /// Maximum number of candidates.
    pub limit: usize,
}

impl ScanWindow {
    /// Window covering `[now - window, now]`, capped at `limit` candidates.
    pub fn ending_at(now: DateTime<Utc>, window: std::time::Duration, limit: usize) -> Self {
        let span = chrono::Duration::from_std(window).unwrap_or(chrono::TimeDelta::MAX);
        let threshold = now
            .checked_sub_signed(span)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { threshold, limit }
    }

    /// Inclusive containment check on the lower bound.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.threshold
    }
}

/// Ledger query issued by the stale-work scanner.
#[derive(Debug, Clone)]
pub struct StaleQuery {
    pub kind: String,
    pub statuses: Vec<WorkStatus>,
    pub since: DateTime<Utc>,
    pub window_field: WindowField,
    pub limit: usize,
}
