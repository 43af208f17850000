//! Per-tick processing results.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::work_unit::ResourceId;

/// Immutable per-tick context handed to every worker.
#[derive(Debug, Clone, Serialize)]
pub struct TickContext {
    pub job_name: String,
    pub tick_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl TickContext {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            tick_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }
}

/// Why a unit did not succeed this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Another process holds the resource lock. Expected, not an error.
    LockFailed,
    /// The handler failed (error, panic or timeout), or the ledger write
    /// recording the outcome did.
    ProcessingFailed,
    /// The external authority could not be reached.
    PollFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockFailed => "lock_failed",
            Self::ProcessingFailed => "processing_failed",
            Self::PollFailed => "poll_failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one unit within a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub unit_id: ResourceId,
    pub success: bool,
    pub reason: Option<FailureReason>,
    pub error: Option<String>,
    /// Count reported by the handler (0 for reconciler outcomes).
    pub processed: u64,
    pub duration_ms: u64,
}

impl BatchResult {
    pub fn succeeded(unit_id: ResourceId, processed: u64, duration_ms: u64) -> Self {
        Self {
            unit_id,
            success: true,
            reason: None,
            error: None,
            processed,
            duration_ms,
        }
    }

    pub fn failed(
        unit_id: ResourceId,
        reason: FailureReason,
        error: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            unit_id,
            success: false,
            reason: Some(reason),
            error,
            processed: 0,
            duration_ms,
        }
    }
}

/// Aggregate counts for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub processed: u64,
    pub by_reason: BTreeMap<FailureReason, usize>,
}

impl BatchSummary {
    pub fn from_results(results: &[BatchResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            if result.success {
                summary.succeeded += 1;
                summary.processed += result.processed;
            } else {
                summary.failed += 1;
            }
            if let Some(reason) = result.reason {
                *summary.by_reason.entry(reason).or_default() += 1;
            }
        }
        summary
    }

    pub fn count(&self, reason: FailureReason) -> usize {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }
}

/// How a tick ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// The pipeline ran; per-unit results are attached.
    Completed {
        summary: BatchSummary,
        results: Vec<BatchResult>,
    },
    /// Another process holds the job's global lock.
    LockHeld,
    /// The job's configuration is unusable; the tick was a no-op.
    Misconfigured { reason: String },
    /// The pipeline failed as a whole (it panicked).
    Failed { reason: String },
}

/// Report returned by one control-loop tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub job_name: String,
    pub tick_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: TickOutcome,
}

impl TickReport {
    pub fn summary(&self) -> Option<&BatchSummary> {
        match &self.outcome {
            TickOutcome::Completed { summary, .. } => Some(summary),
            _ => None,
        }
    }

    pub fn results(&self) -> &[BatchResult] {
        match &self.outcome {
            TickOutcome::Completed { results, .. } => results,
            _ => &[],
        }
    }
}
