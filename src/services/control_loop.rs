//! One tick of a control-loop job.
//!
//! A tick validates the job, takes the job's global lock, scans for stale
//! work, hands the candidates to the job's pipeline and releases the global
//! lock. The driver never returns an error: every way a tick can end is a
//! [`TickOutcome`].

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::batch_processor::{panic_message, BatchConfig, ConcurrentBatchProcessor};
use super::lock_coordinator::{GlobalLockCoordinator, ResourceLockCoordinator};
use super::stale_scanner::StaleWorkScanner;
use super::state_reconciler::{ExternalStateReconciler, ReconcilerConfig};
use crate::adapters::http::{HttpSandboxAuthority, HttpUnitHandler};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    BatchResult, BatchSummary, JobAction, JobConfig, TickContext, TickOutcome, TickReport, WorkUnit,
};
use crate::domain::ports::{ExternalAuthority, LockStore, UnitHandler, WorkLedger};

/// What a job does with its stale candidates.
pub enum Pipeline {
    Compensate {
        processor: ConcurrentBatchProcessor,
        handler: Arc<dyn UnitHandler>,
    },
    Reconcile {
        reconciler: ExternalStateReconciler,
    },
}

pub struct ControlLoopDriver {
    job: JobConfig,
    global: GlobalLockCoordinator,
    scanner: StaleWorkScanner,
    pipeline: Pipeline,
}

impl ControlLoopDriver {
    pub fn new(
        job: JobConfig,
        global: GlobalLockCoordinator,
        scanner: StaleWorkScanner,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            job,
            global,
            scanner,
            pipeline,
        }
    }

    /// Build a compensation driver around an explicit handler.
    pub fn compensating(
        job: JobConfig,
        store: Arc<dyn LockStore>,
        ledger: Arc<dyn WorkLedger>,
        handler: Arc<dyn UnitHandler>,
    ) -> DomainResult<Self> {
        let JobAction::Compensate(action) = &job.action else {
            return Err(action_mismatch(&job, "compensate"));
        };

        let locks = ResourceLockCoordinator::new(
            store.clone(),
            job.name.clone(),
            Duration::from_secs(action.resource_lock_ttl_secs),
        );
        let processor = ConcurrentBatchProcessor::new(locks, BatchConfig::from(action));
        let global = GlobalLockCoordinator::new(store, job.global_lock_ttl());
        let scanner = StaleWorkScanner::new(ledger, job.scan.clone());

        Ok(Self::new(job, global, scanner, Pipeline::Compensate { processor, handler }))
    }

    /// Build a reconciliation driver around an explicit authority.
    pub fn reconciling(
        job: JobConfig,
        store: Arc<dyn LockStore>,
        ledger: Arc<dyn WorkLedger>,
        authority: Arc<dyn ExternalAuthority>,
    ) -> DomainResult<Self> {
        let JobAction::Reconcile(action) = &job.action else {
            return Err(action_mismatch(&job, "reconcile"));
        };

        let locks = ResourceLockCoordinator::new(
            store.clone(),
            job.name.clone(),
            Duration::from_secs(action.resource_lock_ttl_secs),
        );
        let reconciler =
            ExternalStateReconciler::new(ledger.clone(), authority, locks, ReconcilerConfig::from(action));
        let global = GlobalLockCoordinator::new(store, job.global_lock_ttl());
        let scanner = StaleWorkScanner::new(ledger, job.scan.clone());

        Ok(Self::new(job, global, scanner, Pipeline::Reconcile { reconciler }))
    }

    /// Build a driver wired to the HTTP handler or authority named in the job.
    pub fn from_config(
        job: JobConfig,
        store: Arc<dyn LockStore>,
        ledger: Arc<dyn WorkLedger>,
    ) -> DomainResult<Self> {
        match &job.action {
            JobAction::Compensate(c) => {
                let handler = HttpUnitHandler::new(
                    c.handler_url.clone(),
                    Duration::from_secs(c.handler_timeout_secs),
                )?;
                Self::compensating(job, store, ledger, Arc::new(handler))
            }
            JobAction::Reconcile(r) => {
                let authority = HttpSandboxAuthority::new(
                    r.authority_url.clone(),
                    Duration::from_secs(r.poll_timeout_secs),
                )?;
                Self::reconciling(job, store, ledger, Arc::new(authority))
            }
        }
    }

    pub fn job(&self) -> &JobConfig {
        &self.job
    }

    /// Run the scan only, without locks or side effects.
    pub async fn preview(&self) -> Vec<WorkUnit> {
        let window = self.scanner.window(chrono::Utc::now());
        self.scanner.scan(&window).await
    }

    /// Run one tick.
    pub async fn tick(&self) -> TickReport {
        let ctx = Arc::new(TickContext::new(self.job.name.clone()));
        let started = Instant::now();

        tracing::info!(
            job = %ctx.job_name,
            tick_id = %ctx.tick_id,
            action = self.job.action.as_str(),
            "tick started"
        );

        let outcome = self.run(&ctx).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &outcome {
            TickOutcome::Completed { summary, .. } => tracing::info!(
                job = %ctx.job_name,
                tick_id = %ctx.tick_id,
                total = summary.total,
                succeeded = summary.succeeded,
                failed = summary.failed,
                duration_ms,
                "tick completed"
            ),
            TickOutcome::LockHeld => tracing::info!(
                job = %ctx.job_name,
                tick_id = %ctx.tick_id,
                duration_ms,
                "tick skipped, another process is running this job"
            ),
            TickOutcome::Misconfigured { .. } | TickOutcome::Failed { .. } => tracing::warn!(
                job = %ctx.job_name,
                tick_id = %ctx.tick_id,
                duration_ms,
                "tick ended without running"
            ),
        }

        TickReport {
            job_name: ctx.job_name.clone(),
            tick_id: ctx.tick_id,
            started_at: ctx.started_at,
            duration_ms,
            outcome,
        }
    }

    async fn run(&self, ctx: &Arc<TickContext>) -> TickOutcome {
        if let Err(e) = self.job.validate() {
            tracing::error!(job = %ctx.job_name, error = %e, "job misconfigured, skipping tick");
            return TickOutcome::Misconfigured { reason: e.to_string() };
        }

        let Some(lock) = self.global.acquire(&self.job.name).await else {
            return TickOutcome::LockHeld;
        };

        let outcome = match AssertUnwindSafe(self.run_pipeline(ctx.clone()))
            .catch_unwind()
            .await
        {
            Ok(results) => TickOutcome::Completed {
                summary: BatchSummary::from_results(&results),
                results,
            },
            Err(panic) => {
                let reason = format!("pipeline panicked: {}", panic_message(panic.as_ref()));
                tracing::error!(job = %ctx.job_name, tick_id = %ctx.tick_id, error = %reason, "tick failed");
                TickOutcome::Failed { reason }
            }
        };

        self.global.release(&lock).await;
        outcome
    }

    async fn run_pipeline(&self, ctx: Arc<TickContext>) -> Vec<BatchResult> {
        let window = self.scanner.window(ctx.started_at);
        let units = self.scanner.scan(&window).await;
        if units.is_empty() {
            tracing::debug!(job = %ctx.job_name, "no stale work");
            return Vec::new();
        }

        match &self.pipeline {
            Pipeline::Compensate { processor, handler } => {
                processor.process(ctx, units, handler.clone()).await
            }
            Pipeline::Reconcile { reconciler } => reconciler.reconcile(ctx, units).await,
        }
    }
}

fn action_mismatch(job: &JobConfig, expected: &str) -> DomainError {
    DomainError::InvalidJobConfig {
        job: job.name.clone(),
        reason: format!("expected a {expected} action, found {}", job.action.as_str()),
    }
}
