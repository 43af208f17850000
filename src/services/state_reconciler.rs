//! Reconciliation of locally running units against an external authority.
//!
//! The authority (e.g. a sandbox runtime) is the source of truth. A unit
//! the ledger believes is `running` is polled once per tick:
//!
//! - authority says active: leave it running, bump its retry counter
//! - authority says terminal or has never heard of it: mark it `error`
//! - authority unreachable: touch nothing
//! - ledger read or write fails: report it, the next tick retries
//!
//! Units are polled one at a time with a fixed pause in between so a large
//! recovery sweep does not hammer the authority. Every ledger write happens
//! under the unit's resource lock.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::lock_coordinator::ResourceLockCoordinator;
use crate::domain::models::{
    BatchResult, BatchSummary, FailureReason, ReconcileConfig, TickContext, WorkStatus, WorkUnit,
};
use crate::domain::ports::{ExternalAuthority, RemoteState, WorkLedger};

/// Configuration for the state reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Pause between two polls.
    pub inter_unit_delay: Duration,
    /// Warn when a unit has been reported active more often than this.
    pub max_active_polls: Option<u32>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            inter_unit_delay: Duration::from_millis(100),
            max_active_polls: None,
        }
    }
}

impl From<&ReconcileConfig> for ReconcilerConfig {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            inter_unit_delay: Duration::from_millis(config.inter_unit_delay_ms),
            max_active_polls: config.max_active_polls,
        }
    }
}

/// What happened to one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Authority still runs it; counter bumped to the given value.
    StillActive { polls: u32 },
    /// Authority reported terminal or unknown; ledger moved to `error`.
    MarkedError,
    /// Ledger no longer shows it running (someone else finished it).
    AlreadySettled,
    /// Authority could not be asked.
    PollFailed { error: String },
    /// The ledger could not be read or written.
    LedgerFailed { error: String },
    /// Another process holds the unit.
    LockFailed,
}

pub struct ExternalStateReconciler {
    ledger: Arc<dyn WorkLedger>,
    authority: Arc<dyn ExternalAuthority>,
    locks: ResourceLockCoordinator,
    config: ReconcilerConfig,
}

impl ExternalStateReconciler {
    pub fn new(
        ledger: Arc<dyn WorkLedger>,
        authority: Arc<dyn ExternalAuthority>,
        locks: ResourceLockCoordinator,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            authority,
            locks,
            config,
        }
    }

    /// Reconcile every unit in order, pausing between units.
    pub async fn reconcile(&self, ctx: Arc<TickContext>, units: Vec<WorkUnit>) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(units.len());

        for (index, unit) in units.iter().enumerate() {
            if index > 0 && !self.config.inter_unit_delay.is_zero() {
                tokio::time::sleep(self.config.inter_unit_delay).await;
            }

            let started = Instant::now();
            let outcome = self.reconcile_unit(&ctx, unit).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            results.push(to_result(unit, outcome, duration_ms));
        }

        let summary = BatchSummary::from_results(&results);
        tracing::info!(
            job = %ctx.job_name,
            tick_id = %ctx.tick_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            lock_failed = summary.count(FailureReason::LockFailed),
            poll_failed = summary.count(FailureReason::PollFailed),
            ledger_failed = summary.count(FailureReason::ProcessingFailed),
            "reconciliation sweep complete"
        );

        results
    }

    /// Reconcile one unit under its resource lock.
    pub async fn reconcile_unit(&self, ctx: &TickContext, unit: &WorkUnit) -> ReconcileOutcome {
        let Some(lock) = self.locks.acquire(unit.id).await else {
            return ReconcileOutcome::LockFailed;
        };

        let outcome = self.reconcile_locked(ctx, unit).await;
        self.locks.release(&lock).await;
        outcome
    }

    async fn reconcile_locked(&self, ctx: &TickContext, unit: &WorkUnit) -> ReconcileOutcome {
        // The scan result may be stale by the time we hold the lock.
        let current = match self.ledger.get(&unit.kind, unit.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                tracing::warn!(job = %ctx.job_name, resource_id = unit.id, "unit vanished from ledger");
                return ReconcileOutcome::AlreadySettled;
            }
            Err(e) => {
                tracing::error!(job = %ctx.job_name, resource_id = unit.id, error = %e, "failed to re-read unit");
                return ReconcileOutcome::LedgerFailed { error: e.to_string() };
            }
        };
        if current.status != WorkStatus::Running {
            tracing::debug!(resource_id = unit.id, status = %current.status, "unit already settled");
            return ReconcileOutcome::AlreadySettled;
        }

        let remote = match self.authority.poll(&current).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    job = %ctx.job_name,
                    resource_id = unit.id,
                    error = %e,
                    "authority poll failed, leaving unit untouched"
                );
                return ReconcileOutcome::PollFailed { error: e.to_string() };
            }
        };

        match remote {
            RemoteState::Active => match self.ledger.increment_retry(&current.kind, current.id).await {
                Ok(polls) => {
                    if self.config.max_active_polls.is_some_and(|max| polls > max) {
                        let age_secs = (Utc::now() - current.created_at).num_seconds();
                        tracing::warn!(
                            job = %ctx.job_name,
                            resource_id = unit.id,
                            polls,
                            age_secs,
                            "unit has been running for suspiciously long"
                        );
                    } else {
                        tracing::debug!(resource_id = unit.id, polls, "unit still active remotely");
                    }
                    ReconcileOutcome::StillActive { polls }
                }
                Err(e) => {
                    tracing::error!(resource_id = unit.id, error = %e, "failed to bump retry counter");
                    ReconcileOutcome::LedgerFailed { error: e.to_string() }
                }
            },
            RemoteState::Terminal | RemoteState::Unknown => {
                match self
                    .ledger
                    .transition_status(&current.kind, current.id, WorkStatus::Running, WorkStatus::Error)
                    .await
                {
                    Ok(true) => {
                        tracing::info!(
                            job = %ctx.job_name,
                            resource_id = unit.id,
                            remote = ?remote,
                            "unit marked error after authority report"
                        );
                        ReconcileOutcome::MarkedError
                    }
                    Ok(false) => ReconcileOutcome::AlreadySettled,
                    Err(e) => {
                        tracing::error!(resource_id = unit.id, error = %e, "failed to persist error status");
                        ReconcileOutcome::LedgerFailed { error: e.to_string() }
                    }
                }
            }
        }
    }
}

fn to_result(unit: &WorkUnit, outcome: ReconcileOutcome, duration_ms: u64) -> BatchResult {
    match outcome {
        ReconcileOutcome::StillActive { .. }
        | ReconcileOutcome::MarkedError
        | ReconcileOutcome::AlreadySettled => BatchResult::succeeded(unit.id, 0, duration_ms),
        ReconcileOutcome::PollFailed { error } => {
            BatchResult::failed(unit.id, FailureReason::PollFailed, Some(error), duration_ms)
        }
        ReconcileOutcome::LedgerFailed { error } => {
            BatchResult::failed(unit.id, FailureReason::ProcessingFailed, Some(error), duration_ms)
        }
        ReconcileOutcome::LockFailed => {
            BatchResult::failed(unit.id, FailureReason::LockFailed, None, duration_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryLockStore, InMemoryWorkLedger};
    use crate::domain::errors::{DomainError, DomainResult};
    use crate::domain::models::ResourceId;
    use crate::domain::ports::LockStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Authority answering from a fixed table; missing ids are unreachable.
    struct ScriptedAuthority {
        states: HashMap<ResourceId, RemoteState>,
    }

    #[async_trait]
    impl ExternalAuthority for ScriptedAuthority {
        async fn poll(&self, unit: &WorkUnit) -> DomainResult<RemoteState> {
            self.states
                .get(&unit.id)
                .copied()
                .ok_or_else(|| DomainError::AuthorityUnavailable("connection refused".to_string()))
        }
    }

    async fn setup(
        states: &[(ResourceId, RemoteState)],
        running: &[ResourceId],
    ) -> (Arc<InMemoryWorkLedger>, Arc<dyn LockStore>, ExternalStateReconciler) {
        let ledger = Arc::new(InMemoryWorkLedger::new());
        for id in running {
            ledger
                .record(&WorkUnit::new("sandbox_task", *id).with_status(WorkStatus::Running))
                .await
                .unwrap();
        }
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let locks = ResourceLockCoordinator::new(store.clone(), "sandbox_reconcile", Duration::from_secs(30));
        let authority = Arc::new(ScriptedAuthority {
            states: states.iter().copied().collect(),
        });
        let reconciler = ExternalStateReconciler::new(
            ledger.clone(),
            authority,
            locks,
            ReconcilerConfig {
                inter_unit_delay: Duration::ZERO,
                max_active_polls: Some(3),
            },
        );
        (ledger, store, reconciler)
    }

    #[tokio::test]
    async fn test_state_machine() {
        let (ledger, store, reconciler) = setup(
            &[(1, RemoteState::Active), (2, RemoteState::Terminal), (3, RemoteState::Unknown)],
            &[1, 2, 3, 4],
        )
        .await;
        let units = ledger.all().await;

        let results = reconciler
            .reconcile(Arc::new(TickContext::new("sandbox_reconcile")), units)
            .await;

        assert_eq!(results.len(), 4);
        let status = |id| {
            let ledger = ledger.clone();
            async move { ledger.get("sandbox_task", id).await.unwrap().unwrap() }
        };
        assert_eq!(status(1).await.status, WorkStatus::Running);
        assert_eq!(status(1).await.retry_count, 1);
        assert_eq!(status(2).await.status, WorkStatus::Error);
        assert_eq!(status(3).await.status, WorkStatus::Error);
        // Unreachable authority: untouched.
        assert_eq!(status(4).await.status, WorkStatus::Running);
        assert_eq!(status(4).await.retry_count, 0);
        assert_eq!(results[3].reason, Some(FailureReason::PollFailed));

        assert!(store.inspect("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settled_units_are_skipped() {
        let (ledger, _store, reconciler) = setup(&[(1, RemoteState::Terminal)], &[1]).await;
        let stale_view = ledger.all().await;
        ledger
            .transition_status("sandbox_task", 1, WorkStatus::Running, WorkStatus::Done)
            .await
            .unwrap();

        let ctx = TickContext::new("sandbox_reconcile");
        assert_eq!(
            reconciler.reconcile_unit(&ctx, &stale_view[0]).await,
            ReconcileOutcome::AlreadySettled
        );
        assert_eq!(ledger.get("sandbox_task", 1).await.unwrap().unwrap().status, WorkStatus::Done);
    }

    #[tokio::test]
    async fn test_locked_unit_is_not_touched() {
        let (ledger, store, reconciler) = setup(&[(1, RemoteState::Terminal)], &[1]).await;
        store
            .try_acquire("sandbox_reconcile:resource:1", "other", Duration::from_secs(30))
            .await
            .unwrap();

        let ctx = TickContext::new("sandbox_reconcile");
        let unit = ledger.all().await.remove(0);
        assert_eq!(reconciler.reconcile_unit(&ctx, &unit).await, ReconcileOutcome::LockFailed);
        assert_eq!(ledger.get("sandbox_task", 1).await.unwrap().unwrap().status, WorkStatus::Running);
    }

    #[tokio::test]
    async fn test_repeated_active_polls_accumulate() {
        let (ledger, _store, reconciler) = setup(&[(1, RemoteState::Active)], &[1]).await;
        let ctx = TickContext::new("sandbox_reconcile");
        let unit = ledger.all().await.remove(0);

        for expected in 1..=5 {
            assert_eq!(
                reconciler.reconcile_unit(&ctx, &unit).await,
                ReconcileOutcome::StillActive { polls: expected }
            );
        }
    }

    /// Ledger that reads through to memory but refuses every write.
    struct ReadOnlyLedger {
        inner: InMemoryWorkLedger,
    }

    #[async_trait]
    impl WorkLedger for ReadOnlyLedger {
        async fn find_stale(&self, query: &crate::domain::models::StaleQuery) -> DomainResult<Vec<WorkUnit>> {
            self.inner.find_stale(query).await
        }

        async fn get(&self, kind: &str, id: ResourceId) -> DomainResult<Option<WorkUnit>> {
            self.inner.get(kind, id).await
        }

        async fn transition_status(
            &self,
            _kind: &str,
            _id: ResourceId,
            _from: WorkStatus,
            _to: WorkStatus,
        ) -> DomainResult<bool> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }

        async fn increment_retry(&self, _kind: &str, _id: ResourceId) -> DomainResult<u32> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }

        async fn record(&self, unit: &WorkUnit) -> DomainResult<()> {
            self.inner.record(unit).await
        }
    }

    #[tokio::test]
    async fn test_ledger_write_failures_are_reported_as_such() {
        let ledger = Arc::new(ReadOnlyLedger {
            inner: InMemoryWorkLedger::new(),
        });
        for id in [1, 2] {
            ledger
                .record(&WorkUnit::new("sandbox_task", id).with_status(WorkStatus::Running))
                .await
                .unwrap();
        }
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let reconciler = ExternalStateReconciler::new(
            ledger.clone(),
            Arc::new(ScriptedAuthority {
                states: [(1, RemoteState::Active), (2, RemoteState::Terminal)].into_iter().collect(),
            }),
            ResourceLockCoordinator::new(store.clone(), "sandbox_reconcile", Duration::from_secs(30)),
            ReconcilerConfig {
                inter_unit_delay: Duration::ZERO,
                max_active_polls: None,
            },
        );

        let units = ledger.inner.all().await;
        let results = reconciler
            .reconcile(Arc::new(TickContext::new("sandbox_reconcile")), units)
            .await;

        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(!result.success, "a failed counter bump or transition is not a success");
            assert_eq!(result.reason, Some(FailureReason::ProcessingFailed));
            let error = result.error.as_deref().unwrap_or_default();
            assert!(error.contains("database is locked"), "got {error:?}");
            assert!(!error.contains("authority"));
        }
        assert!(store.inspect("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_failure_carries_authority_error() {
        let (ledger, _store, reconciler) = setup(&[], &[7]).await;
        let ctx = TickContext::new("sandbox_reconcile");
        let unit = ledger.all().await.remove(0);

        match reconciler.reconcile_unit(&ctx, &unit).await {
            ReconcileOutcome::PollFailed { error } => assert!(error.contains("connection refused")),
            other => panic!("expected poll failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_unit_delay_is_applied() {
        let ledger = Arc::new(InMemoryWorkLedger::new());
        for id in 1..=3 {
            ledger
                .record(&WorkUnit::new("sandbox_task", id).with_status(WorkStatus::Running))
                .await
                .unwrap();
        }
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let reconciler = ExternalStateReconciler::new(
            ledger.clone(),
            Arc::new(ScriptedAuthority {
                states: (1..=3).map(|id| (id, RemoteState::Active)).collect(),
            }),
            ResourceLockCoordinator::new(store, "sandbox_reconcile", Duration::from_secs(30)),
            ReconcilerConfig::default(),
        );

        let before = tokio::time::Instant::now();
        reconciler
            .reconcile(Arc::new(TickContext::new("sandbox_reconcile")), ledger.all().await)
            .await;
        assert!(before.elapsed() >= Duration::from_millis(200));
    }
}
