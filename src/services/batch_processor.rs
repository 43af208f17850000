//! Bounded-concurrency re-drive of stale units.
//!
//! Units are split into fixed-size sub-batches. Sub-batches run one after
//! another; the units inside a sub-batch run as concurrent tasks, and the
//! next sub-batch starts only once every task of the current one has
//! finished. Each task holds the unit's resource lock around the handler
//! call and always releases it, whatever the handler did.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use super::lock_coordinator::ResourceLockCoordinator;
use crate::domain::models::{
    BatchResult, BatchSummary, CompensateConfig, FailureReason, TickContext, WorkUnit,
};
use crate::domain::ports::UnitHandler;

/// Configuration for the batch processor.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Units processed concurrently per sub-batch.
    pub sub_batch_size: usize,
    /// Upper bound on one handler call. Keep at or below the resource lock TTL.
    pub handler_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            sub_batch_size: 20,
            handler_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&CompensateConfig> for BatchConfig {
    fn from(config: &CompensateConfig) -> Self {
        Self {
            sub_batch_size: config.sub_batch_size,
            handler_timeout: Duration::from_secs(config.handler_timeout_secs),
        }
    }
}

pub struct ConcurrentBatchProcessor {
    locks: ResourceLockCoordinator,
    config: BatchConfig,
}

impl ConcurrentBatchProcessor {
    pub fn new(locks: ResourceLockCoordinator, config: BatchConfig) -> Self {
        Self { locks, config }
    }

    /// Re-drive `units` through `handler`.
    ///
    /// Returns one result per unit, in input order. Nothing a handler does
    /// (error, panic, hang) escapes this call.
    pub async fn process(
        &self,
        ctx: Arc<TickContext>,
        units: Vec<WorkUnit>,
        handler: Arc<dyn UnitHandler>,
    ) -> Vec<BatchResult> {
        let size = self.config.sub_batch_size.max(1);
        let mut results = Vec::with_capacity(units.len());

        for (batch_index, chunk) in units.chunks(size).enumerate() {
            tracing::debug!(
                job = %ctx.job_name,
                tick_id = %ctx.tick_id,
                batch_index,
                units = chunk.len(),
                "starting sub-batch"
            );

            let mut handles = Vec::with_capacity(chunk.len());
            for unit in chunk {
                let unit = unit.clone();
                let unit_id = unit.id;
                let ctx = ctx.clone();
                let handler = handler.clone();
                let locks = self.locks.clone();
                let timeout = self.config.handler_timeout;
                let span = tracing::info_span!(
                    "unit",
                    job = %ctx.job_name,
                    tick_id = %ctx.tick_id,
                    resource_id = unit_id
                );

                let handle = tokio::spawn(
                    async move { run_unit(&locks, &ctx, &unit, handler.as_ref(), timeout).await }
                        .instrument(span),
                );
                handles.push((unit_id, handle));
            }

            for (unit_id, handle) in handles {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        tracing::error!(resource_id = unit_id, error = %e, "unit worker aborted");
                        results.push(BatchResult::failed(
                            unit_id,
                            FailureReason::ProcessingFailed,
                            Some(e.to_string()),
                            0,
                        ));
                    }
                }
            }
        }

        let summary = BatchSummary::from_results(&results);
        tracing::info!(
            job = %ctx.job_name,
            tick_id = %ctx.tick_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            lock_failed = summary.count(FailureReason::LockFailed),
            processing_failed = summary.count(FailureReason::ProcessingFailed),
            processed = summary.processed,
            "batch processed"
        );

        results
    }
}

/// One worker: lock, handle, always unlock.
async fn run_unit(
    locks: &ResourceLockCoordinator,
    ctx: &TickContext,
    unit: &WorkUnit,
    handler: &dyn UnitHandler,
    timeout: Duration,
) -> BatchResult {
    let started = Instant::now();

    let Some(lock) = locks.acquire(unit.id).await else {
        return BatchResult::failed(unit.id, FailureReason::LockFailed, None, elapsed_ms(started));
    };

    let outcome = tokio::time::timeout(
        timeout,
        AssertUnwindSafe(handler.process(ctx, unit)).catch_unwind(),
    )
    .await;

    locks.release(&lock).await;
    let duration_ms = elapsed_ms(started);

    let error = match outcome {
        Ok(Ok(Ok(processed))) => {
            tracing::info!(processed, duration_ms, "unit processed");
            return BatchResult::succeeded(unit.id, processed, duration_ms);
        }
        Ok(Ok(Err(e))) => e.to_string(),
        Ok(Err(panic)) => format!("handler panicked: {}", panic_message(panic.as_ref())),
        Err(_) => format!("handler timed out after {}ms", timeout.as_millis()),
    };

    tracing::error!(
        kind = %unit.kind,
        status = %unit.status,
        owner_hint = unit.owner_hint.as_deref().unwrap_or("-"),
        duration_ms,
        error = %error,
        "unit processing failed"
    );
    BatchResult::failed(unit.id, FailureReason::ProcessingFailed, Some(error), duration_ms)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryLockStore;
    use crate::domain::errors::{DomainError, DomainResult};
    use crate::domain::ports::LockStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and peak concurrency; fails or panics on demand.
    #[derive(Default)]
    struct ProbeHandler {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_on: Option<i64>,
        panic_on: Option<i64>,
        sleep: Duration,
    }

    #[async_trait]
    impl UnitHandler for ProbeHandler {
        async fn process(&self, _ctx: &TickContext, unit: &WorkUnit) -> DomainResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.sleep).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic_on == Some(unit.id) {
                panic!("handler exploded on {}", unit.id);
            }
            if self.fail_on == Some(unit.id) {
                return Err(DomainError::HandlerFailed("downstream refused".to_string()));
            }
            Ok(1)
        }
    }

    fn units(ids: &[i64]) -> Vec<WorkUnit> {
        ids.iter().map(|id| WorkUnit::new("message", *id)).collect()
    }

    fn processor(store: Arc<dyn LockStore>, config: BatchConfig) -> ConcurrentBatchProcessor {
        let locks = ResourceLockCoordinator::new(store, "topic_compensation", Duration::from_secs(30));
        ConcurrentBatchProcessor::new(locks, config)
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let handler = Arc::new(ProbeHandler {
            fail_on: Some(3),
            panic_on: Some(5),
            ..Default::default()
        });
        let processor = processor(store.clone(), BatchConfig::default());

        let results = processor
            .process(
                Arc::new(TickContext::new("topic_compensation")),
                units(&[1, 2, 3, 4, 5, 6]),
                handler.clone(),
            )
            .await;

        assert_eq!(results.len(), 6);
        assert_eq!(results.iter().map(|r| r.unit_id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(results.iter().filter(|r| r.success).count(), 4);
        assert_eq!(results[2].reason, Some(FailureReason::ProcessingFailed));
        assert!(results[2].error.as_deref().unwrap().contains("downstream refused"));
        assert_eq!(results[4].reason, Some(FailureReason::ProcessingFailed));
        assert!(results[4].error.as_deref().unwrap().contains("panicked"));

        // Every resource lock was released, including for the failing units.
        assert!(store.inspect("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_held_resource_lock_is_lock_failed() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        store
            .try_acquire("topic_compensation:resource:12", "other-process", Duration::from_secs(30))
            .await
            .unwrap();
        let handler = Arc::new(ProbeHandler::default());
        let processor = processor(store.clone(), BatchConfig::default());

        let results = processor
            .process(Arc::new(TickContext::new("topic_compensation")), units(&[7, 12, 9]), handler.clone())
            .await;

        assert!(results[0].success);
        assert_eq!(results[1].reason, Some(FailureReason::LockFailed));
        assert!(results[1].error.is_none());
        assert!(results[2].success);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        // The foreign lock is untouched.
        let live = store.inspect("").await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].owner, "other-process");
    }

    #[tokio::test]
    async fn test_sub_batches_bound_concurrency() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let handler = Arc::new(ProbeHandler {
            sleep: Duration::from_millis(20),
            ..Default::default()
        });
        let processor = processor(
            store,
            BatchConfig {
                sub_batch_size: 3,
                handler_timeout: Duration::from_secs(5),
            },
        );

        let ids: Vec<i64> = (1..=10).collect();
        let results = processor
            .process(Arc::new(TickContext::new("topic_compensation")), units(&ids), handler.clone())
            .await;

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.success));
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_handler_timeout_releases_lock() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let handler = Arc::new(ProbeHandler {
            sleep: Duration::from_secs(5),
            ..Default::default()
        });
        let processor = processor(
            store.clone(),
            BatchConfig {
                sub_batch_size: 20,
                handler_timeout: Duration::from_millis(20),
            },
        );

        let results = processor
            .process(Arc::new(TickContext::new("topic_compensation")), units(&[1]), handler)
            .await;

        assert_eq!(results[0].reason, Some(FailureReason::ProcessingFailed));
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
        assert!(store.inspect("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let results = processor(store, BatchConfig::default())
            .process(
                Arc::new(TickContext::new("topic_compensation")),
                Vec::new(),
                Arc::new(ProbeHandler::default()),
            )
            .await;
        assert!(results.is_empty());
    }
}
