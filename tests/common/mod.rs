//! Common test utilities for integration tests
//!
//! Shared fixtures for the control-loop integration tests: file-backed
//! databases (so several pools can share one ledger), job builders and a
//! counting handler.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;

use compensator::adapters::sqlite::{initialize_database, PoolConfig};
use compensator::domain::models::{
    CompensateConfig, JobAction, JobConfig, ReconcileConfig, ScanConfig, ScheduleConfig, TickContext,
    WorkStatus, WorkUnit,
};
use compensator::{DomainResult, UnitHandler};

/// Create a temporary test database path
///
/// The TempDir must outlive every pool opened on the path.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("ledger.db");
    (dir, db_path)
}

/// Open a migrated pool on a database file. Call repeatedly to simulate
/// separate processes sharing the database.
pub async fn file_pool(path: &PathBuf) -> SqlitePool {
    initialize_database(
        &format!("sqlite:{}", path.display()),
        Some(PoolConfig {
            max_connections: 4,
            ..Default::default()
        }),
    )
    .await
    .expect("Failed to open test database")
}

/// Setup test logging
#[allow(dead_code)]
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn compensation_job(handler_url: &str) -> JobConfig {
    JobConfig {
        name: "topic_compensation".to_string(),
        enabled: true,
        singleton: true,
        schedule: ScheduleConfig::Interval { every_secs: 30 },
        global_lock_ttl_secs: 300,
        scan: ScanConfig {
            kind: "message".to_string(),
            window_secs: 20 * 60,
            ..Default::default()
        },
        action: JobAction::Compensate(CompensateConfig {
            handler_url: handler_url.to_string(),
            sub_batch_size: 20,
            resource_lock_ttl_secs: 30,
            handler_timeout_secs: 10,
        }),
    }
}

pub fn reconcile_job(authority_url: &str) -> JobConfig {
    JobConfig {
        name: "sandbox_reconcile".to_string(),
        enabled: true,
        singleton: true,
        schedule: ScheduleConfig::Cron {
            expression: "0 0 * * * *".to_string(),
        },
        global_lock_ttl_secs: 300,
        scan: ScanConfig {
            kind: "sandbox_task".to_string(),
            statuses: vec![WorkStatus::Running],
            window_secs: 3 * 3600,
            ..Default::default()
        },
        action: JobAction::Reconcile(ReconcileConfig {
            authority_url: authority_url.to_string(),
            inter_unit_delay_ms: 0,
            resource_lock_ttl_secs: 30,
            poll_timeout_secs: 5,
            max_active_polls: Some(10),
        }),
    }
}

/// Handler that counts calls and optionally sleeps.
pub struct CountingHandler {
    pub calls: AtomicUsize,
    pub sleep: Duration,
}

impl CountingHandler {
    pub fn new(sleep: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            sleep,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitHandler for CountingHandler {
    async fn process(&self, _ctx: &TickContext, _unit: &WorkUnit) -> DomainResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.sleep).await;
        Ok(1)
    }
}
