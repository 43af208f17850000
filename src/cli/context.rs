//! Wiring shared by commands: config, database, stores and drivers.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

use crate::adapters::memory::InMemoryLockStore;
use crate::adapters::sqlite::{initialize_from_config, SqliteLockStore, SqliteWorkLedger};
use crate::domain::models::{Config, JobConfig, LockBackend};
use crate::domain::ports::{LockStore, WorkLedger};
use crate::infrastructure::config::ConfigLoader;
use crate::services::ControlLoopDriver;

/// Load config from an explicit file, or from the project hierarchy.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub ledger: Arc<dyn WorkLedger>,
    pub locks: Arc<dyn LockStore>,
}

impl AppContext {
    /// Open the database and build the configured stores.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = initialize_from_config(&config.database)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;

        let ledger: Arc<dyn WorkLedger> = Arc::new(SqliteWorkLedger::new(pool.clone()));
        let locks: Arc<dyn LockStore> = match config.lock_store.backend {
            LockBackend::Sqlite => Arc::new(SqliteLockStore::new(pool.clone())),
            LockBackend::Memory => {
                tracing::warn!("in-memory lock store selected, locks are not shared with other processes");
                Arc::new(InMemoryLockStore::new())
            }
        };

        Ok(Self {
            config,
            pool,
            ledger,
            locks,
        })
    }

    pub fn job(&self, name: &str) -> Result<&JobConfig> {
        self.config.job(name).with_context(|| {
            let known: Vec<&str> = self.config.jobs.iter().map(|j| j.name.as_str()).collect();
            format!("Unknown job '{name}'. Configured jobs: {}", known.join(", "))
        })
    }

    pub fn driver(&self, job: &JobConfig) -> Result<ControlLoopDriver> {
        ControlLoopDriver::from_config(job.clone(), self.locks.clone(), self.ledger.clone())
            .with_context(|| format!("Failed to build job '{}'", job.name))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
