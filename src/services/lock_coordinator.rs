//! Fleet-wide single-flight and per-resource locks.
//!
//! Both coordinators are thin wrappers around a [`LockStore`]: they own the
//! key namespace, mint a fresh owner token per acquisition attempt, and log
//! every outcome. Neither blocks nor retries; losing a race means "skip".

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::{global_lock_key, new_owner_token, resource_lock_key, LockRecord, ResourceId};
use crate::domain::ports::LockStore;

/// Single probe against the store. Store errors count as "not acquired".
async fn probe(store: &dyn LockStore, key: String, ttl: Duration) -> Option<LockRecord> {
    let owner = new_owner_token();
    match store.try_acquire(&key, &owner, ttl).await {
        Ok(true) => {
            let span = chrono::Duration::from_std(ttl).unwrap_or(chrono::TimeDelta::MAX);
            let now = Utc::now();
            Some(LockRecord {
                key,
                owner,
                expires_at: now.checked_add_signed(span).unwrap_or(now),
            })
        }
        Ok(false) => None,
        Err(e) => {
            tracing::error!(key = %key, error = %e, "lock store unavailable during acquire");
            None
        }
    }
}

async fn release_record(store: &dyn LockStore, lock: &LockRecord) -> bool {
    match store.release(&lock.key, &lock.owner).await {
        Ok(true) => {
            tracing::debug!(key = %lock.key, "lock released");
            true
        }
        Ok(false) => {
            tracing::warn!(
                key = %lock.key,
                "lock was no longer ours at release (expired or taken over)"
            );
            false
        }
        Err(e) => {
            tracing::error!(key = %lock.key, error = %e, "failed to release lock; it will expire on its own");
            false
        }
    }
}

/// At-most-one running instance of a named job, fleet-wide.
#[derive(Clone)]
pub struct GlobalLockCoordinator {
    store: Arc<dyn LockStore>,
    ttl: Duration,
}

impl GlobalLockCoordinator {
    /// `ttl` must exceed the worst-case duration of one full tick.
    pub fn new(store: Arc<dyn LockStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try once to become the job's single runner.
    pub async fn acquire(&self, job_name: &str) -> Option<LockRecord> {
        let lock = probe(self.store.as_ref(), global_lock_key(job_name), self.ttl).await;
        match &lock {
            Some(l) => tracing::info!(job = job_name, key = %l.key, "global lock acquired"),
            None => tracing::info!(job = job_name, "global lock held elsewhere, skipping tick"),
        }
        lock
    }

    pub async fn release(&self, lock: &LockRecord) -> bool {
        let released = release_record(self.store.as_ref(), lock).await;
        tracing::info!(key = %lock.key, released, "global lock release");
        released
    }
}

/// At-most-one concurrent processor per resource of a job, fleet-wide.
#[derive(Clone)]
pub struct ResourceLockCoordinator {
    store: Arc<dyn LockStore>,
    job_name: String,
    ttl: Duration,
}

impl ResourceLockCoordinator {
    /// `ttl` must exceed the worst-case duration of processing one unit.
    pub fn new(store: Arc<dyn LockStore>, job_name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            job_name: job_name.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key_for(&self, resource_id: ResourceId) -> String {
        resource_lock_key(&self.job_name, resource_id)
    }

    pub async fn acquire(&self, resource_id: ResourceId) -> Option<LockRecord> {
        let lock = probe(self.store.as_ref(), self.key_for(resource_id), self.ttl).await;
        if lock.is_none() {
            tracing::info!(job = %self.job_name, resource_id, "resource lock held elsewhere");
        }
        lock
    }

    pub async fn release(&self, lock: &LockRecord) -> bool {
        release_record(self.store.as_ref(), lock).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryLockStore;

    #[tokio::test]
    async fn test_global_lock_single_flight() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let a = GlobalLockCoordinator::new(store.clone(), Duration::from_secs(300));
        let b = GlobalLockCoordinator::new(store.clone(), Duration::from_secs(300));

        let held = a.acquire("topic_compensation").await.expect("first acquire wins");
        assert_eq!(held.key, "topic_compensation_crontab_lock");
        assert!(b.acquire("topic_compensation").await.is_none());
        // Different job, different lock.
        assert!(b.acquire("sandbox_reconcile").await.is_some());

        assert!(a.release(&held).await);
        assert!(b.acquire("topic_compensation").await.is_some());
    }

    #[tokio::test]
    async fn test_global_and_resource_locks_are_independent() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let global = GlobalLockCoordinator::new(store.clone(), Duration::from_secs(300));
        let resources = ResourceLockCoordinator::new(store.clone(), "topic_compensation", Duration::from_secs(30));

        let _job = global.acquire("topic_compensation").await.unwrap();
        let first = resources.acquire(7).await.expect("resource lock is separate from job lock");
        assert_eq!(first.key, "topic_compensation:resource:7");
        assert!(resources.acquire(7).await.is_none());
        assert!(resources.acquire(9).await.is_some());
    }

    #[tokio::test]
    async fn test_release_with_foreign_token_fails() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let resources = ResourceLockCoordinator::new(store, "j", Duration::from_secs(30));

        let held = resources.acquire(1).await.unwrap();
        let forged = LockRecord {
            owner: new_owner_token(),
            ..held.clone()
        };
        assert!(!resources.release(&forged).await);
        assert!(resources.acquire(1).await.is_none());
        assert!(resources.release(&held).await);
    }
}
