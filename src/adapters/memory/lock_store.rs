//! Process-local lock store.
//!
//! Uses `tokio::time::Instant` for expiry so tests can drive TTLs with a
//! paused clock. Only provides mutual exclusion within one process.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::LockRecord;
use crate::domain::ports::LockStore;

#[derive(Debug, Clone)]
struct Entry {
    owner: String,
    deadline: Instant,
}

#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> DomainResult<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| DomainError::LockStoreError("lock table poisoned".to_string()))
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> DomainResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries()?;

        if let Some(existing) = entries.get(key) {
            if existing.deadline > now {
                return Ok(false);
            }
        }

        let deadline = now.checked_add(ttl).unwrap_or_else(|| now + Duration::from_secs(86_400 * 365));
        entries.insert(
            key.to_string(),
            Entry {
                owner: owner.to_string(),
                deadline,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> DomainResult<bool> {
        let mut entries = self.entries()?;
        match entries.get(key) {
            Some(entry) if entry.owner == owner => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn inspect(&self, prefix: &str) -> DomainResult<Vec<LockRecord>> {
        let now = Instant::now();
        let wall_now = Utc::now();
        let entries = self.entries()?;

        let mut records: Vec<LockRecord> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.deadline > now)
            .map(|(key, entry)| {
                let remaining = chrono::Duration::from_std(entry.deadline - now)
                    .unwrap_or(chrono::TimeDelta::MAX);
                LockRecord {
                    key: key.clone(),
                    owner: entry.owner.clone(),
                    expires_at: wall_now.checked_add_signed(remaining).unwrap_or(wall_now),
                }
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn purge_expired(&self) -> DomainResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.deadline > now);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_acquire_has_single_winner() {
        let store = Arc::new(InMemoryLockStore::new());
        let mut handles = Vec::new();

        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_acquire("job_crontab_lock", &format!("owner-{i}"), Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_and_stale_release() {
        let store = InMemoryLockStore::new();

        assert!(store.try_acquire("k", "a", Duration::from_secs(10)).await.unwrap());
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!store.try_acquire("k", "b", Duration::from_secs(10)).await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.try_acquire("k", "b", Duration::from_secs(10)).await.unwrap());

        assert!(!store.release("k", "a").await.unwrap());
        let live = store.inspect("").await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].owner, "b");
        assert!(store.release("k", "b").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = InMemoryLockStore::new();
        store.try_acquire("a", "x", Duration::from_secs(1)).await.unwrap();
        store.try_acquire("b", "x", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.inspect("").await.unwrap().len(), 1);
    }
}
