use async_trait::async_trait;
use std::time::Duration;

use crate::domain::errors::DomainResult;
use crate::domain::models::LockRecord;

/// Shared key/TTL store backing the lock coordinators.
///
/// Implementations must make `try_acquire` a single atomic conditional
/// write and `release` a compare-and-delete on the owner token. Neither
/// call may block waiting for the lock or retry internally.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` to `owner` for `ttl` if no live record exists.
    ///
    /// Returns `Ok(true)` when this owner now holds the lock, `Ok(false)`
    /// when a live record belongs to someone else.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> DomainResult<bool>;

    /// Delete `key` only if it is held by `owner`.
    ///
    /// Returns `Ok(false)` when the record is missing or belongs to another
    /// owner (e.g. it expired and was re-acquired).
    async fn release(&self, key: &str, owner: &str) -> DomainResult<bool>;

    /// Live records whose key starts with `prefix`.
    async fn inspect(&self, prefix: &str) -> DomainResult<Vec<LockRecord>>;

    /// Drop expired records. Returns how many were removed.
    async fn purge_expired(&self) -> DomainResult<u64>;
}
