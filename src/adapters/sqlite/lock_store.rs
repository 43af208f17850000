//! SQLite implementation of the LockStore.
//!
//! Every process pointed at the same database file shares one
//! `lock_records` table. Acquisition is a single upsert that only
//! overwrites expired rows; release is a compare-and-delete on the owner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::LockRecord;
use crate::domain::ports::LockStore;

#[derive(Clone)]
pub struct SqliteLockStore {
    pool: SqlitePool,
}

impl SqliteLockStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// Escape `%`, `_` and the escape character itself for a LIKE prefix match.
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[derive(sqlx::FromRow)]
struct LockRow {
    key: String,
    owner: String,
    expires_at_ms: i64,
}

impl TryFrom<LockRow> for LockRecord {
    type Error = DomainError;

    fn try_from(row: LockRow) -> Result<Self, Self::Error> {
        let expires_at = DateTime::<Utc>::from_timestamp_millis(row.expires_at_ms).ok_or_else(|| {
            DomainError::SerializationError(format!("invalid lock expiry {}", row.expires_at_ms))
        })?;
        Ok(LockRecord {
            key: row.key,
            owner: row.owner,
            expires_at,
        })
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> DomainResult<bool> {
        let now = now_ms();
        let expires_at = now.saturating_add(ttl_ms(ttl));

        let result = sqlx::query(
            r#"INSERT INTO lock_records (key, owner, expires_at_ms) VALUES (?1, ?2, ?3)
               ON CONFLICT(key) DO UPDATE SET owner = excluded.owner, expires_at_ms = excluded.expires_at_ms
               WHERE lock_records.expires_at_ms <= ?4"#,
        )
        .bind(key)
        .bind(owner)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::LockStoreError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM lock_records WHERE key = ? AND owner = ?")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::LockStoreError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn inspect(&self, prefix: &str) -> DomainResult<Vec<LockRecord>> {
        let rows: Vec<LockRow> = sqlx::query_as(
            r#"SELECT key, owner, expires_at_ms FROM lock_records
               WHERE key LIKE ? ESCAPE '\' AND expires_at_ms > ?
               ORDER BY key"#,
        )
        .bind(like_prefix(prefix))
        .bind(now_ms())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::LockStoreError(e.to_string()))?;

        rows.into_iter().map(LockRecord::try_from).collect()
    }

    async fn purge_expired(&self) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM lock_records WHERE expires_at_ms <= ?")
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::LockStoreError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
