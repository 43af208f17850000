//! SQLite implementation of the WorkLedger.
//!
//! Records are append-only rows in `work_records`; the latest row (highest
//! id) of a `(kind, resource_id)` pair is the resource's current state.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::{format_datetime, parse_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ResourceId, StaleQuery, WorkStatus, WorkUnit};
use crate::domain::ports::WorkLedger;

#[derive(Clone)]
pub struct SqliteWorkLedger {
    pool: SqlitePool,
}

impl SqliteWorkLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const LATEST_RECORD: &str =
    "(SELECT MAX(id) FROM work_records WHERE kind = ? AND resource_id = ?)";

#[async_trait]
impl WorkLedger for SqliteWorkLedger {
    async fn find_stale(&self, query: &StaleQuery) -> DomainResult<Vec<WorkUnit>> {
        if query.statuses.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; query.statuses.len()].join(", ");
        let sql = format!(
            r#"SELECT w.resource_id, w.kind, w.status, w.owner_hint, w.retry_count, w.created_at, w.updated_at
               FROM work_records w
               JOIN (SELECT MAX(id) AS latest_id FROM work_records WHERE kind = ? GROUP BY resource_id) l
                 ON l.latest_id = w.id
               WHERE w.status IN ({placeholders}) AND w.{column} >= ?
               ORDER BY w.resource_id ASC
               LIMIT ?"#,
            column = query.window_field.column(),
        );

        let mut q = sqlx::query_as::<_, WorkRecordRow>(&sql).bind(&query.kind);
        for status in &query.statuses {
            q = q.bind(status.as_str());
        }
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows = q
            .bind(format_datetime(query.since))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(WorkUnit::try_from).collect()
    }

    async fn get(&self, kind: &str, id: ResourceId) -> DomainResult<Option<WorkUnit>> {
        let sql = format!(
            "SELECT resource_id, kind, status, owner_hint, retry_count, created_at, updated_at
             FROM work_records WHERE id = {LATEST_RECORD}"
        );
        let row: Option<WorkRecordRow> = sqlx::query_as(&sql)
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WorkUnit::try_from).transpose()
    }

    async fn transition_status(
        &self,
        kind: &str,
        id: ResourceId,
        from: WorkStatus,
        to: WorkStatus,
    ) -> DomainResult<bool> {
        let sql = format!(
            "UPDATE work_records SET status = ?, updated_at = ?
             WHERE id = {LATEST_RECORD} AND status = ?"
        );
        let result = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(format_datetime(Utc::now()))
            .bind(kind)
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn increment_retry(&self, kind: &str, id: ResourceId) -> DomainResult<u32> {
        let sql = format!(
            "UPDATE work_records SET retry_count = retry_count + 1
             WHERE id = {LATEST_RECORD}
             RETURNING retry_count"
        );
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((count,)) => Ok(u32::try_from(count).unwrap_or(u32::MAX)),
            None => Err(DomainError::WorkUnitNotFound {
                kind: kind.to_string(),
                id,
            }),
        }
    }

    async fn record(&self, unit: &WorkUnit) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO work_records (kind, resource_id, status, owner_hint, retry_count, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&unit.kind)
        .bind(unit.id)
        .bind(unit.status.as_str())
        .bind(&unit.owner_hint)
        .bind(i64::from(unit.retry_count))
        .bind(format_datetime(unit.created_at))
        .bind(format_datetime(unit.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct WorkRecordRow {
    resource_id: i64,
    kind: String,
    status: String,
    owner_hint: Option<String>,
    retry_count: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<WorkRecordRow> for WorkUnit {
    type Error = DomainError;

    fn try_from(row: WorkRecordRow) -> Result<Self, Self::Error> {
        let status = WorkStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown work status '{}'", row.status))
        })?;

        Ok(WorkUnit {
            id: row.resource_id,
            kind: row.kind,
            status,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            owner_hint: row.owner_hint,
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
        })
    }
}
