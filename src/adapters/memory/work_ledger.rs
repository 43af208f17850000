//! In-memory WorkLedger used by tests and dry runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ResourceId, StaleQuery, WorkStatus, WorkUnit};
use crate::domain::ports::WorkLedger;

/// Keeps only the latest record per `(kind, resource)`, which is all the
/// control loops ever look at.
#[derive(Debug, Default)]
pub struct InMemoryWorkLedger {
    units: RwLock<BTreeMap<(String, ResourceId), WorkUnit>>,
}

impl InMemoryWorkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every unit, ordered by kind then id.
    pub async fn all(&self) -> Vec<WorkUnit> {
        self.units.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl WorkLedger for InMemoryWorkLedger {
    async fn find_stale(&self, query: &StaleQuery) -> DomainResult<Vec<WorkUnit>> {
        let units = self.units.read().await;
        Ok(units
            .values()
            .filter(|u| u.kind == query.kind)
            .filter(|u| query.statuses.contains(&u.status))
            .filter(|u| query.window_field.of(u) >= query.since)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn get(&self, kind: &str, id: ResourceId) -> DomainResult<Option<WorkUnit>> {
        Ok(self.units.read().await.get(&(kind.to_string(), id)).cloned())
    }

    async fn transition_status(
        &self,
        kind: &str,
        id: ResourceId,
        from: WorkStatus,
        to: WorkStatus,
    ) -> DomainResult<bool> {
        let mut units = self.units.write().await;
        match units.get_mut(&(kind.to_string(), id)) {
            Some(unit) if unit.status == from => {
                unit.status = to;
                unit.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_retry(&self, kind: &str, id: ResourceId) -> DomainResult<u32> {
        let mut units = self.units.write().await;
        let unit = units
            .get_mut(&(kind.to_string(), id))
            .ok_or_else(|| DomainError::WorkUnitNotFound {
                kind: kind.to_string(),
                id,
            })?;
        unit.retry_count += 1;
        Ok(unit.retry_count)
    }

    async fn record(&self, unit: &WorkUnit) -> DomainResult<()> {
        self.units
            .write()
            .await
            .insert((unit.kind.clone(), unit.id), unit.clone());
        Ok(())
    }
}
