use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ResourceId, StaleQuery, WorkStatus, WorkUnit};

/// Persistent store of work records, grouped per resource.
#[async_trait]
pub trait WorkLedger: Send + Sync {
    /// Distinct resources whose latest record matches the query.
    ///
    /// One resource yields at most one unit, ordered by ascending id and
    /// capped at `query.limit`. The window lower bound is inclusive.
    async fn find_stale(&self, query: &StaleQuery) -> DomainResult<Vec<WorkUnit>>;

    /// Latest state of one resource.
    async fn get(&self, kind: &str, id: ResourceId) -> DomainResult<Option<WorkUnit>>;

    /// Move a resource from `from` to `to` if it is still in `from`.
    ///
    /// Returns `Ok(false)` when the resource is missing or already moved on.
    async fn transition_status(
        &self,
        kind: &str,
        id: ResourceId,
        from: WorkStatus,
        to: WorkStatus,
    ) -> DomainResult<bool>;

    /// Bump the poll counter of a resource. Returns the new count.
    async fn increment_retry(&self, kind: &str, id: ResourceId) -> DomainResult<u32>;

    /// Append a record, as the normal processing path does.
    async fn record(&self, unit: &WorkUnit) -> DomainResult<()>;
}
