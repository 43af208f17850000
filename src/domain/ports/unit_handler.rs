use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{TickContext, WorkUnit};

/// Per-unit processing function re-driven by the compensator.
///
/// Must be idempotent: the same unit may be handed over more than once
/// (lock expiry, crashed workers). "Nothing to do" is `Ok(0)`, not an error.
#[async_trait]
pub trait UnitHandler: Send + Sync {
    /// Process one unit and return how many items were handled.
    async fn process(&self, ctx: &TickContext, unit: &WorkUnit) -> DomainResult<u64>;
}
