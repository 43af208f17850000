use async_trait::async_trait;
use serde::Serialize;

use crate::domain::errors::DomainResult;
use crate::domain::models::WorkUnit;

/// What the external system-of-record says about a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    /// Still executing remotely.
    Active,
    /// Finished remotely (successfully or not).
    Terminal,
    /// The authority has no record of the unit.
    Unknown,
}

/// External source of truth polled by the state reconciler.
#[async_trait]
pub trait ExternalAuthority: Send + Sync {
    /// Ask for the unit's true state.
    ///
    /// An `Err` means the authority could not be asked (timeout, 5xx,
    /// transport failure); callers must not guess a state from it.
    async fn poll(&self, unit: &WorkUnit) -> DomainResult<RemoteState>;
}
