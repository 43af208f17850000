//! Domain errors for the compensation subsystem.

use thiserror::Error;

use super::models::{ResourceId, WorkStatus};

/// Domain-level errors that can occur while reconciling work.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Work unit not found: {kind}/{id}")]
    WorkUnitNotFound { kind: String, id: ResourceId },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: WorkStatus,
        to: WorkStatus,
        reason: String,
    },

    #[error("Invalid job configuration for '{job}': {reason}")]
    InvalidJobConfig { job: String, reason: String },

    #[error("Lock store error: {0}")]
    LockStoreError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("External authority unavailable: {0}")]
    AuthorityUnavailable(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

