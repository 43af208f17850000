//! Compensator - reconciliation and compensation control loops
//!
//! Periodic jobs that find work units which should have finished but did
//! not, re-drive them through an idempotent handler, and reconcile locally
//! held state against an external system of record. Every job takes a
//! fleet-wide lock per tick and a lock per resource, so any number of
//! processes can run the same jobs safely.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and the port traits
//! - **Adapters** (`adapters`): SQLite, in-memory and HTTP implementations of the ports
//! - **Service Layer** (`services`): lock coordination, scanning, processing, scheduling
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use compensator::adapters::memory::{InMemoryLockStore, InMemoryWorkLedger};
//! use compensator::services::ControlLoopDriver;
//!
//! let driver = ControlLoopDriver::compensating(job, Arc::new(InMemoryLockStore::new()),
//!     Arc::new(InMemoryWorkLedger::new()), handler)?;
//! let report = driver.tick().await;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    BatchResult, BatchSummary, Config, FailureReason, JobConfig, TickContext, TickOutcome, TickReport,
    WorkStatus, WorkUnit,
};
pub use domain::ports::{ExternalAuthority, LockStore, RemoteState, UnitHandler, WorkLedger};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ControlLoopDriver, JobScheduler};
