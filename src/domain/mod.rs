//! Domain layer for the compensation subsystem
//!
//! This module contains the core models and the ports the control loops
//! depend on. Nothing here knows about SQLite, HTTP or the scheduler.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
