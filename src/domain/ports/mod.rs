//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - LockStore: TTL key/owner store behind the lock coordinators
//! - WorkLedger: queryable store of work records
//! - UnitHandler: idempotent per-unit processing function
//! - ExternalAuthority: system-of-record polled by the reconciler

pub mod external_authority;
pub mod lock_store;
pub mod unit_handler;
pub mod work_ledger;

pub use external_authority::{ExternalAuthority, RemoteState};
pub use lock_store::LockStore;
pub use unit_handler::UnitHandler;
pub use work_ledger::WorkLedger;
