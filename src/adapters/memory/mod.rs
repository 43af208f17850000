//! In-process adapters for single-process deployments and tests.

pub mod lock_store;
pub mod work_ledger;

pub use lock_store::InMemoryLockStore;
pub use work_ledger::InMemoryWorkLedger;
