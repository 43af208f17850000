//! Control-loop services built on the domain ports.

pub mod batch_processor;
pub mod control_loop;
pub mod job_scheduler;
pub mod lock_coordinator;
pub mod stale_scanner;
pub mod state_reconciler;

pub use batch_processor::{BatchConfig, ConcurrentBatchProcessor};
pub use control_loop::{ControlLoopDriver, Pipeline};
pub use job_scheduler::{JobScheduler, JobStatus, Schedule};
pub use lock_coordinator::{GlobalLockCoordinator, ResourceLockCoordinator};
pub use stale_scanner::StaleWorkScanner;
pub use state_reconciler::{ExternalStateReconciler, ReconcileOutcome, ReconcilerConfig};
