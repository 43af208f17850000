pub mod batch;
pub mod config;
pub mod job;
pub mod lock;
pub mod work_unit;

pub use batch::{BatchResult, BatchSummary, FailureReason, TickContext, TickOutcome, TickReport};
pub use config::{
    Config, DatabaseConfig, LockBackend, LockStoreConfig, LoggingConfig, SchedulerSettings,
};
pub use job::{CompensateConfig, JobAction, JobConfig, ReconcileConfig, ScanConfig, ScheduleConfig};
pub use lock::{global_lock_key, new_owner_token, resource_lock_key, LockRecord};
pub use work_unit::{ResourceId, ScanWindow, StaleQuery, WindowField, WorkStatus, WorkUnit};
