//! In-process trigger for control-loop jobs.
//!
//! Fires each registered job's [`ControlLoopDriver::tick`] on an interval
//! or cron schedule. Due jobs are spawned on their own tasks so a slow job
//! never delays another. The `singleton` flag only suppresses overlapping
//! local fires; fleet-wide exclusion comes from the job's global lock.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::control_loop::ControlLoopDriver;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ScheduleConfig, SchedulerSettings, TickReport};
use crate::domain::ports::LockStore;

/// When a registered job fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    Interval { every: Duration },
    Cron { expression: String, parsed: cron::Schedule },
}

impl Schedule {
    pub fn interval(every: Duration) -> Self {
        Self::Interval { every }
    }

    pub fn cron(expression: impl Into<String>) -> DomainResult<Self> {
        let expression = expression.into();
        let parsed = cron::Schedule::from_str(&expression).map_err(|e| DomainError::InvalidJobConfig {
            job: String::new(),
            reason: format!("invalid cron expression '{expression}': {e}"),
        })?;
        Ok(Self::Cron { expression, parsed })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Interval { .. } => "interval",
            Self::Cron { .. } => "cron",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Interval { every } => format!("every {}s", every.as_secs_f64()),
            Self::Cron { expression, .. } => format!("cron '{expression}'"),
        }
    }

    /// Next fire time after the reference point.
    pub fn next_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every } => {
                let every = chrono::Duration::from_std(*every).ok()?;
                reference.checked_add_signed(every)
            }
            Self::Cron { parsed, .. } => parsed.after(&reference).next(),
        }
    }

    fn is_due(&self, reference: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.next_after(reference).is_some_and(|next| now >= next)
    }
}

impl TryFrom<&ScheduleConfig> for Schedule {
    type Error = DomainError;

    fn try_from(config: &ScheduleConfig) -> Result<Self, Self::Error> {
        match config {
            ScheduleConfig::Interval { every_secs } => Ok(Self::interval(Duration::from_secs(*every_secs))),
            ScheduleConfig::Cron { expression } => Self::cron(expression.clone()),
        }
    }
}

/// A registered job and its firing state.
struct ScheduledJob {
    id: Uuid,
    name: String,
    schedule: Schedule,
    driver: Arc<ControlLoopDriver>,
    singleton: bool,
    created_at: DateTime<Utc>,
    last_fired: Option<DateTime<Utc>>,
    fire_count: u64,
    skipped_count: u64,
    /// Ticks of this job currently running locally.
    in_flight: Arc<AtomicUsize>,
    last_report: Option<TickReport>,
}

impl ScheduledJob {
    fn status(&self) -> JobStatus {
        let reference = self.last_fired.unwrap_or(self.created_at);
        JobStatus {
            id: self.id,
            name: self.name.clone(),
            schedule: self.schedule.describe(),
            singleton: self.singleton,
            in_flight: self.in_flight.load(Ordering::SeqCst) > 0,
            fire_count: self.fire_count,
            skipped_count: self.skipped_count,
            last_fired: self.last_fired,
            next_fire: self.schedule.next_after(reference),
            last_report: self.last_report.clone(),
        }
    }
}

/// Snapshot of a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub name: String,
    pub schedule: String,
    pub singleton: bool,
    pub in_flight: bool,
    pub fire_count: u64,
    /// Local fires suppressed because the previous tick was still running.
    pub skipped_count: u64,
    pub last_fired: Option<DateTime<Utc>>,
    pub next_fire: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

/// Counts one running tick; the count drops however the tick task ends.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct JobScheduler {
    settings: SchedulerSettings,
    jobs: Arc<RwLock<Vec<ScheduledJob>>>,
    running: Arc<AtomicBool>,
    /// Store purged of expired locks whenever jobs fire.
    housekeeping: Option<Arc<dyn LockStore>>,
}

impl JobScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            jobs: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            housekeeping: None,
        }
    }

    /// Purge expired rows from `store` at the start of each firing round.
    pub fn with_housekeeping(mut self, store: Arc<dyn LockStore>) -> Self {
        self.housekeeping = Some(store);
        self
    }

    /// Register a driver using the schedule from its job configuration.
    ///
    /// Disabled jobs are not registered and yield `Ok(None)`, as does a full
    /// scheduler. Registering a name twice returns the existing id.
    pub async fn register(&self, driver: Arc<ControlLoopDriver>) -> DomainResult<Option<Uuid>> {
        let job = driver.job();
        if !job.enabled {
            tracing::info!(job = %job.name, "job disabled, not scheduling");
            return Ok(None);
        }
        let schedule = Schedule::try_from(&job.schedule).map_err(|e| match e {
            DomainError::InvalidJobConfig { reason, .. } => DomainError::InvalidJobConfig {
                job: job.name.clone(),
                reason,
            },
            other => other,
        })?;
        Ok(self.register_with(driver, schedule).await)
    }

    /// Register a driver with an explicit schedule.
    pub async fn register_with(&self, driver: Arc<ControlLoopDriver>, schedule: Schedule) -> Option<Uuid> {
        let mut jobs = self.jobs.write().await;
        let name = driver.job().name.clone();

        if let Some(existing) = jobs.iter().find(|j| j.name == name) {
            return Some(existing.id);
        }
        if jobs.len() >= self.settings.max_jobs {
            tracing::warn!(job = %name, max_jobs = self.settings.max_jobs, "max jobs reached, rejecting");
            return None;
        }

        let id = Uuid::new_v4();
        tracing::info!(job = %name, schedule = %schedule.describe(), "job scheduled");
        jobs.push(ScheduledJob {
            id,
            name,
            singleton: driver.job().singleton,
            schedule,
            driver,
            created_at: Utc::now(),
            last_fired: None,
            fire_count: 0,
            skipped_count: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_report: None,
        });
        Some(id)
    }

    pub async fn list(&self) -> Vec<JobStatus> {
        self.jobs.read().await.iter().map(ScheduledJob::status).collect()
    }

    /// Start the tick loop. Returns its JoinHandle.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        let jobs = self.jobs.clone();
        let running = self.running.clone();
        let housekeeping = self.housekeeping.clone();
        let tick_interval = Duration::from_millis(self.settings.tick_interval_ms.max(1));

        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(tick_interval).await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let now = Utc::now();
                let mut to_fire = Vec::new();
                {
                    let mut scheduled = jobs.write().await;
                    for job in scheduled.iter_mut() {
                        if !job.schedule.is_due(job.last_fired.unwrap_or(job.created_at), now) {
                            continue;
                        }
                        job.last_fired = Some(now);

                        if job.singleton && job.in_flight.load(Ordering::SeqCst) > 0 {
                            job.skipped_count += 1;
                            tracing::debug!(job = %job.name, "previous tick still running, skipping local fire");
                            continue;
                        }
                        // Counted before spawning so the next loop pass sees it.
                        let guard = InFlightGuard::enter(job.in_flight.clone());
                        job.fire_count += 1;
                        to_fire.push((job.id, job.driver.clone(), guard));
                    }
                }

                if to_fire.is_empty() {
                    continue;
                }

                if let Some(store) = &housekeeping {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => tracing::debug!(purged, "expired locks purged"),
                        Err(e) => tracing::warn!(error = %e, "lock housekeeping failed"),
                    }
                }

                for (id, driver, guard) in to_fire {
                    let jobs = jobs.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        let report = driver.tick().await;
                        if let Some(job) = jobs.write().await.iter_mut().find(|j| j.id == id) {
                            job.last_report = Some(report);
                        }
                    });
                }
            }
            tracing::info!("job scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait until no tick is in flight, up to `timeout`. Returns whether the
    /// scheduler went idle in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let busy = self
                .jobs
                .read()
                .await
                .iter()
                .any(|j| j.in_flight.load(Ordering::SeqCst) > 0);
            if !busy {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
