//! Stale work detection.
//!
//! Finds resources whose latest record is still in an unfinished status
//! inside a bounded time window. The window keeps permanently failed,
//! ancient data out of every tick.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::models::{ScanConfig, ScanWindow, StaleQuery, WorkUnit};
use crate::domain::ports::WorkLedger;

pub struct StaleWorkScanner {
    ledger: Arc<dyn WorkLedger>,
    config: ScanConfig,
}

impl StaleWorkScanner {
    pub fn new(ledger: Arc<dyn WorkLedger>, config: ScanConfig) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Window for a tick starting at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> ScanWindow {
        ScanWindow::ending_at(now, self.config.window(), self.config.limit)
    }

    /// Candidate units for this window.
    ///
    /// Never fails: ledger errors are logged and treated as "no candidates
    /// this tick".
    pub async fn scan(&self, window: &ScanWindow) -> Vec<WorkUnit> {
        let query = StaleQuery {
            kind: self.config.kind.clone(),
            statuses: self.config.statuses.clone(),
            since: window.threshold,
            window_field: self.config.window_field,
            limit: window.limit,
        };

        match self.ledger.find_stale(&query).await {
            Ok(units) => {
                tracing::debug!(
                    kind = %query.kind,
                    since = %window.threshold,
                    limit = window.limit,
                    found = units.len(),
                    "stale scan complete"
                );
                units
            }
            Err(e) => {
                tracing::error!(
                    kind = %query.kind,
                    since = %window.threshold,
                    error = %e,
                    "stale scan failed, treating as no candidates"
                );
                Vec::new()
            }
        }
    }
}
