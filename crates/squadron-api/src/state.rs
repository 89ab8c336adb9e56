//! Application state shared by handlers

use crate::config::ApiConfig;

use chrono::{DateTime, Utc};
use squadron_ingest::SchedulerState;
use squadron_telemetry::MetricsCollector;
use squadron_tracker::Aggregator;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    /// Merged squadron state and its subscriptions
    pub aggregator: Aggregator,
    pub metrics: Arc<MetricsCollector>,
    /// Scheduler lifecycle, the consumers' staleness signal
    scheduler: watch::Receiver<SchedulerState>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        aggregator: Aggregator,
        metrics: Arc<MetricsCollector>,
        scheduler: watch::Receiver<SchedulerState>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            aggregator,
            metrics,
            scheduler,
            started_at: Utc::now(),
        }
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        *self.scheduler.borrow()
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
