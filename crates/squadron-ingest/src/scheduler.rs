//! Polling / connection scheduler
//!
//! Drives every configured source on its own task: pull sources are
//! fetched on the poll interval, the push source is kept connected. Each
//! payload is normalized and applied to the aggregator as one batch.
//! Failures back off exponentially per source and never stop the others.

use crate::adapter::{normalize, normalize_event, Normalized};
use crate::error::{IngestError, IngestResult};
use crate::source::{PullSource, PushSource};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use squadron_core::SourceTag;
use squadron_telemetry::MetricsCollector;
use squadron_tracker::Aggregator;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerState {
    Stopped,
    /// Started, no source has reported yet
    Starting,
    /// Every source that reported last succeeded
    Running,
    /// At least one source is failing and retrying
    Backoff,
}

impl SchedulerState {
    /// Gauge value exported to metrics
    pub fn ordinal(&self) -> i64 {
        match self {
            SchedulerState::Stopped => 0,
            SchedulerState::Starting => 1,
            SchedulerState::Running => 2,
            SchedulerState::Backoff => 3,
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "STOPPED"),
            SchedulerState::Starting => write!(f, "STARTING"),
            SchedulerState::Running => write!(f, "RUNNING"),
            SchedulerState::Backoff => write!(f, "BACKOFF"),
        }
    }
}

/// Timing for polls and retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Delay after the first consecutive failure
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Delay before the next attempt after `failures` consecutive failures.
///
/// Doubles from `backoff_initial` up to `backoff_max`, and never retries
/// faster than the poll interval.
pub fn backoff_delay(config: &SchedulerConfig, failures: u32) -> Duration {
    if failures == 0 {
        return config.poll_interval;
    }
    let exponent = (failures - 1).min(16);
    config
        .backoff_initial
        .saturating_mul(1u32 << exponent)
        .min(config.backoff_max)
        .max(config.poll_interval)
}

// ============================================================================
// STATE TRACKING
// ============================================================================

fn publish_state(
    state_tx: &watch::Sender<SchedulerState>,
    metrics: Option<&MetricsCollector>,
    next: SchedulerState,
) {
    let changed = state_tx.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
    if changed {
        info!("🛰️ Scheduler state: {}", next);
        if let Some(metrics) = metrics {
            metrics.set_scheduler_state(next.ordinal());
        }
    }
}

/// Folds per-source results into one scheduler state
struct StateTracker {
    /// Consecutive failures per source; `None` until the first report
    slots: Mutex<Vec<Option<u32>>>,
    state_tx: Arc<watch::Sender<SchedulerState>>,
    metrics: Option<Arc<MetricsCollector>>,
    cancel: CancellationToken,
}

impl StateTracker {
    fn report(&self, slot: usize, failures: u32) {
        // teardown owns the final state
        if self.cancel.is_cancelled() {
            return;
        }
        let next = {
            let mut slots = self.slots.lock();
            if let Some(entry) = slots.get_mut(slot) {
                *entry = Some(failures);
            }
            if slots.iter().any(|s| s.is_some_and(|n| n > 0)) {
                SchedulerState::Backoff
            } else if slots.iter().any(Option::is_some) {
                SchedulerState::Running
            } else {
                SchedulerState::Starting
            }
        };
        publish_state(&self.state_tx, self.metrics.as_deref(), next);
    }
}

// ============================================================================
// WORKERS
// ============================================================================

/// Everything a source task needs
#[derive(Clone)]
struct Worker {
    config: SchedulerConfig,
    aggregator: Aggregator,
    metrics: Option<Arc<MetricsCollector>>,
    tracker: Arc<StateTracker>,
    cancel: CancellationToken,
}

impl Worker {
    /// Sleep unless cancelled first; false on cancellation
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn ingest(&self, source: SourceTag, normalized: Normalized) {
        let Normalized { records, dropped } = normalized;
        let outcome = self.aggregator.apply_batch(&records);

        if let Some(metrics) = &self.metrics {
            let tag = source.as_str();
            metrics.record_records(tag, "applied", outcome.applied - outcome.stale);
            metrics.record_records(tag, "stale", outcome.stale);
            metrics.record_records(tag, "ignored", outcome.ignored);
            metrics.record_records(tag, "dropped", dropped);
            metrics.record_notifications(outcome.notified as u64);

            if outcome.has_changes() {
                let snapshot = self.aggregator.snapshot();
                metrics.set_unit_count(snapshot.units.len());
                metrics.set_detection_count(snapshot.detections.len());
                for unit in snapshot.units.values() {
                    metrics.update_unit(unit);
                }
            }
        }
    }

    async fn poll_loop(self, slot: usize, source: Arc<dyn PullSource>) {
        let tag = source.tag();
        let mut failures: u32 = 0;
        debug!(source = %tag, "Poll loop started");

        loop {
            let started = Instant::now();
            // a slow response must not outrank data that arrived meanwhile
            let requested_at = Utc::now();
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = source.fetch() => result,
            };
            if self.cancel.is_cancelled() {
                debug!(source = %tag, "Discarding fetch completed during shutdown");
                break;
            }

            match result {
                Ok(payload) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_fetch(tag.as_str(), started.elapsed().as_secs_f64());
                    }
                    if failures > 0 {
                        info!(source = %tag, "Source recovered after {} failure(s)", failures);
                    }
                    failures = 0;
                    self.ingest(tag, normalize(tag, &payload, requested_at));
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_fetch_failure(tag.as_str());
                    }
                    warn!(source = %tag, failures, "Fetch failed: {}", e);
                }
            }

            self.tracker.report(slot, failures);
            if !self.pause(backoff_delay(&self.config, failures)).await {
                break;
            }
        }

        debug!(source = %tag, "Poll loop stopped");
    }

    async fn push_loop(self, slot: usize, mut source: Box<dyn PushSource>) -> Box<dyn PushSource> {
        let mut failures: u32 = 0;
        let mut sent = source.events_sent();

        'session: loop {
            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = source.connect() => result,
            };

            match connected {
                // a flapping channel stays in backoff until it delivers
                Ok(()) if failures == 0 => self.tracker.report(slot, failures),
                Ok(()) => debug!(endpoint = source.endpoint(), failures, "Push channel reconnected"),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(endpoint = source.endpoint(), failures, "Push channel connect failed: {}", e);
                    self.tracker.report(slot, failures);
                    if !self.pause(backoff_delay(&self.config, failures)).await {
                        break;
                    }
                    continue;
                }
            }

            loop {
                let next = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break 'session,
                    result = source.next_event() => result,
                };

                if let Some(metrics) = &self.metrics {
                    let total = source.events_sent();
                    metrics.record_channel_sent(total.saturating_sub(sent));
                    sent = total;
                }

                match next {
                    Ok(event) => {
                        if self.cancel.is_cancelled() {
                            break 'session;
                        }
                        if let Some(metrics) = &self.metrics {
                            metrics.record_channel_received();
                        }
                        if failures > 0 {
                            failures = 0;
                            self.tracker.report(slot, failures);
                        }
                        self.ingest(SourceTag::PushChannel, normalize_event(&event, Utc::now()));
                    }
                    Err(e) => {
                        warn!(endpoint = source.endpoint(), "Push channel lost, reconnecting: {}", e);
                        if let Some(metrics) = &self.metrics {
                            metrics.record_channel_reconnect();
                        }
                        failures = failures.saturating_add(1);
                        self.tracker.report(slot, failures);
                        break;
                    }
                }
            }

            if !self.pause(backoff_delay(&self.config, failures)).await {
                break;
            }
        }

        if let Err(e) = source.close().await {
            debug!("Ignoring error closing push channel: {}", e);
        }
        source
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

struct Run {
    cancel: CancellationToken,
    pull_tasks: Vec<JoinHandle<()>>,
    push_task: Option<JoinHandle<Box<dyn PushSource>>>,
}

/// Owns the source tasks feeding one aggregator
pub struct Scheduler {
    config: SchedulerConfig,
    aggregator: Aggregator,
    metrics: Option<Arc<MetricsCollector>>,
    pull_sources: Vec<Arc<dyn PullSource>>,
    /// Lent to the push task while running
    push_source: Option<Box<dyn PushSource>>,
    state_tx: Arc<watch::Sender<SchedulerState>>,
    run: Option<Run>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, aggregator: Aggregator) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Stopped);
        Self {
            config,
            aggregator,
            metrics: None,
            pull_sources: Vec::new(),
            push_source: None,
            state_tx: Arc::new(state_tx),
            run: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        metrics.set_scheduler_state(self.state().ordinal());
        self.metrics = Some(metrics);
        self
    }

    pub fn add_pull_source(&mut self, source: Arc<dyn PullSource>) {
        self.pull_sources.push(source);
    }

    /// Replace the push source; takes effect on the next start
    pub fn set_push_source(&mut self, source: Box<dyn PushSource>) {
        self.push_source = Some(source);
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn source_count(&self) -> usize {
        self.pull_sources.len()
            + usize::from(self.push_source.is_some())
            + self.run.as_ref().map_or(0, |run| usize::from(run.push_task.is_some()))
    }

    /// Spawn one task per source. Must be called inside a Tokio runtime.
    pub fn start(&mut self) -> IngestResult<()> {
        if self.run.is_some() {
            return Err(IngestError::AlreadyRunning);
        }
        if self.pull_sources.is_empty() && self.push_source.is_none() {
            return Err(IngestError::NoSources);
        }

        let cancel = CancellationToken::new();
        let slot_count = self.pull_sources.len() + usize::from(self.push_source.is_some());
        let tracker = Arc::new(StateTracker {
            slots: Mutex::new(vec![None; slot_count]),
            state_tx: Arc::clone(&self.state_tx),
            metrics: self.metrics.clone(),
            cancel: cancel.clone(),
        });
        publish_state(&self.state_tx, self.metrics.as_deref(), SchedulerState::Starting);

        let worker = Worker {
            config: self.config,
            aggregator: self.aggregator.clone(),
            metrics: self.metrics.clone(),
            tracker,
            cancel: cancel.clone(),
        };

        let pull_tasks = self
            .pull_sources
            .iter()
            .enumerate()
            .map(|(slot, source)| tokio::spawn(worker.clone().poll_loop(slot, Arc::clone(source))))
            .collect();

        let push_task = self.push_source.take().map(|source| {
            info!("🔗 Push channel source: {}", source.endpoint());
            tokio::spawn(worker.push_loop(slot_count - 1, source))
        });

        info!(
            "🚀 Scheduler started: {} pull source(s), push channel {}",
            self.pull_sources.len(),
            if push_task.is_some() { "enabled" } else { "disabled" }
        );

        self.run = Some(Run {
            cancel,
            pull_tasks,
            push_task,
        });
        Ok(())
    }

    /// Cancel every source task and wait for it to finish. In-flight
    /// fetches are dropped; nothing is applied once this returns.
    pub async fn shutdown(&mut self) -> IngestResult<()> {
        let Some(run) = self.run.take() else {
            return Err(IngestError::NotRunning);
        };
        run.cancel.cancel();

        for task in run.pull_tasks {
            if let Err(e) = task.await {
                warn!("Poll task ended abnormally: {}", e);
            }
        }
        if let Some(task) = run.push_task {
            match task.await {
                Ok(source) => self.push_source = Some(source),
                Err(e) => warn!("Push task ended abnormally: {}", e),
            }
        }

        publish_state(&self.state_tx, self.metrics.as_deref(), SchedulerState::Stopped);
        info!("🛑 Scheduler stopped");
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            run.cancel.cancel();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
