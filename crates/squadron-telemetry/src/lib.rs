//! # Squadron Telemetry - Metrics & Observability
//!
//! Prometheus metrics for the squadron telemetry aggregator:
//! - Fleet gauges (units, fuel, weapons, active detections)
//! - Ingest counters per source (applied, stale, ignored, dropped, fetch failures)
//! - Scheduler state and push-channel health
//! - Consumer surface (WebSocket streams, API requests)

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry,
};
use squadron_core::Unit;
use tracing::info;

/// Metrics collector for the aggregator
pub struct MetricsCollector {
    registry: Registry,

    // Fleet metrics
    unit_count: IntGauge,
    unit_fuel: GaugeVec,
    unit_weapons: GaugeVec,
    detections_active: IntGauge,

    // Ingest metrics
    records_total: IntCounterVec,
    fetch_failures_total: IntCounterVec,
    fetch_duration: HistogramVec,
    notifications_total: IntCounter,

    // Scheduler & channel metrics
    scheduler_state: IntGauge,
    channel_reconnects: IntCounter,
    channel_messages_received: IntCounter,
    channel_messages_sent: IntCounter,

    // Consumer metrics
    ws_streams: IntGauge,
    api_requests_total: IntCounterVec,
    api_request_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        // Fleet metrics
        let unit_count = IntGauge::new("squadron_units_total", "Units currently tracked")?;
        registry.register(Box::new(unit_count.clone()))?;

        let unit_fuel = GaugeVec::new(
            Opts::new("squadron_unit_fuel_percent", "Unit fuel level"),
            &["unit_id"],
        )?;
        registry.register(Box::new(unit_fuel.clone()))?;

        let unit_weapons = GaugeVec::new(
            Opts::new("squadron_unit_weapons", "Unit weapons remaining"),
            &["unit_id"],
        )?;
        registry.register(Box::new(unit_weapons.clone()))?;

        let detections_active = IntGauge::new(
            "squadron_detections_active",
            "Active RWR detections",
        )?;
        registry.register(Box::new(detections_active.clone()))?;

        // Ingest metrics
        let records_total = IntCounterVec::new(
            Opts::new("squadron_records_total", "Update records by source and outcome"),
            &["source", "outcome"],
        )?;
        registry.register(Box::new(records_total.clone()))?;

        let fetch_failures_total = IntCounterVec::new(
            Opts::new("squadron_fetch_failures_total", "Failed fetches by source"),
            &["source"],
        )?;
        registry.register(Box::new(fetch_failures_total.clone()))?;

        let fetch_duration = HistogramVec::new(
            HistogramOpts::new("squadron_fetch_duration_seconds", "Source fetch duration")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["source"],
        )?;
        registry.register(Box::new(fetch_duration.clone()))?;

        let notifications_total = IntCounter::new(
            "squadron_notifications_total",
            "Subscriber callbacks invoked",
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        // Scheduler & channel metrics
        let scheduler_state = IntGauge::new(
            "squadron_scheduler_state",
            "Scheduler state (0=stopped, 1=starting, 2=running, 3=backoff)",
        )?;
        registry.register(Box::new(scheduler_state.clone()))?;

        let channel_reconnects = IntCounter::new(
            "squadron_channel_reconnects_total",
            "Push channel reconnect attempts",
        )?;
        registry.register(Box::new(channel_reconnects.clone()))?;

        let channel_messages_received = IntCounter::new(
            "squadron_channel_messages_received_total",
            "Push channel events received",
        )?;
        registry.register(Box::new(channel_messages_received.clone()))?;

        let channel_messages_sent = IntCounter::new(
            "squadron_channel_messages_sent_total",
            "Outbound events written to the push channel",
        )?;
        registry.register(Box::new(channel_messages_sent.clone()))?;

        // Consumer metrics
        let ws_streams = IntGauge::new("squadron_ws_streams", "Open consumer WebSocket streams")?;
        registry.register(Box::new(ws_streams.clone()))?;

        let api_requests_total = IntCounterVec::new(
            Opts::new("squadron_api_requests_total", "API requests"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(api_requests_total.clone()))?;

        let api_request_duration = HistogramVec::new(
            HistogramOpts::new("squadron_api_request_duration_seconds", "API request duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["method", "path"],
        )?;
        registry.register(Box::new(api_request_duration.clone()))?;

        info!("📊 Metrics collector initialized");

        Ok(Self {
            registry,
            unit_count,
            unit_fuel,
            unit_weapons,
            detections_active,
            records_total,
            fetch_failures_total,
            fetch_duration,
            notifications_total,
            scheduler_state,
            channel_reconnects,
            channel_messages_received,
            channel_messages_sent,
            ws_streams,
            api_requests_total,
            api_request_duration,
        })
    }

    /// Get Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    // ========================================================================
    // FLEET METRICS
    // ========================================================================

    pub fn set_unit_count(&self, count: usize) {
        self.unit_count.set(count as i64);
    }

    pub fn set_detection_count(&self, count: usize) {
        self.detections_active.set(count as i64);
    }

    /// Update per-unit gauges
    pub fn update_unit(&self, unit: &Unit) {
        let id = unit.id.as_str();
        self.unit_fuel.with_label_values(&[id]).set(unit.fuel);
        self.unit_weapons
            .with_label_values(&[id])
            .set(f64::from(unit.weapons));
    }

    // ========================================================================
    // INGEST METRICS
    // ========================================================================

    /// Count records for `source` with `outcome` (applied, stale, ignored, dropped)
    pub fn record_records(&self, source: &str, outcome: &str, count: usize) {
        if count > 0 {
            self.records_total
                .with_label_values(&[source, outcome])
                .inc_by(count as u64);
        }
    }

    pub fn record_fetch(&self, source: &str, duration_secs: f64) {
        self.fetch_duration
            .with_label_values(&[source])
            .observe(duration_secs);
    }

    pub fn record_fetch_failure(&self, source: &str) {
        self.fetch_failures_total.with_label_values(&[source]).inc();
    }

    pub fn record_notifications(&self, count: u64) {
        self.notifications_total.inc_by(count);
    }

    // ========================================================================
    // SCHEDULER & CHANNEL METRICS
    // ========================================================================

    pub fn set_scheduler_state(&self, ordinal: i64) {
        self.scheduler_state.set(ordinal);
    }

    pub fn record_channel_reconnect(&self) {
        self.channel_reconnects.inc();
    }

    pub fn record_channel_received(&self) {
        self.channel_messages_received.inc();
    }

    pub fn record_channel_sent(&self, count: u64) {
        self.channel_messages_sent.inc_by(count);
    }

    // ========================================================================
    // CONSUMER METRICS
    // ========================================================================

    pub fn ws_stream_opened(&self) {
        self.ws_streams.inc();
    }

    pub fn ws_stream_closed(&self) {
        self.ws_streams.dec();
    }

    /// Record API request
    pub fn record_api_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        self.api_requests_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        self.api_request_duration
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = MetricsCollector::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_metrics_export() {
        let metrics = MetricsCollector::new().unwrap();

        metrics.set_unit_count(4);
        metrics.set_detection_count(2);
        metrics.set_scheduler_state(2);
        metrics.record_records("squadron_status", "applied", 4);

        let export = metrics.export().unwrap();
        assert!(export.contains("squadron_units_total 4"));
        assert!(export.contains("squadron_detections_active 2"));
        assert!(export.contains("squadron_scheduler_state 2"));
        assert!(export.contains("outcome=\"applied\""));
    }

    #[test]
    fn test_unit_metrics() {
        let metrics = MetricsCollector::new().unwrap();

        let mut unit = Unit::new("3", 10, 10);
        unit.fuel = 62.5;
        unit.weapons = 4;
        metrics.update_unit(&unit);

        let export = metrics.export().unwrap();
        assert!(export.contains("squadron_unit_fuel_percent{unit_id=\"3\"} 62.5"));
        assert!(export.contains("squadron_unit_weapons{unit_id=\"3\"} 4"));
    }

    #[test]
    fn test_zero_counts_not_recorded() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_records("simulated", "dropped", 0);
        assert!(!metrics.export().unwrap().contains("outcome=\"dropped\""));
    }
}
