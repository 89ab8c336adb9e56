//! API request handlers

use crate::error::ApiError;
use crate::state::AppState;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use squadron_core::{Detection, SignalReading, Unit, UnitId};
use squadron_ingest::SchedulerState;
use squadron_telemetry::MetricsCollector;
use squadron_tracker::{AggregatorStats, FleetSummary, Selector, Slice, Subscription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub api: String,
    pub scheduler: SchedulerState,
    pub state_version: u64,
    pub units: usize,
    pub detections: usize,
    pub subscribers: usize,
    pub uptime_secs: i64,
    pub aggregator: AggregatorStats,
}

#[derive(Serialize)]
pub struct UnitListResponse {
    pub units: Vec<Unit>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct DetectionListResponse {
    pub detections: Vec<Detection>,
    pub total: usize,
}

/// Everything a dashboard needs to initialize
#[derive(Serialize)]
pub struct FullStateResponse {
    pub version: u64,
    pub generated_at: DateTime<Utc>,
    /// Anything but RUNNING means the data may be stale
    pub scheduler: SchedulerState,
    pub units: Vec<Unit>,
    pub detections: Vec<Detection>,
    pub intel: Vec<SignalReading>,
    pub summary: FleetSummary,
}

#[derive(Deserialize)]
pub struct StreamQuery {
    /// `units`, `unit:ID`, `signals:ID`, `detections`, `intel` or `summary`
    pub selector: Option<String>,
}

// ============================================================================
// HEALTH & STATUS HANDLERS
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Ready once the scheduler has a healthy feed
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let scheduler = state.scheduler_state();
    let ready = scheduler == SchedulerState::Running;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(serde_json::json!({"ready": ready, "scheduler": scheduler})))
}

/// System status overview
pub async fn system_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.aggregator.snapshot();

    Json(StatusResponse {
        api: "running".into(),
        scheduler: state.scheduler_state(),
        state_version: snapshot.version,
        units: snapshot.units.len(),
        detections: snapshot.detections.len(),
        subscribers: state.aggregator.subscriber_count(),
        uptime_secs: state.uptime_secs(),
        aggregator: state.aggregator.stats(),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.export()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

// ============================================================================
// STATE HANDLERS
// ============================================================================

/// Full snapshot
pub async fn get_full_state(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.aggregator.snapshot();

    Json(FullStateResponse {
        version: snapshot.version,
        generated_at: snapshot.generated_at,
        scheduler: state.scheduler_state(),
        units: snapshot.units.values().cloned().collect(),
        detections: snapshot.detections.values().cloned().collect(),
        intel: snapshot.intel.to_vec(),
        summary: snapshot.summary(),
    })
}

pub async fn list_units(State(state): State<AppState>) -> impl IntoResponse {
    let units: Vec<Unit> = state.aggregator.snapshot().units.values().cloned().collect();
    let total = units.len();
    Json(UnitListResponse { units, total })
}

pub async fn get_unit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .aggregator
        .snapshot()
        .unit(&UnitId::new(id.as_str()))
        .map(|unit| Json(unit.clone()))
        .ok_or_else(|| ApiError::not_found(format!("Unit {} not found", id)))
}

/// RWR history of one unit, oldest first
pub async fn get_unit_signals(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .aggregator
        .snapshot()
        .unit(&UnitId::new(id.as_str()))
        .map(|unit| Json(unit.signal_history.to_vec()))
        .ok_or_else(|| ApiError::not_found(format!("Unit {} not found", id)))
}

pub async fn list_detections(State(state): State<AppState>) -> impl IntoResponse {
    let detections: Vec<Detection> =
        state.aggregator.snapshot().detections.values().cloned().collect();
    let total = detections.len();
    Json(DetectionListResponse { detections, total })
}

pub async fn get_intel(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.aggregator.snapshot().intel.to_vec())
}

pub async fn get_summary(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.aggregator.snapshot().summary())
}

// ============================================================================
// STREAMING
// ============================================================================

/// Stream a selector's slice: the current value first, then every change
pub async fn stream_slices(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let selector: Selector = query.selector.as_deref().unwrap_or("units").parse()?;
    let (subscription, slices) = state.aggregator.subscribe_channel(selector)?;
    let metrics = Arc::clone(&state.metrics);

    Ok(ws
        .on_upgrade(move |socket| forward_slices(socket, subscription, slices, metrics))
        .into_response())
}

async fn forward_slices(
    mut socket: WebSocket,
    subscription: Subscription,
    mut slices: mpsc::UnboundedReceiver<Slice>,
    metrics: Arc<MetricsCollector>,
) {
    metrics.ws_stream_opened();
    info!("🔗 Consumer stream {} opened for {}", subscription.id(), subscription.selector());

    loop {
        tokio::select! {
            slice = slices.recv() => {
                let Some(slice) = slice else { break };
                match serde_json::to_string(&slice) {
                    Ok(json) => {
                        if let Err(e) = socket.send(Message::Text(json.into())).await {
                            debug!("Consumer stream {} send failed: {}", subscription.id(), e);
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize slice: {}", e),
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // consumers only listen
                Some(Ok(_)) => {}
            },
        }
    }

    subscription.unsubscribe();
    metrics.ws_stream_closed();
    info!("Consumer stream {} closed", subscription.id());
}
