//! API route definitions

use crate::handlers;
use crate::state::AppState;

use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use std::time::{Duration, Instant};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/status", get(handlers::system_status))

        // Metrics (Prometheus format)
        .route("/metrics", get(handlers::metrics))

        // Aggregated state
        .route("/api/v1/state", get(handlers::get_full_state))
        .route("/api/v1/units", get(handlers::list_units))
        .route("/api/v1/units/{id}", get(handlers::get_unit))
        .route("/api/v1/units/{id}/signals", get(handlers::get_unit_signals))
        .route("/api/v1/detections", get(handlers::list_detections))
        .route("/api/v1/intel", get(handlers::get_intel))
        .route("/api/v1/summary", get(handlers::get_summary))

        // Live slices
        .route("/ws", get(handlers::stream_slices))

        // Apply middleware
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(cors_layer(&state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    if state.config.cors_permissive {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600));
    }

    match HeaderValue::from_str(&state.config.cors_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!("Invalid CORS origin {:?}, cross-origin requests disabled: {}", state.config.cors_origin, e);
            CorsLayer::new()
        }
    }
}

/// Count and time every routed request
async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let started = Instant::now();

    let response = next.run(request).await;

    state.metrics.record_api_request(
        &method,
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;

    use axum::body::{to_bytes, Body};
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::Value;
    use squadron_core::{UpdateFields, UpdateRecord};
    use squadron_ingest::SchedulerState;
    use squadron_telemetry::MetricsCollector;
    use squadron_tracker::Aggregator;
    use std::sync::Arc;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn test_state(scheduler: SchedulerState) -> AppState {
        let (_tx, rx) = watch::channel(scheduler);
        AppState::new(
            ApiConfig::default(),
            Aggregator::default(),
            Arc::new(MetricsCollector::new().unwrap()),
            rx,
        )
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let (status, body) = get(app, uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn seed_unit(state: &AppState, id: &str, fuel: f64) {
        let fields = UpdateFields {
            fuel: Some(fuel),
            ..Default::default()
        };
        state.aggregator.apply_batch(&[UpdateRecord::unit(id, fields, Utc::now())]);
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state(SchedulerState::Running));
        let (status, body) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_readiness_follows_scheduler() {
        let (status, body) = get_json(create_router(test_state(SchedulerState::Backoff)), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["scheduler"], "BACKOFF");

        let (status, _) = get_json(create_router(test_state(SchedulerState::Running)), "/ready").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unit_lookup() {
        let state = test_state(SchedulerState::Running);
        let app = create_router(state.clone());

        let (status, body) = get_json(app.clone(), "/api/v1/units/4").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        seed_unit(&state, "4", 130.0);
        let (status, body) = get_json(app.clone(), "/api/v1/units/4").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fuel"], 100.0);

        let (status, body) = get_json(app.clone(), "/api/v1/units/4/signals").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Array(Vec::new()));

        let (_, body) = get_json(app, "/api/v1/units").await;
        assert_eq!(body["total"], 1);
    }

    #[tokio::test]
    async fn test_full_state_and_summary() {
        let state = test_state(SchedulerState::Starting);
        seed_unit(&state, "1", 20.0);
        seed_unit(&state, "2", 80.0);
        let app = create_router(state);

        let (status, body) = get_json(app.clone(), "/api/v1/state").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 2);
        assert_eq!(body["scheduler"], "STARTING");
        assert_eq!(body["units"].as_array().unwrap().len(), 2);

        let (_, summary) = get_json(app.clone(), "/api/v1/summary").await;
        assert_eq!(summary["unit_count"], 2);
        assert_eq!(summary["low_fuel_count"], 1);

        let (_, detections) = get_json(app, "/api/v1/detections").await;
        assert_eq!(detections["total"], 0);
    }

    async fn next_slice<S>(ws: &mut S) -> Value
    where
        S: futures_util::Stream<
                Item = Result<
                    tokio_tungstenite::tungstenite::Message,
                    tokio_tungstenite::tungstenite::Error,
                >,
            > + Unpin,
    {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message;

        loop {
            if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_stream_sends_current_slice_then_changes() {
        let state = test_state(SchedulerState::Running);
        let app = create_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let url = format!("ws://{}/ws?selector=unit:5", addr);
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let initial = next_slice(&mut ws).await;
        assert_eq!(initial["slice"], "unit");
        assert!(initial["data"].is_null());

        seed_unit(&state, "5", 55.0);
        let changed = next_slice(&mut ws).await;
        assert_eq!(changed["data"]["fuel"], 55.0);
        assert_eq!(state.aggregator.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_requests_are_counted() {
        let app = create_router(test_state(SchedulerState::Running));
        get(app.clone(), "/api/v1/intel").await;

        let (status, body) = get(app, "/metrics").await;
        let text = String::from_utf8(body).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("squadron_api_requests_total"));
        assert!(text.contains("path=\"/api/v1/intel\""));
    }
}
