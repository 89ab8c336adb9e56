//! # Squadron API Server
//!
//! Entry point for the squadron telemetry aggregator. Wires the telemetry
//! sources into the scheduler, the scheduler into the aggregator, and
//! exposes the merged state over REST and WebSocket.

mod config;
mod error;
mod handlers;
mod routes;
mod state;

use crate::config::ApiConfig;
use crate::routes::create_router;
use crate::state::AppState;

use squadron_ingest::{build_client, HttpPullSource, Scheduler, SimulatedSource};
use squadron_telemetry::MetricsCollector;
use squadron_tracker::Aggregator;
use squadron_websocket::{ChannelClient, ChannelConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    info!("✈️ Starting Squadron Telemetry Aggregator v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Load configuration
    let config = ApiConfig::load()?;
    info!("Configuration loaded");
    info!("   API Port: {}", config.api_port);
    if config.simulation_mode {
        info!("   Source: simulated squadron");
    } else {
        info!("   Backend: {}", config.backend_url);
    }
    info!("   Push channel: {}", config.channel_url.as_deref().unwrap_or("disabled"));
    info!("   Poll interval: {} ms", config.poll_interval_ms);

    let metrics = Arc::new(MetricsCollector::new()?);
    let aggregator = Aggregator::new(config.store_config());
    let mut scheduler = Scheduler::new(config.scheduler_config(), aggregator.clone())
        .with_metrics(Arc::clone(&metrics));

    let channel = config.channel_url.as_ref().map(|url| {
        let mut channel_config = ChannelConfig::new(url.clone());
        channel_config.connect_timeout = config.request_timeout();
        ChannelClient::new(channel_config)
    });

    if config.simulation_mode {
        let mut simulation = SimulatedSource::new(config.simulation_seed);
        if let Some(channel) = &channel {
            simulation = simulation.with_outbound(channel.outbound());
        }
        scheduler.add_pull_source(Arc::new(simulation));
    } else {
        let client = build_client(config.request_timeout())?;
        scheduler.add_pull_source(Arc::new(HttpPullSource::squadron_status(
            client.clone(),
            &config.backend_url,
        )));
        scheduler.add_pull_source(Arc::new(HttpPullSource::signal_intelligence(
            client,
            &config.backend_url,
        )));
    }
    if let Some(channel) = channel {
        scheduler.set_push_source(Box::new(channel));
    }

    scheduler.start()?;

    let state = AppState::new(
        config.clone(),
        aggregator,
        Arc::clone(&metrics),
        scheduler.watch_state(),
    );
    let app = create_router(state);
    info!("Routes configured");

    // Start API server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("🚀 API server listening on http://{}", addr);
    info!("Live slices at ws://{}/ws?selector=units", addr);
    info!("Metrics available at http://{}/metrics", addr);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // stop the feeds even if the server failed
    scheduler.shutdown().await?;
    served?;

    info!("🛑 Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing; `LOG_FORMAT=json` switches to JSON lines
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,squadron_api=debug,squadron_ingest=debug"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        }
    }
}
