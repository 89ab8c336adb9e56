//! # Squadron WebSocket Client
//!
//! Client side of the backend's real-time push channel.
//!
//! ## Protocol
//!
//! JSON text frames shaped as [`squadron_core::ChannelEvent`]:
//! - Backend → aggregator: `rwr_update`, `dashboard_update`, `telemetry_update`
//! - Aggregator → backend: `pulse_hit` (simulation telemetry)

pub mod client;
pub mod error;

pub use client::{ChannelClient, ChannelConfig, ChannelStats, WsStream, OUTBOUND_CAPACITY};
pub use error::{ChannelError, ChannelResult};
