//! # Squadron Ingest
//!
//! Everything between the telemetry backend and the aggregator:
//! - [`adapter`]: raw payloads to canonical update records
//! - [`http`]: polled REST endpoints
//! - push channel client as a [`PushSource`]
//! - [`sim`]: simulated squadron for running without a backend
//! - [`Scheduler`]: drives the sources, backs off on failure

pub mod adapter;
pub mod error;
pub mod http;
pub mod push;
pub mod scheduler;
pub mod sim;
pub mod source;

pub use adapter::{normalize, normalize_event, parse_timestamp, Normalized};
pub use error::{IngestError, IngestResult};
pub use http::{build_client, HttpPullSource, SIGNAL_INTELLIGENCE_PATH, SQUADRON_STATUS_PATH};
pub use scheduler::{backoff_delay, Scheduler, SchedulerConfig, SchedulerState};
pub use sim::SimulatedSource;
pub use source::{PullSource, PushSource};
