//! Ingest error types

use squadron_core::{CoreError, SourceTag};
use squadron_websocket::ChannelError;
use thiserror::Error;

/// Source and scheduler errors
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{source_tag} returned HTTP {status}")]
    Status { source_tag: SourceTag, status: u16 },

    #[error("Payload decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Push channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("No telemetry sources configured")]
    NoSources,
}

impl IngestError {
    pub fn status(source_tag: SourceTag, status: u16) -> Self {
        Self::Status { source_tag, status }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
