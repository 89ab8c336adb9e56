//! Error types for the squadron telemetry system

use thiserror::Error;

/// Core error type for the squadron telemetry system
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid entity id: {0:?}")]
    InvalidEntityId(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid range bucket: {0}")]
    InvalidRange(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn invalid_timestamp(raw: impl Into<String>) -> Self {
        Self::InvalidTimestamp(raw.into())
    }

    pub fn invalid_range(raw: impl Into<String>) -> Self {
        Self::InvalidRange(raw.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
