//! Tracker error types

use thiserror::Error;

/// Subscription hub errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
}

impl HubError {
    pub fn invalid_selector(raw: impl Into<String>) -> Self {
        Self::InvalidSelector(raw.into())
    }
}

pub type HubResult<T> = Result<T, HubError>;
