//! Push channel error types

use std::time::Duration;
use thiserror::Error;

/// Push channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connecting to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,
}

impl ChannelError {
    /// Whether reconnecting may help
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ChannelError::WebSocket(_)
                | ChannelError::ConnectTimeout { .. }
                | ChannelError::NotConnected
                | ChannelError::ConnectionClosed
        )
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;
