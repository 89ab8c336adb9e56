//! Telemetry source seams
//!
//! Pull sources are fetched on an interval; a push source holds one
//! long-lived connection that yields events as they arrive.

use crate::error::IngestResult;

use async_trait::async_trait;
use serde_json::Value;
use squadron_core::{ChannelEvent, SourceTag};

/// Request/response source polled by the scheduler
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PullSource: Send + Sync {
    /// Tag used to pick the payload shape and label metrics
    fn tag(&self) -> SourceTag;

    /// Fetch one raw payload
    async fn fetch(&self) -> IngestResult<Value>;
}

/// Event stream the scheduler keeps connected
#[async_trait]
pub trait PushSource: Send {
    fn endpoint(&self) -> &str;

    async fn connect(&mut self) -> IngestResult<()>;

    /// Next inbound event; an error means the connection is gone
    async fn next_event(&mut self) -> IngestResult<ChannelEvent>;

    async fn close(&mut self) -> IngestResult<()>;

    /// Outbound events written so far
    fn events_sent(&self) -> u64 {
        0
    }
}
