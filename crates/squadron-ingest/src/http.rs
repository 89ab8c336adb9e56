//! HTTP pull sources
//!
//! The backend exposes the squadron roster and the signal intelligence
//! feed as JSON endpoints that are polled on the scheduler's interval.

use crate::error::{IngestError, IngestResult};
use crate::source::PullSource;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use squadron_core::SourceTag;
use std::time::Duration;
use tracing::debug;

pub const SQUADRON_STATUS_PATH: &str = "/api/squadron_status";
pub const SIGNAL_INTELLIGENCE_PATH: &str = "/api/signal_intelligence";

/// Shared client with a per-request timeout
pub fn build_client(timeout: Duration) -> IngestResult<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// GETs one backend endpoint
#[derive(Debug, Clone)]
pub struct HttpPullSource {
    client: Client,
    url: String,
    tag: SourceTag,
}

impl HttpPullSource {
    pub fn new(client: Client, url: impl Into<String>, tag: SourceTag) -> Self {
        Self {
            client,
            url: url.into(),
            tag,
        }
    }

    pub fn squadron_status(client: Client, base_url: &str) -> Self {
        Self::new(client, join(base_url, SQUADRON_STATUS_PATH), SourceTag::SquadronStatus)
    }

    pub fn signal_intelligence(client: Client, base_url: &str) -> Self {
        Self::new(
            client,
            join(base_url, SIGNAL_INTELLIGENCE_PATH),
            SourceTag::SignalIntelligence,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn join(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

#[async_trait]
impl PullSource for HttpPullSource {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    async fn fetch(&self) -> IngestResult<Value> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::status(self.tag, status.as_u16()));
        }
        let payload = response.json::<Value>().await?;
        debug!(source = %self.tag, url = %self.url, "Fetched payload");
        Ok(payload)
    }
}

// ============================================================================
// TESTS
// ============================================================================
