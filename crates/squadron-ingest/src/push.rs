//! Push channel client as a scheduler source

use crate::error::IngestResult;
use crate::source::PushSource;

use async_trait::async_trait;
use squadron_core::ChannelEvent;
use squadron_websocket::ChannelClient;

#[async_trait]
impl PushSource for ChannelClient {
    fn endpoint(&self) -> &str {
        self.url()
    }

    async fn connect(&mut self) -> IngestResult<()> {
        Ok(ChannelClient::connect(self).await?)
    }

    async fn next_event(&mut self) -> IngestResult<ChannelEvent> {
        Ok(ChannelClient::next_event(self).await?)
    }

    async fn close(&mut self) -> IngestResult<()> {
        Ok(ChannelClient::close(self).await?)
    }

    fn events_sent(&self) -> u64 {
        self.stats().events_sent
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use squadron_websocket::{ChannelConfig, ChannelError};

    #[tokio::test]
    async fn test_channel_client_errors_surface_as_ingest_errors() {
        let mut client: Box<dyn PushSource> =
            Box::new(ChannelClient::new(ChannelConfig::new("ws://127.0.0.1:9")));

        assert_eq!(client.endpoint(), "ws://127.0.0.1:9");
        assert!(matches!(
            client.next_event().await,
            Err(IngestError::Channel(ChannelError::NotConnected))
        ));
        assert!(client.close().await.is_ok());
        assert_eq!(client.events_sent(), 0);
    }
}
