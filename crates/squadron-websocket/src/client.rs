//! Push channel client
//!
//! Reads `{event, data}` text frames from the backend's push channel and
//! writes queued outbound events (simulation `pulse_hit`s) back to it.

use crate::error::{ChannelError, ChannelResult};

use futures_util::{SinkExt, StreamExt};
use squadron_core::ChannelEvent;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound events queued while the socket is busy or down
pub const OUTBOUND_CAPACITY: usize = 256;

/// Push channel connection settings
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// `ws://` or `wss://` endpoint
    pub url: String,
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Connection counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub connects: u64,
    pub events_received: u64,
    pub events_sent: u64,
    pub frames_malformed: u64,
}

enum Step {
    Outbound(ChannelEvent),
    Frame(Option<Result<Message, tungstenite::Error>>),
}

/// WebSocket client for the backend push channel
pub struct ChannelClient {
    config: ChannelConfig,
    stream: Option<WsStream>,
    outbound_tx: mpsc::Sender<ChannelEvent>,
    outbound_rx: mpsc::Receiver<ChannelEvent>,
    stats: ChannelStats,
}

impl ChannelClient {
    pub fn new(config: ChannelConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        Self {
            config,
            stream: None,
            outbound_tx,
            outbound_rx,
            stats: ChannelStats::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Sender for events to write to the channel
    pub fn outbound(&self) -> mpsc::Sender<ChannelEvent> {
        self.outbound_tx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Open the socket, replacing any previous connection
    pub async fn connect(&mut self) -> ChannelResult<()> {
        if self.stream.is_some() {
            if let Err(e) = self.close().await {
                debug!("Ignoring error closing previous channel connection: {}", e);
            }
        }

        let url = self.config.url.as_str();
        let timeout = self.config.connect_timeout;
        let (stream, _response) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| ChannelError::ConnectTimeout {
                url: url.to_string(),
                timeout,
            })??;

        info!("🔗 Push channel connected to {}", url);
        self.stream = Some(stream);
        self.stats.connects += 1;
        Ok(())
    }

    /// Wait for the next inbound event, writing queued outbound events
    /// meanwhile. Malformed frames are skipped.
    pub async fn next_event(&mut self) -> ChannelResult<ChannelEvent> {
        loop {
            let stream = self.stream.as_mut().ok_or(ChannelError::NotConnected)?;

            let step = tokio::select! {
                Some(event) = self.outbound_rx.recv() => Step::Outbound(event),
                frame = stream.next() => Step::Frame(frame),
            };

            match step {
                Step::Outbound(event) => {
                    let json = serde_json::to_string(&event)?;
                    if let Err(e) = stream.send(Message::text(json)).await {
                        self.stream = None;
                        return Err(e.into());
                    }
                    self.stats.events_sent += 1;
                    debug!("Sent {} event", event.event);
                }
                Step::Frame(None) => {
                    self.stream = None;
                    return Err(ChannelError::ConnectionClosed);
                }
                Step::Frame(Some(Err(e))) => {
                    self.stream = None;
                    return Err(e.into());
                }
                Step::Frame(Some(Ok(Message::Close(frame)))) => {
                    info!("Push channel closed by peer: {:?}", frame);
                    self.stream = None;
                    return Err(ChannelError::ConnectionClosed);
                }
                Step::Frame(Some(Ok(Message::Text(text)))) => {
                    match serde_json::from_str::<ChannelEvent>(&text) {
                        Ok(event) => {
                            self.stats.events_received += 1;
                            return Ok(event);
                        }
                        Err(e) => {
                            self.stats.frames_malformed += 1;
                            warn!("Skipping malformed channel frame: {}", e);
                        }
                    }
                }
                Step::Frame(Some(Ok(Message::Binary(bytes)))) => {
                    match serde_json::from_slice::<ChannelEvent>(&bytes) {
                        Ok(event) => {
                            self.stats.events_received += 1;
                            return Ok(event);
                        }
                        Err(e) => {
                            self.stats.frames_malformed += 1;
                            warn!("Skipping malformed binary channel frame: {}", e);
                        }
                    }
                }
                // ping/pong are answered by tungstenite
                Step::Frame(Some(Ok(_))) => {}
            }
        }
    }

    /// Write one event immediately
    pub async fn send(&mut self, event: &ChannelEvent) -> ChannelResult<()> {
        let stream = self.stream.as_mut().ok_or(ChannelError::NotConnected)?;
        let json = serde_json::to_string(event)?;
        stream.send(Message::text(json)).await?;
        self.stats.events_sent += 1;
        Ok(())
    }

    /// Close the socket; a no-op when not connected
    pub async fn close(&mut self) -> ChannelResult<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        match stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => {
                info!("Push channel to {} closed", self.config.url);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
