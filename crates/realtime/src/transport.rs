//! Connection establishment behind a trait seam.
//!
//! The connection manager only needs a way to open a bidirectional
//! stream of text frames. [`WsTransport`] provides it over
//! `tokio-tungstenite`; tests substitute in-memory transports.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{future, Sink, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::ConnectionError;

/// Outbound half of a link: accepts JSON text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ConnectionError> + Send>>;

/// Inbound half of a link: yields JSON text frames until the peer closes.
///
/// The stream ending (`None`) or an `Err` item (including
/// [`ConnectionError::Closed`] for a close frame) ends the session.
pub type FrameStream = BoxStream<'static, Result<String, ConnectionError>>;

/// One established connection.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens connections to the realtime endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Human-readable endpoint, used in log fields.
    fn endpoint(&self) -> &str;

    /// Establish a new connection.
    async fn open(&self) -> Result<Link, ConnectionError>;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    /// * `url` - full WebSocket URL, e.g. `ws://host:8000/ws`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> Result<Link, ConnectionError> {
        let (ws_stream, _response) = connect_async(self.url.as_str()).await.map_err(|e| {
            ConnectionError::Connect(format!("Failed to connect to {}: {e}", self.url))
        })?;

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(Message::Text(text))))
            .sink_map_err(|e| ConnectionError::Protocol(e.to_string()));

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Server closed WebSocket");
                    let reason = match frame {
                        Some(frame) => format!("code {}: {}", u16::from(frame.code), frame.reason),
                        None => "no close frame".to_string(),
                    };
                    Some(Err(ConnectionError::Closed(reason)))
                }
                Ok(Message::Binary(_)) => {
                    tracing::trace!("Ignoring binary frame");
                    None
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                    // Ping/pong are answered by tungstenite.
                    None
                }
                Err(e) => Some(Err(ConnectionError::Protocol(e.to_string()))),
            })
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}
