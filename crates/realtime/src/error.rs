//! Error taxonomy of the realtime layer.
//!
//! None of these are surfaced to consumers: connection errors feed the
//! reconnection policy, malformed frames and listener panics are logged
//! and dropped.

use crate::registry::ListenerId;

/// The transport failed to establish a connection or dropped abnormally.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connect(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection was closed by the peer or the transport.
    #[error("Connection closed: {0}")]
    Closed(String),
}

/// An inbound frame that could not be parsed into a known message shape.
#[derive(Debug, thiserror::Error)]
#[error("Malformed realtime message: {source}")]
pub struct MalformedMessageError {
    #[source]
    pub source: serde_json::Error,
    /// The raw frame text, kept for logging.
    pub raw: String,
}

/// A registered listener panicked while handling a payload.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Listener {listener} on channel '{channel}' panicked: {message}")]
pub struct ListenerError {
    pub channel: String,
    pub listener: ListenerId,
    pub message: String,
}
