//! Realtime status synchronization over a single WebSocket connection.
//!
//! [`RealtimeClient`] owns one connection to the builder backend and
//! multiplexes any number of channel subscriptions over it. Listeners
//! are kept in a [`ChannelRegistry`]; subscribe intents are replayed on
//! every (re)connection, and dropped connections are retried according
//! to a [`ReconnectPolicy`].

pub mod error;
pub mod manager;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use error::{ConnectionError, ListenerError, MalformedMessageError};
pub use manager::{ConnectionEvent, ConnectionState, RealtimeClient, Subscription};
pub use policy::{PolicyState, ReconnectConfig, ReconnectPolicy};
pub use registry::{ChannelRegistry, ListenerId};
pub use transport::{Transport, WsTransport};
