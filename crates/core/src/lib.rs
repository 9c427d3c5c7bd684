//! Shared domain types for the Launchpad dashboard.
//!
//! Project records and statistics returned by the builder API, the
//! realtime channel naming convention, and the wire message type
//! discriminators used by both the REST and WebSocket layers.

pub mod channels;
pub mod error;
pub mod message_types;
pub mod project;
pub mod types;
