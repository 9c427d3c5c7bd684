//! WebSocket message type discriminators for the realtime status channel.
//!
//! The server pushes `project_update`, `global_update` and `subscribed`
//! frames; the client sends `subscribe` and `unsubscribe` intents.

/// Status change or progress note for a single project (server to client).
pub const MSG_TYPE_PROJECT_UPDATE: &str = "project_update";

/// Broadcast update not tied to a single project (server to client).
pub const MSG_TYPE_GLOBAL_UPDATE: &str = "global_update";

/// Acknowledgement of a subscribe intent (server to client).
pub const MSG_TYPE_SUBSCRIBED: &str = "subscribed";

/// Request to receive updates for a topic (client to server).
pub const MSG_TYPE_SUBSCRIBE: &str = "subscribe";

/// Request to stop receiving updates for a topic (client to server).
pub const MSG_TYPE_UNSUBSCRIBE: &str = "unsubscribe";
