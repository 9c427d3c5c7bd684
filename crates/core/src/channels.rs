//! Realtime channel naming convention.
//!
//! Channels are plain strings of the form `<resource-kind>:<resource-id>`.
//! Per-project channels are `project:<task_id>`. Broadcast updates that
//! carry no `task_id` are delivered to the single [`BROADCAST_CHANNEL`].
//!
//! Every channel except the broadcast channel maps to a *wire topic*, the
//! key sent to the server in subscribe/unsubscribe intents. The server
//! keys project subscriptions by bare `task_id`, so `project:abc` maps to
//! `abc`; any other channel name is sent unchanged.

/// Prefix of per-project channels.
pub const PROJECT_CHANNEL_PREFIX: &str = "project:";

/// Channel receiving every `global_update` frame.
///
/// Local only: the server pushes global updates to every connection, so
/// no wire intent is ever sent for it.
pub const BROADCAST_CHANNEL: &str = "global";

/// Build the channel name for a project's status updates.
pub fn project_channel(task_id: &str) -> String {
    format!("{PROJECT_CHANNEL_PREFIX}{task_id}")
}

/// Whether the channel is the local broadcast channel.
pub fn is_broadcast(channel: &str) -> bool {
    channel == BROADCAST_CHANNEL
}

/// Wire topic for a channel, or `None` for the broadcast channel.
pub fn wire_topic(channel: &str) -> Option<&str> {
    if is_broadcast(channel) {
        return None;
    }
    Some(channel.strip_prefix(PROJECT_CHANNEL_PREFIX).unwrap_or(channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_channel_uses_prefix() {
        assert_eq!(project_channel("abc"), "project:abc");
    }

    #[test]
    fn project_channel_maps_to_task_id_topic() {
        assert_eq!(wire_topic(&project_channel("abc")), Some("abc"));
    }

    #[test]
    fn broadcast_channel_has_no_topic() {
        assert_eq!(wire_topic(BROADCAST_CHANNEL), None);
    }

    #[test]
    fn other_channels_map_to_themselves() {
        assert_eq!(wire_topic("stats:daily"), Some("stats:daily"));
    }

    #[test]
    fn task_id_containing_colon_keeps_remainder() {
        assert_eq!(wire_topic("project:a:b"), Some("a:b"));
    }
}
