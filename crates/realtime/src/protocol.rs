//! Wire messages exchanged with the builder backend's `/ws` endpoint.
//!
//! The server sends JSON text frames shaped
//! `{"type": "<kind>", "task_id"?: "...", "data"?: {...}}`; the client
//! sends `{"type": "subscribe" | "unsubscribe", "task_id": "<topic>"}`.

use launchpad_core::channels;
use launchpad_core::message_types::{MSG_TYPE_SUBSCRIBE, MSG_TYPE_UNSUBSCRIBE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::MalformedMessageError;

/// All server-to-client message types.
///
/// Deserialized via the internally-tagged `"type"` field. Types this
/// client does not know map to [`ServerMessage::Unrecognized`] and are
/// ignored rather than treated as malformed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Status change or progress note for one project.
    #[serde(rename = "project_update")]
    ProjectUpdate {
        task_id: String,
        #[serde(default)]
        data: Value,
    },

    /// Update addressed to every connected client.
    #[serde(rename = "global_update")]
    GlobalUpdate {
        #[serde(default)]
        data: Value,
    },

    /// Acknowledgement of a subscribe intent.
    #[serde(rename = "subscribed")]
    Subscribed {
        #[serde(default)]
        task_id: Option<String>,
    },

    #[serde(other)]
    Unrecognized,
}

/// Where an inbound payload is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every live channel whose wire topic is this `task_id`.
    Topic(String),
    /// The local broadcast channel.
    Broadcast,
}

/// A payload and its addressee.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target: Target,
    pub payload: Value,
}

impl ServerMessage {
    /// The target and payload this message should be dispatched with.
    ///
    /// Acknowledgements and unrecognized messages carry nothing to
    /// dispatch and return `None`.
    pub fn into_delivery(self) -> Option<Delivery> {
        match self {
            Self::ProjectUpdate { task_id, data } => Some(Delivery {
                target: Target::Topic(task_id),
                payload: data,
            }),
            Self::GlobalUpdate { data } => Some(Delivery {
                target: Target::Broadcast,
                payload: data,
            }),
            Self::Subscribed { .. } | Self::Unrecognized => None,
        }
    }
}

/// Parse a text frame into a typed message.
///
/// Returns `Err` for invalid JSON, a missing `type`, or a known type
/// with the wrong shape. Callers should log and continue.
pub fn parse_message(text: &str) -> Result<ServerMessage, MalformedMessageError> {
    serde_json::from_str(text).map_err(|source| MalformedMessageError {
        source,
        raw: text.to_string(),
    })
}

/// Client-to-server intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { task_id: String },
    Unsubscribe { task_id: String },
}

impl ClientMessage {
    /// Subscribe intent for `channel`, or `None` for the broadcast channel.
    pub fn subscribe(channel: &str) -> Option<Self> {
        channels::wire_topic(channel).map(Self::subscribe_topic)
    }

    /// Unsubscribe intent for `channel`, or `None` for the broadcast channel.
    pub fn unsubscribe(channel: &str) -> Option<Self> {
        channels::wire_topic(channel).map(|topic| Self::Unsubscribe {
            task_id: topic.to_string(),
        })
    }

    pub fn subscribe_topic(topic: &str) -> Self {
        Self::Subscribe {
            task_id: topic.to_string(),
        }
    }

    /// The wire topic this intent refers to.
    pub fn topic(&self) -> &str {
        match self {
            Self::Subscribe { task_id } | Self::Unsubscribe { task_id } => task_id,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> String {
        let kind = match self {
            Self::Subscribe { .. } => MSG_TYPE_SUBSCRIBE,
            Self::Unsubscribe { .. } => MSG_TYPE_UNSUBSCRIBE,
        };
        json!({ "type": kind, "task_id": self.topic() }).to_string()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use launchpad_core::channels::BROADCAST_CHANNEL;
    use launchpad_core::message_types::{
        MSG_TYPE_GLOBAL_UPDATE, MSG_TYPE_PROJECT_UPDATE, MSG_TYPE_SUBSCRIBED,
    };

    use super::*;

    #[test]
    fn parse_project_update() {
        let json = format!(
            r#"{{"type":"{MSG_TYPE_PROJECT_UPDATE}","task_id":"abc","data":{{"status":"processing","message":"Starting"}}}}"#
        );
        let msg = parse_message(&json).unwrap();
        assert_matches!(
            msg,
            ServerMessage::ProjectUpdate { ref task_id, ref data }
                if task_id == "abc" && data["status"] == "processing"
        );
    }

    #[test]
    fn project_update_targets_its_topic() {
        let json = r#"{"type":"project_update","task_id":"abc","data":{"status":"completed"}}"#;
        let delivery = parse_message(json).unwrap().into_delivery().unwrap();
        assert_eq!(delivery.target, Target::Topic("abc".into()));
        assert_eq!(delivery.payload["status"], "completed");
    }

    #[test]
    fn global_update_targets_broadcast() {
        let json = format!(
            r#"{{"type":"{MSG_TYPE_GLOBAL_UPDATE}","data":{{"type":"new_project","project":{{"task_id":"t1"}}}}}}"#
        );
        let delivery = parse_message(&json).unwrap().into_delivery().unwrap();
        assert_eq!(delivery.target, Target::Broadcast);
        assert_eq!(delivery.payload["project"]["task_id"], "t1");
    }

    #[test]
    fn missing_data_defaults_to_null() {
        let json = r#"{"type":"global_update"}"#;
        let delivery = parse_message(json).unwrap().into_delivery().unwrap();
        assert!(delivery.payload.is_null());
    }

    #[test]
    fn subscribed_ack_has_nothing_to_deliver() {
        let json = format!(r#"{{"type":"{MSG_TYPE_SUBSCRIBED}","task_id":"abc"}}"#);
        let msg = parse_message(&json).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Subscribed {
                task_id: Some("abc".into())
            }
        );
        assert!(msg.into_delivery().is_none());
    }

    #[test]
    fn unknown_type_is_unrecognized_not_error() {
        let json = r#"{"type":"heartbeat","data":{"at":1}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg, ServerMessage::Unrecognized);
        assert!(msg.into_delivery().is_none());
    }

    #[test]
    fn project_update_without_task_id_is_malformed() {
        let json = r#"{"type":"project_update","data":{}}"#;
        assert!(parse_message(json).is_err());
    }

    #[test]
    fn missing_type_is_malformed() {
        assert!(parse_message(r#"{"task_id":"abc"}"#).is_err());
    }

    #[test]
    fn invalid_json_keeps_raw_text() {
        let err = parse_message("not json at all").unwrap_err();
        assert_eq!(err.raw, "not json at all");
    }

    #[test]
    fn subscribe_intent_uses_task_id_topic() {
        let msg = ClientMessage::subscribe("project:abc").unwrap();
        let value: Value = serde_json::from_str(&msg.to_text()).unwrap();
        assert_eq!(value["type"], MSG_TYPE_SUBSCRIBE);
        assert_eq!(value["task_id"], "abc");
    }

    #[test]
    fn unsubscribe_intent_uses_task_id_topic() {
        let msg = ClientMessage::unsubscribe("project:abc").unwrap();
        let value: Value = serde_json::from_str(&msg.to_text()).unwrap();
        assert_eq!(value["type"], MSG_TYPE_UNSUBSCRIBE);
        assert_eq!(msg.topic(), "abc");
    }

    #[test]
    fn broadcast_channel_has_no_intents() {
        assert!(ClientMessage::subscribe(BROADCAST_CHANNEL).is_none());
        assert!(ClientMessage::unsubscribe(BROADCAST_CHANNEL).is_none());
    }

    #[test]
    fn text_frame_matches_serde_encoding() {
        for msg in [
            ClientMessage::subscribe_topic("odd \"quoted\" topic"),
            ClientMessage::unsubscribe("stats:daily").unwrap(),
        ] {
            let text: Value = serde_json::from_str(&msg.to_text()).unwrap();
            assert_eq!(text, serde_json::to_value(&msg).unwrap());
            let back: ClientMessage = serde_json::from_value(text).unwrap();
            assert_eq!(back, msg);
        }
    }
}
