//! Channel-to-listener bookkeeping.
//!
//! [`ChannelRegistry`] maps channel names to the ordered list of
//! listeners registered on them. It performs no I/O: the connection
//! manager consults it to decide when subscribe/unsubscribe intents go
//! on the wire and to find the listeners for an inbound payload.
//!
//! Several channels may share one wire topic (`project:abc` and `abc`
//! both map to `abc`). The wire subscription set is the set of topics of
//! live channels, so intents are decided per topic, not per channel.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use launchpad_core::channels::wire_topic;
use serde_json::Value;

use crate::error::ListenerError;

/// Callback invoked with the payload of every message on its channel.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one registration, unique for the registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of [`ChannelRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: ListenerId,
    /// `true` when the channel had no listeners before this one.
    pub first: bool,
}

/// Outcome of [`ChannelRegistry::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The listener was not registered (already removed).
    NotFound,
    /// The listener was removed; others remain on the channel.
    Removed,
    /// The listener was the channel's last one.
    ChannelEmptied,
}

/// Result of delivering one payload to a channel.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Listeners that panicked.
    pub failed: Vec<ListenerError>,
}

struct Entry {
    id: ListenerId,
    listener: Listener,
}

/// In-memory map of channel name to registered listeners.
///
/// Channels are kept sorted so that [`channels`](Self::channels) yields
/// a deterministic replay order. Listeners within a channel keep their
/// registration order.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, Vec<Entry>>,
    next_id: u64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` on `channel`.
    pub fn subscribe(&mut self, channel: &str, listener: Listener) -> Registration {
        self.next_id += 1;
        let id = ListenerId(self.next_id);

        let entries = self.channels.entry(channel.to_string()).or_default();
        let first = entries.is_empty();
        entries.push(Entry { id, listener });

        Registration { id, first }
    }

    /// Remove exactly the listener `id` from `channel`.
    ///
    /// Removing an id twice is a no-op reported as [`Removal::NotFound`].
    pub fn unsubscribe(&mut self, channel: &str, id: ListenerId) -> Removal {
        let Some(entries) = self.channels.get_mut(channel) else {
            return Removal::NotFound;
        };
        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            return Removal::NotFound;
        };

        entries.remove(index);
        if entries.is_empty() {
            self.channels.remove(channel);
            Removal::ChannelEmptied
        } else {
            Removal::Removed
        }
    }

    /// Whether no listener is registered on `channel`.
    pub fn is_empty(&self, channel: &str) -> bool {
        !self.channels.contains_key(channel)
    }

    /// Number of listeners on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }

    /// Names of all channels with at least one listener, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Copy of the listeners on `channel`, in registration order.
    ///
    /// Dispatching from a snapshot lets listeners subscribe or unsubscribe
    /// while a payload is being delivered.
    pub fn snapshot(&self, channel: &str) -> Vec<(ListenerId, Listener)> {
        self.channels
            .get(channel)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| (entry.id, Arc::clone(&entry.listener)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live channels whose wire topic is `topic`, sorted.
    pub fn channels_for_topic(&self, topic: &str) -> Vec<String> {
        self.channels
            .keys()
            .filter(|channel| wire_topic(channel) == Some(topic))
            .cloned()
            .collect()
    }

    /// Whether any live channel maps to `topic`.
    pub fn has_topic(&self, topic: &str) -> bool {
        self.channels
            .keys()
            .any(|channel| wire_topic(channel) == Some(topic))
    }

    /// Distinct wire topics of all live channels, sorted.
    ///
    /// The broadcast channel has no topic and is never listed.
    pub fn wire_topics(&self) -> Vec<String> {
        self.channels
            .keys()
            .filter_map(|channel| wire_topic(channel))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.channels.iter().map(|(name, entries)| (name, entries.len())))
            .finish()
    }
}

/// Deliver `payload` to each listener of a snapshot in order.
///
/// A panicking listener is logged and counted; the remaining listeners
/// still run.
pub fn dispatch_snapshot(
    channel: &str,
    listeners: &[(ListenerId, Listener)],
    payload: &Value,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for (id, listener) in listeners {
        match panic::catch_unwind(AssertUnwindSafe(|| listener(payload))) {
            Ok(()) => report.delivered += 1,
            Err(panic) => {
                let error = ListenerError {
                    channel: channel.to_string(),
                    listener: *id,
                    message: panic_message(panic.as_ref()),
                };
                tracing::warn!(channel, listener = %id, error = %error, "Listener failed");
                report.failed.push(error);
            }
        }
    }

    report
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn dispatch(registry: &ChannelRegistry, channel: &str, payload: &Value) -> DispatchReport {
        dispatch_snapshot(channel, &registry.snapshot(channel), payload)
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener {
        let log = Arc::clone(log);
        Arc::new(move |payload: &Value| {
            log.lock().unwrap().push(format!("{tag}:{payload}"));
        })
    }

    #[test]
    fn first_registration_is_reported() {
        let mut registry = ChannelRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = registry.subscribe("project:abc", recorder(&log, "a"));
        let b = registry.subscribe("project:abc", recorder(&log, "b"));

        assert!(a.first);
        assert!(!b.first);
        assert_ne!(a.id, b.id);
        assert_eq!(registry.listener_count("project:abc"), 2);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let mut registry = ChannelRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = registry.subscribe("project:abc", recorder(&log, "a"));
        registry.subscribe("project:abc", recorder(&log, "b"));

        assert_eq!(registry.unsubscribe("project:abc", a.id), Removal::Removed);
        dispatch(&registry, "project:abc", &Value::from(1));

        assert_eq!(*log.lock().unwrap(), vec!["b:1"]);
    }

    #[test]
    fn unsubscribe_twice_is_noop() {
        let mut registry = ChannelRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = registry.subscribe("project:abc", recorder(&log, "a"));
        let b = registry.subscribe("project:abc", recorder(&log, "b"));

        assert_eq!(registry.unsubscribe("project:abc", a.id), Removal::Removed);
        assert_eq!(registry.unsubscribe("project:abc", a.id), Removal::NotFound);
        assert_eq!(registry.listener_count("project:abc"), 1);
        assert_eq!(
            registry.unsubscribe("project:abc", b.id),
            Removal::ChannelEmptied
        );
        assert!(registry.is_empty("project:abc"));
    }

    #[test]
    fn dispatch_preserves_registration_order() {
        let mut registry = ChannelRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe("project:abc", recorder(&log, "first"));
        registry.subscribe("project:abc", recorder(&log, "second"));
        registry.subscribe("project:other", recorder(&log, "other"));

        let report = dispatch(&registry, "project:abc", &Value::from("x"));

        assert_eq!(report.delivered, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![r#"first:"x""#, r#"second:"x""#]
        );
    }

    #[test]
    fn panicking_listener_does_not_stop_dispatch() {
        let mut registry = ChannelRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe("project:abc", recorder(&log, "before"));
        registry.subscribe("project:abc", Arc::new(|_: &Value| panic!("boom")));
        registry.subscribe("project:abc", recorder(&log, "after"));

        let report = dispatch(&registry, "project:abc", &Value::from(7));

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].message, "boom");
        assert_eq!(*log.lock().unwrap(), vec!["before:7", "after:7"]);
    }

    #[test]
    fn dispatch_to_unknown_channel_is_empty() {
        let registry = ChannelRegistry::new();
        let report = dispatch(&registry, "project:none", &Value::Null);
        assert_eq!(report.delivered, 0);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn channels_lists_only_non_empty_sorted() {
        let mut registry = ChannelRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let z = registry.subscribe("project:z", recorder(&log, "z"));
        registry.subscribe("project:a", recorder(&log, "a"));
        registry.subscribe("global", recorder(&log, "g"));
        registry.unsubscribe("project:z", z.id);

        assert_eq!(registry.channels(), vec!["global", "project:a"]);
    }

    #[test]
    fn channels_sharing_a_topic_are_grouped() {
        let mut registry = ChannelRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let plain = registry.subscribe("abc", recorder(&log, "plain"));
        registry.subscribe("project:abc", recorder(&log, "project"));
        registry.subscribe("global", recorder(&log, "g"));
        registry.subscribe("stats:daily", recorder(&log, "s"));

        assert_eq!(registry.channels_for_topic("abc"), vec!["abc", "project:abc"]);
        assert_eq!(registry.wire_topics(), vec!["abc", "stats:daily"]);

        registry.unsubscribe("abc", plain.id);
        assert!(registry.has_topic("abc"));
        assert_eq!(registry.channels_for_topic("abc"), vec!["project:abc"]);
        assert!(!registry.has_topic("global"));
    }
}
