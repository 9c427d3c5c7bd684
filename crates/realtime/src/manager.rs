//! Process-wide realtime connection manager.
//!
//! [`RealtimeClient`] owns a single connection to the backend and
//! multiplexes every channel subscription over it. It is constructed
//! once at startup and handed (cheaply cloned) to each consumer.
//! [`connect`](RealtimeClient::connect) spawns a driver task that runs
//! the connect -> replay -> process -> reconnect loop until
//! [`disconnect`](RealtimeClient::disconnect) cancels it.
//!
//! Connection lifecycle changes are broadcast as [`ConnectionEvent`]s.
//! Call [`RealtimeClient::events`] to receive them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use launchpad_core::channels::BROADCAST_CHANNEL;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::policy::{PolicyState, ReconnectConfig, ReconnectPolicy};
use crate::protocol::{parse_message, ClientMessage, ServerMessage, Target};
use crate::registry::{self, ChannelRegistry, ListenerId, Removal};
use crate::transport::{Link, Transport, WsTransport};

/// Broadcast channel capacity for connection events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long a graceful close may take before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// State of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `connect()` has never been called.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected; subscribe intents go straight to the wire.
    Open,
    /// Dropped (waiting to retry) or explicitly disconnected.
    Closed,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection opened and the subscription set was replayed.
    Connected { session_id: String, replayed: usize },

    /// An open connection dropped without `disconnect()`.
    Disconnected { session_id: String, reason: String },

    /// A reconnection attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },

    /// `disconnect()` was called; no further attempts are made.
    Suspended,
}

/// Handle to the realtime connection.
///
/// Clones share the same connection and registry.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

/// Everything mutated by both consumers and the driver task.
///
/// Registry changes, state transitions and intent queueing all happen
/// under this one lock, so a subscribe racing an open yields exactly
/// one subscribe intent.
struct Shared {
    registry: ChannelRegistry,
    state: ConnectionState,
    policy: ReconnectPolicy,
    /// Intent queue of the open session, drained by the driver.
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    /// Cancellation token of the running driver task.
    driver: Option<CancellationToken>,
}

impl RealtimeClient {
    /// Create a client over `transport`. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(transport: impl Transport, config: ReconnectConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                transport: Arc::new(transport),
                shared: Mutex::new(Shared {
                    registry: ChannelRegistry::new(),
                    state: ConnectionState::Idle,
                    policy: ReconnectPolicy::new(config),
                    outbound: None,
                    driver: None,
                }),
                state_tx,
                event_tx,
            }),
        }
    }

    /// Create a client for a WebSocket endpoint such as `ws://host:8000/ws`.
    pub fn websocket(url: impl Into<String>, config: ReconnectConfig) -> Self {
        Self::new(WsTransport::new(url), config)
    }

    /// Start the connection.
    ///
    /// Returns immediately; the connection is driven by a task spawned on
    /// the current tokio runtime. A no-op while a driver is already
    /// running (connecting, open, or waiting to retry).
    pub fn connect(&self) {
        let cancel = {
            let mut shared = self.inner.lock();
            if shared.driver.is_some() {
                tracing::debug!("Realtime connection already active");
                return;
            }
            let cancel = CancellationToken::new();
            shared.driver = Some(cancel.clone());
            shared.policy.resume();
            self.inner.set_state(&mut shared, ConnectionState::Connecting);
            cancel
        };

        tracing::info!(endpoint = self.inner.transport.endpoint(), "Starting realtime connection");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_connection_loop(&inner, &cancel).await;
            tracing::debug!("Realtime connection task exited");
        });
    }

    /// Close the connection intentionally.
    ///
    /// Cancels any in-flight attempt, open session or scheduled retry and
    /// suspends reconnection. Idempotent. Listeners stay registered and
    /// are replayed by the next [`connect`](Self::connect).
    pub fn disconnect(&self) {
        let mut shared = self.inner.lock();
        shared.policy.on_disconnect();

        let Some(cancel) = shared.driver.take() else {
            return;
        };
        cancel.cancel();
        shared.outbound = None;
        self.inner.set_state(&mut shared, ConnectionState::Closed);
        drop(shared);

        self.inner.emit(ConnectionEvent::Suspended);
        tracing::info!("Realtime connection closed by client");
    }

    /// Register `listener` for every payload dispatched on `channel`.
    ///
    /// The first listener of a channel triggers a subscribe intent, sent
    /// immediately when the connection is open and otherwise replayed on
    /// the next open. The listener stays registered until the returned
    /// [`Subscription`] is released or dropped.
    pub fn subscribe<F>(&self, channel: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let mut shared = self.inner.lock();
        let registration = shared.registry.subscribe(&channel, Arc::new(listener));

        if registration.first && shared.state == ConnectionState::Open {
            if let Some(intent) = ClientMessage::subscribe(&channel) {
                // Another live channel may already hold this topic.
                if shared.registry.channels_for_topic(intent.topic()).len() == 1 {
                    shared.queue(intent);
                }
            }
        }
        drop(shared);

        tracing::debug!(channel = %channel, listener = %registration.id, "Listener registered");

        Subscription {
            client: Arc::downgrade(&self.inner),
            channel,
            id: registration.id,
            released: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn policy_state(&self) -> PolicyState {
        self.inner.lock().policy.state()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to connection lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Channels that currently have at least one listener.
    pub fn active_channels(&self) -> Vec<String> {
        self.inner.lock().registry.channels()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner.lock().registry.listener_count(channel)
    }
}

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("RealtimeClient")
            .field("endpoint", &self.inner.transport.endpoint())
            .field("state", &shared.state)
            .field("policy", &shared.policy.state())
            .field("registry", &shared.registry)
            .finish()
    }
}

/// Registration handle returned by [`RealtimeClient::subscribe`].
///
/// Releasing it (explicitly or by dropping it) removes exactly this
/// listener. When it was the channel's last listener and the connection
/// is open, an unsubscribe intent is sent.
#[must_use = "dropping a Subscription immediately removes its listener"]
pub struct Subscription {
    client: Weak<Inner>,
    channel: String,
    id: ListenerId,
    released: AtomicBool,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.client.upgrade() {
            inner.release(&self.channel, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("released", &self.released.load(Ordering::Acquire))
            .finish()
    }
}

// ---- shared-state transitions ----

impl Shared {
    fn queue(&self, intent: ClientMessage) {
        match &self.outbound {
            Some(tx) => {
                if tx.send(intent).is_err() {
                    tracing::debug!("Session ended before intent was sent");
                }
            }
            None => tracing::debug!("No open session, intent deferred to replay"),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        shared.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        // Ignore the SendError: it only means nobody is listening.
        let _ = self.event_tx.send(event);
    }

    fn release(&self, channel: &str, id: ListenerId) {
        let mut shared = self.lock();
        let removal = shared.registry.unsubscribe(channel, id);

        if removal == Removal::ChannelEmptied && shared.state == ConnectionState::Open {
            if let Some(intent) = ClientMessage::unsubscribe(channel) {
                if !shared.registry.has_topic(intent.topic()) {
                    shared.queue(intent);
                }
            }
        }
        drop(shared);

        tracing::debug!(channel, listener = %id, ?removal, "Listener released");
    }

    /// Mark a new attempt as in flight. Returns `false` once cancelled.
    fn begin_attempt(&self, cancel: &CancellationToken) -> bool {
        let mut shared = self.lock();
        if cancel.is_cancelled() {
            return false;
        }
        self.set_state(&mut shared, ConnectionState::Connecting);
        true
    }

    /// Transition to `Open` and replay the full subscription set into a
    /// fresh intent queue.
    ///
    /// Returns the queue's receiver, or `None` when `disconnect()` won
    /// the race with the handshake.
    fn open_session(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
    ) -> Option<mpsc::UnboundedReceiver<ClientMessage>> {
        let mut shared = self.lock();
        if cancel.is_cancelled() || !shared.policy.on_open() {
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let topics = shared.registry.wire_topics();
        let replayed = topics.len();
        for topic in &topics {
            // The receiver is alive: it is returned below.
            let _ = tx.send(ClientMessage::subscribe_topic(topic));
        }
        shared.outbound = Some(tx);
        self.set_state(&mut shared, ConnectionState::Open);
        drop(shared);

        tracing::info!(session_id, replayed, "Realtime connection open");
        self.emit(ConnectionEvent::Connected {
            session_id: session_id.to_string(),
            replayed,
        });
        Some(rx)
    }

    /// An open session dropped. Returns the delay before the next attempt.
    fn session_lost(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        reason: String,
    ) -> Option<Duration> {
        let mut shared = self.lock();
        if cancel.is_cancelled() {
            return None;
        }
        shared.outbound = None;
        self.set_state(&mut shared, ConnectionState::Closed);
        let delay = shared.policy.on_unexpected_close();
        let attempt = retry_attempt(shared.policy.state());
        drop(shared);

        tracing::warn!(session_id, reason = %reason, "Realtime connection lost");
        self.emit(ConnectionEvent::Disconnected {
            session_id: session_id.to_string(),
            reason,
        });
        self.schedule(attempt, delay)
    }

    /// A connection attempt failed. Returns the delay before the next one.
    fn attempt_failed(&self, cancel: &CancellationToken) -> Option<Duration> {
        let mut shared = self.lock();
        if cancel.is_cancelled() {
            return None;
        }
        self.set_state(&mut shared, ConnectionState::Closed);
        let delay = shared.policy.on_attempt_failed();
        let attempt = retry_attempt(shared.policy.state());
        drop(shared);

        self.schedule(attempt, delay)
    }

    fn schedule(&self, attempt: u32, delay: Option<Duration>) -> Option<Duration> {
        let delay = delay?;
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling realtime reconnection",
        );
        self.emit(ConnectionEvent::Reconnecting { attempt, delay });
        Some(delay)
    }

    /// Parse one inbound frame and dispatch it to its channel.
    ///
    /// Malformed frames are logged and dropped; nothing here can fail the
    /// session.
    fn handle_frame(&self, text: &str) {
        let message = match parse_message(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %e.raw, "Dropping malformed realtime message");
                return;
            }
        };

        match message {
            ServerMessage::Subscribed { task_id } => {
                tracing::debug!(?task_id, "Subscription acknowledged");
            }
            ServerMessage::Unrecognized => {
                tracing::debug!(raw_message = %text, "Ignoring unrecognized realtime message");
            }
            other => {
                if let Some(delivery) = other.into_delivery() {
                    self.dispatch(&delivery.target, &delivery.payload);
                }
            }
        }
    }

    /// Invoke the target's listeners outside the lock.
    ///
    /// A topic reaches every live channel mapped to it, in channel order.
    fn dispatch(&self, target: &Target, payload: &Value) {
        let snapshots: Vec<_> = {
            let shared = self.lock();
            let channels = match target {
                Target::Broadcast => vec![BROADCAST_CHANNEL.to_string()],
                Target::Topic(topic) => shared.registry.channels_for_topic(topic),
            };
            channels
                .into_iter()
                .map(|channel| {
                    let listeners = shared.registry.snapshot(&channel);
                    (channel, listeners)
                })
                .filter(|(_, listeners)| !listeners.is_empty())
                .collect()
        };
        if snapshots.is_empty() {
            tracing::trace!(?target, "No listeners for realtime message");
            return;
        }

        for (channel, listeners) in &snapshots {
            let report = registry::dispatch_snapshot(channel, listeners, payload);
            tracing::trace!(
                channel = %channel,
                delivered = report.delivered,
                failed = report.failed.len(),
                "Dispatched realtime message",
            );
        }
    }
}

fn retry_attempt(state: PolicyState) -> u32 {
    match state {
        PolicyState::Retrying { attempt } => attempt,
        _ => 0,
    }
}

// ---- driver task ----

/// How a session ended.
enum SessionEnd {
    /// `disconnect()` was called.
    Cancelled,
    /// The connection dropped or failed.
    Dropped(String),
}

/// Core connection loop: connect -> replay -> process -> reconnect.
///
/// Runs until the cancellation token is triggered.
async fn run_connection_loop(inner: &Inner, cancel: &CancellationToken) {
    loop {
        if !inner.begin_attempt(cancel) {
            return;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = inner.transport.open() => result,
        };

        let delay = match result {
            Ok(mut link) => {
                let session_id = uuid::Uuid::new_v4().to_string();
                let Some(outbound) = inner.open_session(cancel, &session_id) else {
                    close_link(&mut link).await;
                    return;
                };

                match run_session(inner, link, outbound, cancel).await {
                    SessionEnd::Cancelled => return,
                    SessionEnd::Dropped(reason) => {
                        match inner.session_lost(cancel, &session_id, reason) {
                            Some(delay) => delay,
                            None => return,
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = inner.transport.endpoint(),
                    error = %e,
                    "Realtime connection attempt failed",
                );
                match inner.attempt_failed(cancel) {
                    Some(delay) => delay,
                    None => return,
                }
            }
        };

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Drive one open connection: forward queued intents to the sink and
/// dispatch inbound frames in delivery order.
async fn run_session(
    inner: &Inner,
    mut link: Link,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                close_link(&mut link).await;
                return SessionEnd::Cancelled;
            }
            Some(intent) = outbound.recv() => {
                tracing::debug!(topic = intent.topic(), ?intent, "Sending realtime intent");
                if let Err(e) = link.sink.send(intent.to_text()).await {
                    return SessionEnd::Dropped(e.to_string());
                }
            }
            frame = link.stream.next() => match frame {
                Some(Ok(text)) => inner.handle_frame(&text),
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                None => return SessionEnd::Dropped("connection closed by server".to_string()),
            },
        }
    }
}

async fn close_link(link: &mut Link) {
    match tokio::time::timeout(CLOSE_TIMEOUT, link.sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Error closing realtime connection"),
        Err(_) => tracing::debug!("Timed out closing realtime connection"),
    }
}
