//! Polling fallback for project and stats views.
//!
//! The REST API is the source of truth: each watcher re-fetches on a
//! fixed interval and publishes the result on a [`watch`] channel.
//! Realtime payloads only wake the loop early so a change shows up
//! without waiting for the next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use launchpad_client::{ApiError, ProjectsApi};
use launchpad_core::channels::{project_channel, BROADCAST_CHANNEL};
use launchpad_core::project::{ProjectRecord, ProjectStats, ProjectUpdate};
use launchpad_realtime::{RealtimeClient, Subscription};

/// Where watchers fetch authoritative state from.
#[async_trait]
pub trait ProjectSource: Send + Sync + 'static {
    async fn fetch_project(&self, task_id: &str) -> Result<ProjectRecord, ApiError>;

    async fn fetch_stats(&self) -> Result<ProjectStats, ApiError>;
}

#[async_trait]
impl ProjectSource for ProjectsApi {
    async fn fetch_project(&self, task_id: &str) -> Result<ProjectRecord, ApiError> {
        self.get_project(task_id).await
    }

    async fn fetch_stats(&self) -> Result<ProjectStats, ApiError> {
        self.get_stats().await
    }
}

/// Why a poll loop fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Start,
    Tick,
    Realtime,
}

/// Wait for a realtime nudge, the next tick, or cancellation.
///
/// A pending nudge wins over a due tick, and restarts the interval so the
/// early fetch is not immediately followed by a scheduled one.
async fn next_wake(
    ticker: &mut tokio::time::Interval,
    nudge: &Notify,
    cancel: &CancellationToken,
) -> Option<Wake> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        _ = nudge.notified() => {
            ticker.reset();
            Some(Wake::Realtime)
        }
        _ = ticker.tick() => Some(Wake::Tick),
    }
}

/// Interval whose first tick is one period away; the initial fetch is
/// made before waiting.
fn new_ticker(interval: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

// ---------------------------------------------------------------------------
// ProjectWatcher
// ---------------------------------------------------------------------------

/// Keeps one project's record fresh until it reaches a terminal status.
pub struct ProjectWatcher {
    task_id: String,
    latest: watch::Receiver<Option<ProjectRecord>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProjectWatcher {
    /// Subscribe to `project:<task_id>` and start polling.
    ///
    /// The first fetch happens immediately. The watcher stops on its own
    /// once a fetched record is `completed` or `failed`, or when `cancel`
    /// (or [`stop`](Self::stop)) fires.
    pub fn spawn(
        source: Arc<dyn ProjectSource>,
        realtime: &RealtimeClient,
        task_id: impl Into<String>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let task_id = task_id.into();
        let cancel = cancel.child_token();
        let nudge = Arc::new(Notify::new());
        let (tx, latest) = watch::channel(None);

        let listener_task = task_id.clone();
        let listener_nudge = Arc::clone(&nudge);
        let subscription = realtime.subscribe(project_channel(&task_id), move |payload: &Value| {
            if let Some(update) = ProjectUpdate::from_payload(payload) {
                tracing::info!(
                    task_id = %listener_task,
                    status = %update.status,
                    message = update.message.as_deref().unwrap_or(""),
                    "Realtime project update",
                );
            }
            listener_nudge.notify_one();
        });

        let handle = tokio::spawn(watch_project(
            source,
            task_id.clone(),
            interval,
            nudge,
            tx,
            cancel.clone(),
            subscription,
        ));

        Self {
            task_id,
            latest,
            cancel,
            handle,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Receiver of every record fetched, `None` until the first success.
    pub fn updates(&self) -> watch::Receiver<Option<ProjectRecord>> {
        self.latest.clone()
    }

    /// Stop polling and release the realtime subscription.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the poll loop to end and return the last record seen.
    pub async fn finished(self) -> Option<ProjectRecord> {
        if let Err(e) = self.handle.await {
            tracing::error!(task_id = %self.task_id, error = %e, "Project watcher task failed");
        }
        let latest = self.latest.borrow().clone();
        latest
    }
}

async fn watch_project(
    source: Arc<dyn ProjectSource>,
    task_id: String,
    interval: Duration,
    nudge: Arc<Notify>,
    tx: watch::Sender<Option<ProjectRecord>>,
    cancel: CancellationToken,
    subscription: Subscription,
) {
    let mut ticker = new_ticker(interval);
    tracing::debug!(task_id = %task_id, interval_secs = interval.as_secs(), "Project watcher started");

    let mut wake = Wake::Start;
    loop {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = source.fetch_project(&task_id) => result,
        };

        match fetched {
            Ok(record) => {
                let status = record.status;
                tracing::debug!(task_id = %task_id, status = %status, ?wake, "Project fetched");
                tx.send_replace(Some(record));
                if status.is_terminal() {
                    tracing::info!(task_id = %task_id, status = %status, "Project finished");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Project fetch failed, retrying next tick");
            }
        }

        match next_wake(&mut ticker, &nudge, &cancel).await {
            Some(next) => wake = next,
            None => break,
        }
    }

    subscription.unsubscribe();
    tracing::debug!(task_id = %task_id, "Project watcher stopped");
}

// ---------------------------------------------------------------------------
// StatsWatcher
// ---------------------------------------------------------------------------

/// Keeps the aggregate project counts fresh until cancelled.
///
/// Re-fetches early whenever a `global` broadcast arrives (a project was
/// created or changed somewhere).
pub struct StatsWatcher {
    latest: watch::Receiver<Option<ProjectStats>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl StatsWatcher {
    pub fn spawn(
        source: Arc<dyn ProjectSource>,
        realtime: &RealtimeClient,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let nudge = Arc::new(Notify::new());
        let (tx, latest) = watch::channel(None);

        let listener_nudge = Arc::clone(&nudge);
        let subscription = realtime.subscribe(BROADCAST_CHANNEL, move |payload: &Value| {
            tracing::debug!(kind = payload["type"].as_str().unwrap_or(""), "Global update");
            listener_nudge.notify_one();
        });

        let handle = tokio::spawn(watch_stats(
            source,
            interval,
            nudge,
            tx,
            cancel.clone(),
            subscription,
        ));

        Self {
            latest,
            cancel,
            handle,
        }
    }

    pub fn updates(&self) -> watch::Receiver<Option<ProjectStats>> {
        self.latest.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn finished(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Stats watcher task failed");
        }
    }
}

async fn watch_stats(
    source: Arc<dyn ProjectSource>,
    interval: Duration,
    nudge: Arc<Notify>,
    tx: watch::Sender<Option<ProjectStats>>,
    cancel: CancellationToken,
    subscription: Subscription,
) {
    let mut ticker = new_ticker(interval);

    let mut wake = Wake::Start;
    loop {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = source.fetch_stats() => result,
        };

        match fetched {
            Ok(stats) => {
                tracing::debug!(total = stats.total_projects, ?wake, "Stats fetched");
                tx.send_replace(Some(stats));
            }
            Err(e) => tracing::warn!(error = %e, "Stats fetch failed, retrying next tick"),
        }

        match next_wake(&mut ticker, &nudge, &cancel).await {
            Some(next) => wake = next,
            None => break,
        }
    }

    subscription.unsubscribe();
}
