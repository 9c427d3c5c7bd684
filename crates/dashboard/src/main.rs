//! `launchpad-dashboard` -- follow app-builder jobs from the terminal.
//!
//! With task IDs on the command line, watches those projects until each
//! one completes or fails. Without arguments, watches the aggregate
//! stats and the five most recent projects until Ctrl-C.
//!
//! See [`DashboardConfig::from_env`] for environment variables.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use launchpad_client::ProjectsApi;
use launchpad_core::project::ProjectFilter;
use launchpad_dashboard::{
    render, DashboardConfig, LogFormat, ProjectSource, ProjectWatcher, StatsWatcher,
};
use launchpad_realtime::{ConnectionEvent, RealtimeClient};

/// Projects watched when no task IDs are given.
const RECENT_PROJECTS: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = DashboardConfig::from_env()?;
    init_tracing(config.log_format);

    let task_ids: Vec<String> = std::env::args().skip(1).collect();
    let follow_recent = task_ids.is_empty();

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        poll_interval_secs = config.poll_interval.as_secs(),
        "Starting launchpad-dashboard",
    );

    let api = ProjectsApi::new(&config.api_url);
    match api.health().await {
        Ok(health) => tracing::info!(
            status = %health.status,
            version = %health.version,
            github = health.github_configured,
            gemini = health.gemini_configured,
            "Backend reachable",
        ),
        Err(e) => tracing::warn!(error = %e, "Backend health check failed"),
    }

    let realtime = RealtimeClient::websocket(&config.ws_url, config.reconnect.clone());
    tokio::spawn(log_connection_events(realtime.clone()));
    realtime.connect();

    let task_ids = if follow_recent {
        let recent = api.get_projects(&ProjectFilter::recent(RECENT_PROJECTS)).await?;
        recent.projects.into_iter().map(|p| p.task_id).collect()
    } else {
        task_ids
    };

    let source: Arc<dyn ProjectSource> = Arc::new(api);
    let cancel = CancellationToken::new();

    let stats = follow_recent.then(|| {
        let watcher = StatsWatcher::spawn(
            Arc::clone(&source),
            &realtime,
            config.poll_interval,
            cancel.clone(),
        );
        tokio::spawn(print_changes(watcher.updates(), render::stats_line));
        watcher
    });

    let watchers: Vec<ProjectWatcher> = task_ids
        .iter()
        .map(|task_id| {
            let watcher = ProjectWatcher::spawn(
                Arc::clone(&source),
                &realtime,
                task_id.as_str(),
                config.poll_interval,
                cancel.clone(),
            );
            tokio::spawn(print_changes(watcher.updates(), render::project_line));
            watcher
        })
        .collect();

    let all_done = join_all(watchers.into_iter().map(ProjectWatcher::finished));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Interrupted, shutting down");
        }
        _ = all_done, if !follow_recent => {
            tracing::info!("All watched projects finished");
        }
    }

    cancel.cancel();
    if let Some(stats) = stats {
        stats.finished().await;
    }
    realtime.disconnect();

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "launchpad_dashboard=info,launchpad_realtime=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the rendered status lines.
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Print a line every time the watched value changes.
async fn print_changes<T>(mut rx: watch::Receiver<Option<T>>, render: impl Fn(&T) -> String) {
    loop {
        if let Some(value) = rx.borrow_and_update().as_ref() {
            println!("{}", render(value));
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

async fn log_connection_events(realtime: RealtimeClient) {
    let mut events = realtime.events();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Connection event log lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ConnectionEvent::Connected { replayed, .. } => {
                tracing::info!(replayed, "Realtime connected");
            }
            ConnectionEvent::Disconnected { reason, .. } => {
                tracing::warn!(reason = %reason, "Realtime connection lost, falling back to polling");
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Realtime reconnect scheduled");
            }
            ConnectionEvent::Suspended => break,
        }
    }
}
