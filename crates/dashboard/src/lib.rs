//! Terminal dashboard for the app builder.
//!
//! Combines the REST client (source of truth) with realtime updates
//! (early re-fetch triggers) to follow build jobs as they progress.

pub mod config;
pub mod poller;
pub mod render;

pub use config::{ConfigError, DashboardConfig, LogFormat};
pub use poller::{ProjectSource, ProjectWatcher, StatsWatcher};
