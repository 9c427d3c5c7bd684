use std::time::Duration;

use launchpad_realtime::ReconnectConfig;

/// Default HTTP base URL of the builder backend.
const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default seconds between polling re-fetches.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Dashboard configuration loaded from environment variables.
///
/// All fields have defaults suitable for a backend running locally.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// HTTP base URL of the builder API (no trailing slash).
    pub api_url: String,
    /// WebSocket endpoint for realtime updates.
    pub ws_url: String,
    /// Interval between polling re-fetches.
    pub poll_interval: Duration,
    /// Backoff used by the realtime connection.
    pub reconnect: ReconnectConfig,
    pub log_format: LogFormat,
}

impl DashboardConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default                                  |
    /// |------------------------|------------------------------------------|
    /// | `LAUNCHPAD_API_URL`    | `http://localhost:8000`                  |
    /// | `LAUNCHPAD_WS_URL`     | API URL with `ws`/`wss` scheme + `/ws`   |
    /// | `POLL_INTERVAL_SECS`   | `5`                                      |
    /// | `RECONNECT_INITIAL_MS` | `1000`                                   |
    /// | `RECONNECT_MAX_MS`     | `30000`                                  |
    /// | `LOG_FORMAT`           | `text` (or `json`)                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("LAUNCHPAD_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.into())
            .trim_end_matches('/')
            .to_string();

        let ws_url = match lookup("LAUNCHPAD_WS_URL") {
            Some(url) => url,
            None => derive_ws_url(&api_url)?,
        };

        let poll_secs: u64 = parse_var(&lookup, "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_SECS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let defaults = ReconnectConfig::default();
        let initial_ms: u64 = parse_var(
            &lookup,
            "RECONNECT_INITIAL_MS",
            defaults.initial_delay.as_millis() as u64,
        )?;
        let max_ms: u64 = parse_var(
            &lookup,
            "RECONNECT_MAX_MS",
            defaults.max_delay.as_millis() as u64,
        )?;
        if initial_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "RECONNECT_INITIAL_MS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if max_ms < initial_ms {
            return Err(ConfigError::Invalid {
                var: "RECONNECT_MAX_MS",
                value: max_ms.to_string(),
                reason: format!("must not be below RECONNECT_INITIAL_MS ({initial_ms})"),
            });
        }

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.into(),
                    reason: "expected `text` or `json`".into(),
                })
            }
        };

        Ok(Self {
            api_url,
            ws_url,
            poll_interval: Duration::from_secs(poll_secs),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms),
                ..defaults
            },
            log_format,
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

/// `http://host:8000` becomes `ws://host:8000/ws`, `https` becomes `wss`.
fn derive_ws_url(api_url: &str) -> Result<String, ConfigError> {
    let rest = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ConfigError::Invalid {
            var: "LAUNCHPAD_API_URL",
            value: api_url.into(),
            reason: "expected an http:// or https:// URL".into(),
        });
    };
    Ok(format!("{rest}/ws"))
}
