//! Exponential-backoff reconnection policy.
//!
//! [`ReconnectPolicy`] is a small state machine driven by the connection
//! manager: it is told when the connection opens, drops unexpectedly, or
//! a reconnection attempt fails, and answers with the delay to wait
//! before the next attempt. It never performs I/O itself; the manager
//! sleeps on the returned delay under the driver's cancellation token.

use std::time::Duration;

/// Shortest delay ever returned, so a zero `initial_delay` cannot spin.
pub const MIN_DELAY: Duration = Duration::from_millis(1);

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    ///
    /// Never below [`MIN_DELAY`], whatever is configured.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    ///
    /// Values below `1.0` are treated as `1.0` so delays never shrink.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait before reconnection attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay.min(self.max_delay).max(MIN_DELAY);
        for _ in 1..attempt {
            let next = next_delay(delay, self);
            if next == delay {
                break;
            }
            delay = next;
        }
        delay
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier.max(1.0)) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Where the policy stands relative to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    /// No connection has been attempted yet.
    Idle,
    /// Connected, no retry pending.
    Stable,
    /// Waiting for (or performing) reconnection attempt `attempt`.
    Retrying { attempt: u32 },
    /// Explicitly disconnected; no retries are scheduled.
    Suspended,
}

/// Reconnection state machine.
///
/// | From                 | Event                 | To                       |
/// |----------------------|-----------------------|--------------------------|
/// | `Idle`, `Retrying`   | open                  | `Stable`                 |
/// | `Stable`, `Idle`     | unexpected close      | `Retrying { 1 }`         |
/// | `Retrying { n }`     | attempt failed        | `Retrying { n + 1 }`     |
/// | any                  | disconnect            | `Suspended`              |
/// | `Suspended`          | resume                | `Idle`                   |
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    state: PolicyState,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: PolicyState::Idle,
        }
    }

    pub fn state(&self) -> PolicyState {
        self.state
    }

    /// The connection opened. Resets the attempt counter.
    ///
    /// Returns `false` (and stays put) while suspended.
    pub fn on_open(&mut self) -> bool {
        if self.state == PolicyState::Suspended {
            return false;
        }
        self.state = PolicyState::Stable;
        true
    }

    /// The connection dropped without [`on_disconnect`](Self::on_disconnect).
    ///
    /// Returns the delay before the first reconnection attempt, or `None`
    /// while suspended.
    pub fn on_unexpected_close(&mut self) -> Option<Duration> {
        match self.state {
            PolicyState::Suspended => None,
            PolicyState::Retrying { .. } => self.on_attempt_failed(),
            PolicyState::Idle | PolicyState::Stable => Some(self.retry(1)),
        }
    }

    /// A connection attempt failed.
    ///
    /// From `Retrying { n }` moves to `Retrying { n + 1 }`; a failed first
    /// connection (from `Idle`) starts at attempt 1. Attempts are not
    /// capped. Returns `None` while suspended.
    pub fn on_attempt_failed(&mut self) -> Option<Duration> {
        match self.state {
            PolicyState::Suspended => None,
            PolicyState::Retrying { attempt } => Some(self.retry(attempt.saturating_add(1))),
            PolicyState::Idle | PolicyState::Stable => Some(self.retry(1)),
        }
    }

    /// Explicit disconnect: stop retrying until [`resume`](Self::resume).
    pub fn on_disconnect(&mut self) {
        self.state = PolicyState::Suspended;
    }

    /// Leave `Suspended` ahead of a new explicit connect.
    pub fn resume(&mut self) {
        if self.state == PolicyState::Suspended {
            self.state = PolicyState::Idle;
        }
    }

    fn retry(&mut self, attempt: u32) -> Duration {
        self.state = PolicyState::Retrying { attempt };
        self.config.delay_for_attempt(attempt)
    }
}
