//! Connection tuning and the reconnect backoff

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Wait after the first failed connect
    pub initial_backoff_ms: u64,
    /// Upper bound for the wait between attempts
    pub max_backoff_ms: u64,
    pub backoff_multiplier: u32,
    /// Consecutive failures before `connect()` gives up. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Deadline for reading the auth code during onboarding
    pub auth_fetch_timeout_ms: u64,
    /// Keep resolved characteristics until the link goes down
    pub cache_characteristics: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2,
            max_attempts: None,
            auth_fetch_timeout_ms: 5_000,
            cache_characteristics: true,
        }
    }
}

impl ConnectionConfig {
    pub fn auth_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_fetch_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.backoff_multiplier,
        )
    }
}

/// Exponential backoff: initial, initial * m, initial * m^2, ... capped at max
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            multiplier: multiplier.max(1),
            current: initial,
        }
    }

    /// The wait that the next failure will use
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the wait for this failure and grow the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(self.multiplier)
            .map_or(self.max, |d| d.min(self.max));
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
