//! Reconnection policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;

/// Configuration for reconnection behavior.
///
/// A `backoff_multiplier` of 1.0 gives a fixed delay between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Retry after failures.
    pub enabled: bool,
    /// Delay before the first retry.
    #[serde(rename = "delay_ms", with = "duration_ms")]
    pub delay: Duration,
    /// Maximum delay between attempts.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Maximum number of attempts (None = retry forever).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Fixed-delay policy.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: delay.max(Self::default().max_delay),
            ..Self::default()
        }
    }

    /// Calculate delay for the given attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        let delay_millis = self.delay.as_millis() as f64 * factor;
        if !delay_millis.is_finite() || delay_millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay.max(self.delay);
        }
        Duration::from_millis(delay_millis as u64)
    }

    /// Check if another attempt is allowed after `attempts_made` failures.
    #[must_use]
    pub const fn should_reconnect(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts_made < max,
            None => true,
        }
    }

    /// Switch retries on or off, optionally changing the base delay.
    pub fn set_enabled(&mut self, enabled: bool, delay: Option<Duration>) {
        self.enabled = enabled;
        if let Some(delay) = delay {
            self.delay = delay;
            self.max_delay = self.max_delay.max(delay);
        }
    }
}
