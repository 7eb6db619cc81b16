//! Reconnection policy.
//!
//! Pure delay computation, exponential growth with jitter and a cap:
//!
//! ```text
//! delay = min(base * 2^(attempt - 1) * jitter, max_delay)
//! jitter ∈ [0.75, 1.25), uniform per attempt
//! ```
//!
//! Attempts are 1-indexed: `attempt` is the number of the retry about to be
//! made. Attempts beyond `max_attempts` are refused.

// ============================================================================
// Imports
// ============================================================================

use std::ops::Range;
use std::time::Duration;

use rand::Rng;

use super::config::ClientConfig;

// ============================================================================
// Constants
// ============================================================================

/// Range the jitter factor is drawn from.
pub const JITTER_RANGE: Range<f64> = 0.75..1.25;

/// Exponent beyond which the delay is saturated anyway.
const MAX_EXPONENT: u32 = 64;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Exponential backoff with jitter and a retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Highest attempt number that is still scheduled.
    pub max_attempts: u32,
    /// Delay of the first attempt before jitter.
    pub base_interval: Duration,
    /// Cap on any delay.
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(max_attempts: u32, base_interval: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_interval,
            max_delay,
        }
    }

    /// Creates the policy described by a client configuration.
    #[inline]
    #[must_use]
    pub const fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.max_reconnect_attempts,
            config.reconnect_interval,
            config.max_reconnect_delay,
        )
    }

    /// Returns `true` if `attempt` exceeds the retry ceiling.
    #[inline]
    #[must_use]
    pub const fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }

    /// Delay for `attempt` without jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, 1.0)
    }

    /// Delay for `attempt` with an explicit jitter factor.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT) as i32;
        let secs = self.base_interval.as_secs_f64() * 2f64.powi(exponent) * jitter;
        Duration::try_from_secs_f64(secs)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay for `attempt` with a freshly drawn jitter factor.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_RANGE);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay for `attempt`, or `None` if the ceiling has been reached.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (!self.is_exhausted(attempt)).then(|| self.delay(attempt))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::new())
    }
}

// ============================================================================
// Tests
// ============================================================================
