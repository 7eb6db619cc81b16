//! Client configuration.
//!
//! All options are fixed at construction time and optional.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use push_stream::ClientConfig;
//!
//! let config = ClientConfig::new()
//!     .with_max_reconnect_attempts(8)
//!     .with_reconnect_interval(Duration::from_millis(500))
//!     .with_debug();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default retry ceiling.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default base delay of the first retry.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default upper bound of any retry delay.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);

/// Default time a connection must stay open before its failure streak resets.
pub const DEFAULT_STABILIZATION_WINDOW: Duration = Duration::from_secs(3);

// ============================================================================
// ClientConfig
// ============================================================================

/// Construction-time options of an [`EventClient`](super::EventClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Consecutive failed reconnects tolerated before giving up.
    pub max_reconnect_attempts: u32,

    /// Base delay; doubles with every consecutive failure.
    pub reconnect_interval: Duration,

    /// Cap on any single retry delay.
    pub max_reconnect_delay: Duration,

    /// Uninterrupted open time after which the failure streak resets.
    pub stabilization_window: Duration,

    /// Whether `AUTH_ERROR` failures go through the reconnection policy.
    pub retry_on_auth_error: bool,

    /// Verbose per-frame logging.
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            stabilization_window: DEFAULT_STABILIZATION_WINDOW,
            retry_on_auth_error: true,
            debug: false,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientConfig {
    /// Sets the retry ceiling.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the base retry delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Sets the retry delay cap.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Sets the stabilization window.
    #[inline]
    #[must_use]
    pub fn with_stabilization_window(mut self, window: Duration) -> Self {
        self.stabilization_window = window;
        self
    }

    /// Sets whether authentication failures are retried.
    #[inline]
    #[must_use]
    pub fn with_retry_on_auth_error(mut self, retry: bool) -> Self {
        self.retry_on_auth_error = retry;
        self
    }

    /// Enables verbose logging.
    #[inline]
    #[must_use]
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the reconnect interval is zero or larger
    /// than the maximum reconnect delay.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_interval.is_zero() {
            return Err(Error::config("reconnect_interval must be greater than zero"));
        }

        if self.max_reconnect_delay < self.reconnect_interval {
            return Err(Error::config(format!(
                "max_reconnect_delay ({}ms) must not be smaller than reconnect_interval ({}ms)",
                self.max_reconnect_delay.as_millis(),
                self.reconnect_interval.as_millis()
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
