//! Builder for [`EventClient`] instances.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use push_stream::{EventClient, SseTransport};
//!
//! # fn example() -> push_stream::Result<()> {
//! let client = EventClient::builder()
//!     .transport(SseTransport::new())
//!     .max_reconnect_attempts(10)
//!     .reconnect_interval(Duration::from_millis(500))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::StreamTransport;

use super::config::ClientConfig;
use super::core::EventClient;

// ============================================================================
// EventClientBuilder
// ============================================================================

/// Builder for configuring an [`EventClient`].
///
/// Use [`EventClient::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct EventClientBuilder {
    /// Transport factory.
    transport: Option<Arc<dyn StreamTransport>>,
    /// Client options.
    config: ClientConfig,
}

impl fmt::Debug for EventClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventClientBuilder")
            .field("transport", &self.transport.is_some())
            .field("config", &self.config)
            .finish()
    }
}

// ============================================================================
// EventClientBuilder Implementation
// ============================================================================

impl EventClientBuilder {
    /// Creates a builder with default options and no transport.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transport factory.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl StreamTransport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets a shared transport factory.
    #[inline]
    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the retry ceiling.
    #[inline]
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the base retry delay.
    #[inline]
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// Sets the retry delay cap.
    #[inline]
    #[must_use]
    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.max_reconnect_delay = delay;
        self
    }

    /// Sets how long a connection must stay open to reset the failure streak.
    #[inline]
    #[must_use]
    pub fn stabilization_window(mut self, window: Duration) -> Self {
        self.config.stabilization_window = window;
        self
    }

    /// Sets whether authentication failures are retried.
    #[inline]
    #[must_use]
    pub fn retry_on_auth_error(mut self, retry: bool) -> Self {
        self.config.retry_on_auth_error = retry;
        self
    }

    /// Sets verbose per-frame logging.
    #[inline]
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Builds the client with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no transport is set
    /// - [`Error::Config`] if the options are inconsistent
    pub fn build(self) -> Result<EventClient> {
        let transport = self.transport.ok_or_else(|| {
            Error::config(
                "Transport is required. Use .transport() to set it.\n\
                 Example: EventClient::builder().transport(SseTransport::new())",
            )
        })?;

        self.config.validate()?;

        Ok(EventClient::with_shared_transport(transport, self.config))
    }
}

// ============================================================================
// Tests
// ============================================================================
