//! Stream transport layer.
//!
//! The client never talks to the network directly. It asks a
//! [`StreamTransport`] to open a persistent server-to-client stream and then
//! drives the returned [`TransportStream`]:
//!
//! ```text
//! ┌──────────────┐  open(OpenRequest)   ┌─────────────────┐
//! │ EventClient  │─────────────────────►│ StreamTransport │
//! │              │                      └────────┬────────┘
//! │              │◄── TransportSignal ───────────┤ Open / Frame / Error
//! │              │                               │
//! │              │── TransportHandle ───────────►│ add/remove listener, close
//! └──────────────┘                               ▼
//!                                          server push stream
//! ```
//!
//! # Signal Contract
//!
//! 1. Zero or one `Open`.
//! 2. Any number of `Frame`s, only for `"message"` and for event names with
//!    an attached listener.
//! 3. At most one terminal `Error`. Nothing follows it.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `memory` | Scripted in-process transport |
//! | `sse` | HTTP `text/event-stream` transport |

// ============================================================================
// Submodules
// ============================================================================

/// Scripted in-process transport.
pub mod memory;

/// HTTP `text/event-stream` transport.
pub mod sse;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;
use crate::protocol::Frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{MemoryStream, MemoryTransport};
pub use sse::SseTransport;

// ============================================================================
// OpenRequest
// ============================================================================

/// Parameters for opening one transport instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Stream endpoint.
    pub url: String,
    /// ID of the last frame received before a reconnect, for resumption.
    pub last_event_id: Option<String>,
}

impl OpenRequest {
    /// Creates a request for a fresh stream.
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            last_event_id: None,
        }
    }

    /// Sets the resume ID.
    #[inline]
    #[must_use]
    pub fn with_last_event_id(mut self, id: Option<String>) -> Self {
        self.last_event_id = id;
        self
    }

    /// Parses the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`](crate::Error::Url) if the endpoint is not an absolute URL.
    pub fn parse_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.url)?)
    }
}

// ============================================================================
// TransportError
// ============================================================================

/// Classification of a terminal transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Open failed or the stream dropped.
    Connection,
    /// Server rejected the credentials.
    Auth,
    /// Anything else.
    Unknown,
}

/// Terminal failure reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Failure classification.
    pub kind: TransportErrorKind,
    /// Description.
    pub message: String,
}

impl TransportError {
    /// Creates a connection error.
    #[inline]
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connection,
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    #[inline]
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Auth,
            message: message.into(),
        }
    }

    /// Creates an unclassified error.
    #[inline]
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Unknown,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

// ============================================================================
// TransportSignal
// ============================================================================

/// Notification from a transport instance to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// Stream is established.
    Open,
    /// A frame arrived.
    Frame(Frame),
    /// Stream failed. Terminal.
    Error(TransportError),
}

// ============================================================================
// Traits
// ============================================================================

/// Control surface of one open transport instance.
///
/// Methods are called with the client lock held and must not block.
pub trait TransportHandle: Send + Sync {
    /// Attaches the low-level listener for a named event.
    fn add_event_listener(&self, event: &str);

    /// Detaches the low-level listener for a named event.
    fn remove_event_listener(&self, event: &str);

    /// Closes the stream. No signals are delivered afterwards.
    fn close(&self);
}

/// Factory for transport instances.
pub trait StreamTransport: Send + Sync + 'static {
    /// Starts opening a stream. Must not block; progress is reported through
    /// the returned signal channel.
    fn open(&self, request: OpenRequest) -> TransportStream;
}

// ============================================================================
// TransportStream
// ============================================================================

/// One opened transport instance: its control handle plus its signal feed.
pub struct TransportStream {
    /// Control handle.
    pub handle: Box<dyn TransportHandle>,
    /// Signal feed.
    pub signals: mpsc::UnboundedReceiver<TransportSignal>,
}

impl TransportStream {
    /// Pairs a handle with its signal receiver.
    #[inline]
    #[must_use]
    pub fn new(
        handle: Box<dyn TransportHandle>,
        signals: mpsc::UnboundedReceiver<TransportSignal>,
    ) -> Self {
        Self { handle, signals }
    }
}

impl fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportStream").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;

    #[test]
    fn test_open_request_resume_id() {
        let request = OpenRequest::new("https://example.com/events");
        assert_eq!(request.last_event_id, None);

        let request = request.with_last_event_id(Some("9".to_string()));
        assert_eq!(request.last_event_id.as_deref(), Some("9"));
    }

    #[test]
    fn test_parse_url() {
        let url = OpenRequest::new("https://example.com/events?room=1")
            .parse_url()
            .unwrap();
        assert_eq!(url.host_str(), Some("example.com"));

        let err = OpenRequest::new("/relative").parse_url().unwrap_err();
        assert!(matches!(err, Error::Url(_)));
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            TransportError::auth("HTTP 401").to_string(),
            "Auth: HTTP 401"
        );
    }
}
