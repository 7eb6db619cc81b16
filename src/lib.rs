//! Push Stream - Resilient server push event client.
//!
//! This library consumes a persistent server-to-client event stream
//! (`text/event-stream` over HTTP) and keeps it alive across network
//! failures.
//!
//! # Architecture
//!
//! One [`EventClient`] owns one logical connection:
//!
//! - **Transport**: pluggable via [`StreamTransport`], with an HTTP
//!   ([`SseTransport`]) and an in-process ([`MemoryTransport`]) adapter
//! - **State machine**: `idle → connecting → connected`, with
//!   `disconnected → reconnecting` cycles on failure
//! - **Reconnection**: exponential backoff with jitter and a retry ceiling,
//!   reset once a connection stays up long enough
//! - **Multiplexing**: any number of callbacks per event name behind exactly
//!   one transport listener, re-attached on every new transport
//!
//! Failures are not returned from calls. They are published as
//! [`ErrorRecord`]s on the reserved `"error"` event channel.
//!
//! # Quick Start
//!
//! ```ignore
//! use push_stream::{EventClient, Result, SseTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = EventClient::builder()
//!         .transport(SseTransport::new())
//!         .max_reconnect_attempts(10)
//!         .build()?;
//!
//!     client.on("waiting-members-updated", |payload| {
//!         println!("members: {payload}");
//!     });
//!     client.on_error(|record| eprintln!("{record}"));
//!
//!     client.connect("https://example.com/sessions/42/events");
//!     tokio::signal::ctrl_c().await.ok();
//!     client.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`EventClient`], configuration, backoff, status, multiplexer |
//! | [`error`] | Error types, [`Result`] alias, [`ErrorRecord`] |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Frames and the `text/event-stream` decoder |
//! | [`subscription`] | Typed single-event view, [`EventSubscription`] |
//! | [`transport`] | Transport trait and adapters |

// ============================================================================
// Modules
// ============================================================================

/// Event client: state machine, configuration, backoff, multiplexer.
pub mod client;

/// Error types and result aliases.
///
/// Construction-time failures return [`Result<T>`] which uses [`Error`].
/// Runtime stream failures are [`ErrorRecord`]s.
pub mod error;

/// Type-safe identifiers for client entities.
pub mod identifiers;

/// Server push wire format.
pub mod protocol;

/// Typed single-event subscription facade.
pub mod subscription;

/// Stream transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    ClientConfig, ConnectionStatus, EventCallback, EventClient, EventClientBuilder, Listener,
    ReconnectPolicy, StatusObserver,
};

// Error types
pub use error::{Error, ErrorCode, ErrorRecord, Result};

// Identifier types
pub use identifiers::{ListenerId, ObserverId, TransportId};

// Protocol types
pub use protocol::{ERROR_EVENT, Frame, FrameDecoder, LineTooLong, MESSAGE_EVENT};

// Subscription types
pub use subscription::{EventSubscription, SubscriptionOptions, SubscriptionState};

// Transport types
pub use transport::{
    MemoryStream, MemoryTransport, OpenRequest, SseTransport, StreamTransport, TransportError,
    TransportErrorKind, TransportHandle, TransportSignal, TransportStream,
};
