//! Auto-reconnecting event client.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EventClient`] | Connection state machine and subscription surface |
//! | [`EventClientBuilder`] | Validating fluent builder |
//! | [`ClientConfig`] | Construction-time options |
//! | [`ReconnectPolicy`] | Backoff delay computation |
//! | [`ConnectionStatus`] | Lifecycle states |
//! | [`StatusBroadcaster`] | Status observer registry |
//! | [`ListenerRegistry`] | Event name to callback multiplexer |
//!
//! # Example
//!
//! ```ignore
//! use push_stream::{EventClient, SseTransport};
//!
//! # async fn example() -> push_stream::Result<()> {
//! let client = EventClient::builder()
//!     .transport(SseTransport::new())
//!     .build()?;
//!
//! client.on("update", |payload| println!("{payload}"));
//! client.connect("https://example.com/events");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Validating builder.
pub mod builder;

/// Client options.
pub mod config;

/// Connection state machine.
pub mod core;

/// Backoff delay computation.
pub mod policy;

/// Event multiplexer.
pub mod registry;

/// Connection status and its broadcaster.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::EventClientBuilder;
pub use config::ClientConfig;
pub use core::{EventClient, Listener, StatusObserver};
pub use policy::ReconnectPolicy;
pub use registry::{EventCallback, ListenerRegistry};
pub use status::{ConnectionStatus, StatusBroadcaster, StatusCallback};
