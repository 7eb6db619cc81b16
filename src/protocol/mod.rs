//! Server push wire format.
//!
//! The client consumes, and never produces, a stream of discrete frames.
//! Each frame carries an optional event name and a UTF-8 JSON payload.
//!
//! # Frame Routing
//!
//! | Frame | Channel |
//! |-------|---------|
//! | `event: name` + `data:` | `name` |
//! | `data:` only | `"message"` |
//! | client-side failures | `"error"` (reserved, never sent by servers) |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `decoder` | Incremental `text/event-stream` decoder |
//! | `frame` | Decoded frame type and reserved channel names |

// ============================================================================
// Submodules
// ============================================================================

/// Incremental `text/event-stream` decoder.
pub mod decoder;

/// Decoded frame type.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use decoder::{DEFAULT_MAX_LINE_LENGTH, FrameDecoder, LineTooLong};
pub use frame::{ERROR_EVENT, Frame, MESSAGE_EVENT, is_reserved_event};
