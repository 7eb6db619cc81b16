//! Decoded server push frame.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

// ============================================================================
// Constants
// ============================================================================

/// Event name of frames sent without an `event:` field.
pub const MESSAGE_EVENT: &str = "message";

/// Reserved event name on which the client emits error records.
pub const ERROR_EVENT: &str = "error";

// ============================================================================
// Frame
// ============================================================================

/// One discrete message delivered by a transport.
///
/// # Wire Format
///
/// ```text
/// event: waiting-members-updated
/// id: 42
/// data: {"participantCount":3,"members":[]}
///
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event name. `"message"` when the frame carried no event tag.
    pub event: String,

    /// Raw payload. Multiple `data:` lines are joined with `\n`.
    pub data: String,

    /// Last event ID in effect when this frame was dispatched.
    pub id: Option<String>,
}

impl Frame {
    /// Creates a named frame.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }

    /// Creates an unnamed frame on the default `"message"` channel.
    #[inline]
    #[must_use]
    pub fn message(data: impl Into<String>) -> Self {
        Self::new(MESSAGE_EVENT, data)
    }

    /// Sets the event ID.
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Returns `true` if the frame is on the default `"message"` channel.
    #[inline]
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.event == MESSAGE_EVENT
    }

    /// Parses the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the payload is malformed.
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.data)
    }
}

/// Returns `true` for event names handled by built-in transport handlers
/// rather than a per-name listener.
#[inline]
#[must_use]
pub fn is_reserved_event(name: &str) -> bool {
    name == MESSAGE_EVENT || name == ERROR_EVENT
}

// ============================================================================
// Tests
// ============================================================================
