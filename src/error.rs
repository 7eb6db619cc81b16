//! Error types for the push stream client.
//!
//! Two distinct error shapes live here:
//!
//! - [`enum@Error`] is returned by setup-time APIs (configuration, builders).
//! - [`ErrorRecord`] describes runtime stream failures. It is never returned
//!   or thrown: the client emits it on the reserved `"error"` event channel,
//!   so consumers observe failures the same way they observe data.
//!
//! # Usage
//!
//! ```ignore
//! use push_stream::{EventClient, ErrorCode};
//!
//! client.on_error(|record| {
//!     if record.code == ErrorCode::MaxReconnectReached {
//!         eprintln!("giving up: {}", record.message);
//!     }
//! });
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Transport`], [`Error::Http`] |
//! | External | [`Error::Json`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::{TransportError, TransportErrorKind};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for setup-time operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid or incomplete.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Transport setup error.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport error.
        message: String,
    },

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a configuration error.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

// ============================================================================
// ErrorCode
// ============================================================================

/// Classification of a runtime stream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Transport failed to open or dropped. Triggers the reconnection policy.
    ConnectionFailed,
    /// A frame payload was not valid JSON. Local and non-fatal.
    ParseError,
    /// Transport reported an authentication failure.
    AuthError,
    /// Retry ceiling reached. Terminal until a manual `connect`/`reconnect`.
    MaxReconnectReached,
    /// Fallback.
    Unknown,
}

impl ErrorCode {
    /// Wire name of the code, e.g. `CONNECTION_FAILED`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::ParseError => "PARSE_ERROR",
            Self::AuthError => "AUTH_ERROR",
            Self::MaxReconnectReached => "MAX_RECONNECT_REACHED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns `true` if a failure with this code feeds the reconnection
    /// policy.
    ///
    /// `AUTH_ERROR` retries only when `retry_on_auth_error` is set.
    #[inline]
    #[must_use]
    pub const fn is_retryable(self, retry_on_auth_error: bool) -> bool {
        match self {
            Self::ConnectionFailed | Self::Unknown => true,
            Self::AuthError => retry_on_auth_error,
            Self::ParseError | Self::MaxReconnectReached => false,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TransportErrorKind> for ErrorCode {
    fn from(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Connection => Self::ConnectionFailed,
            TransportErrorKind::Auth => Self::AuthError,
            TransportErrorKind::Unknown => Self::Unknown,
        }
    }
}

// ============================================================================
// ErrorRecord
// ============================================================================

/// A runtime failure, delivered on the `"error"` event channel.
///
/// # Format
///
/// ```json
/// { "code": "CONNECTION_FAILED", "message": "connection refused" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Failure classification.
    pub code: ErrorCode,
    /// Human readable description.
    pub message: String,
}

impl ErrorRecord {
    /// Creates a new error record.
    #[inline]
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates a `CONNECTION_FAILED` record.
    #[inline]
    #[must_use]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    /// Creates a `PARSE_ERROR` record.
    #[inline]
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    /// Creates a `MAX_RECONNECT_REACHED` record.
    #[inline]
    #[must_use]
    pub fn max_reconnect_reached(max_attempts: u32) -> Self {
        Self::new(
            ErrorCode::MaxReconnectReached,
            format!("Max reconnect attempts ({max_attempts}) reached"),
        )
    }

    /// Reads a record back from an `"error"` channel payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload is not an error record.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Ok(Self::deserialize(value)?)
    }

    /// Converts the record into the JSON payload carried on the `"error"`
    /// channel.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code.as_str(),
            "message": self.message,
        })
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<&TransportError> for ErrorRecord {
    fn from(err: &TransportError) -> Self {
        Self::new(err.kind.into(), err.message.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_error_display() {
        let err = Error::config("transport is required");
        assert_eq!(err.to_string(), "Configuration error: transport is required");
        assert!(err.is_config_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(
            serde_json::to_value(ErrorCode::MaxReconnectReached).unwrap(),
            json!("MAX_RECONNECT_REACHED")
        );
        let code: ErrorCode = serde_json::from_value(json!("AUTH_ERROR")).unwrap();
        assert_eq!(code, ErrorCode::AuthError);
    }

    #[test]
    fn test_record_value_matches_serde() {
        let record = ErrorRecord::connection_failed("refused");
        assert_eq!(record.to_value(), serde_json::to_value(&record).unwrap());
        assert_eq!(
            record.to_value(),
            json!({ "code": "CONNECTION_FAILED", "message": "refused" })
        );
    }

    #[test]
    fn test_record_from_value() {
        let record = ErrorRecord::max_reconnect_reached(5);
        assert_eq!(ErrorRecord::from_value(&record.to_value()).unwrap(), record);

        let err = ErrorRecord::from_value(&json!({ "code": "NOPE" })).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorCode::ConnectionFailed.is_retryable(false));
        assert!(ErrorCode::Unknown.is_retryable(false));
        assert!(ErrorCode::AuthError.is_retryable(true));
        assert!(!ErrorCode::AuthError.is_retryable(false));
        assert!(!ErrorCode::ParseError.is_retryable(true));
        assert!(!ErrorCode::MaxReconnectReached.is_retryable(true));
    }

    #[test]
    fn test_record_from_transport_error() {
        let err = TransportError::auth("HTTP 401");
        let record = ErrorRecord::from(&err);
        assert_eq!(record.code, ErrorCode::AuthError);
        assert_eq!(record.message, "HTTP 401");
        assert_eq!(record.to_string(), "AUTH_ERROR: HTTP 401");
    }
}
