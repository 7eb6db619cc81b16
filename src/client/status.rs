//! Connection status and status-change broadcasting.
//!
//! # Lifecycle
//!
//! ```text
//!            connect()            open
//!   Idle ───────────────► Connecting ─────► Connected
//!    ▲                        │                 │
//!    │ disconnect()           │ error           │ error
//!    │ (from any state)       ▼                 ▼
//!    └──────────────────  Disconnected ◄────────┘
//!                             │    ▲
//!          retry scheduled    ▼    │ error
//!                         Reconnecting ──open──► Connected
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::identifiers::ObserverId;

use super::registry::call_isolated;

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Current state of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No connection requested.
    #[default]
    Idle,
    /// First transport of a `connect()` is opening.
    Connecting,
    /// Transport is open.
    Connected,
    /// Waiting for the backoff timer, or reopening after it fired.
    Reconnecting,
    /// Transport failed. A retry follows unless retries are exhausted.
    Disconnected,
}

impl ConnectionStatus {
    /// Lowercase name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        }
    }

    /// Returns `true` if the transport is open.
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` while a connection is being established.
    #[inline]
    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// StatusBroadcaster
// ============================================================================

/// Status observer callback.
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Observer registry notified of every status transition.
///
/// Transitions are numbered by the owner. A transition older than one
/// already delivered is dropped, so observers never see the status go back
/// in time when an observer re-enters the client.
#[derive(Default)]
pub struct StatusBroadcaster {
    observers: Mutex<Vec<(ObserverId, StatusCallback)>>,
    delivered: AtomicU64,
}

impl StatusBroadcaster {
    /// Creates an empty broadcaster.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer.
    pub fn subscribe(&self, callback: StatusCallback) -> ObserverId {
        let id = ObserverId::next();
        self.observers.lock().push((id, callback));
        id
    }

    /// Removes an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(observer, _)| *observer != id);
        observers.len() != before
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    /// Returns `true` if nobody observes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers transition number `seq` to every observer, once each.
    ///
    /// Delivery stops as soon as an observer causes a newer transition, so
    /// the remaining observers see only the newer status. Returns `false` if
    /// the transition was superseded before delivery started.
    pub fn notify(&self, seq: u64, status: ConnectionStatus) -> bool {
        if self.delivered.fetch_max(seq, Ordering::AcqRel) >= seq {
            trace!(seq, %status, "Skipping superseded status notification");
            return false;
        }

        let snapshot: Vec<StatusCallback> = self
            .observers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            if self.delivered.load(Ordering::Acquire) > seq {
                trace!(seq, %status, "Status superseded during delivery");
                break;
            }
            call_isolated("status", status.as_str(), || callback(status));
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
