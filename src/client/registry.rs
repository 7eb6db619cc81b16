//! Event multiplexer: subscriber registry plus transport listener bookkeeping.
//!
//! Two pieces of state live side by side:
//!
//! - **subscribers** map an event name to its callbacks, in registration
//!   order. Survives transport replacement.
//! - **attached** is the set of names that have a low-level listener on the
//!   *current* transport. Cleared whenever a transport is replaced and
//!   rebuilt from the subscriber keys.
//!
//! The reserved `"message"` and `"error"` channels never get a per-name
//! listener: the transport always delivers `"message"`, and `"error"` is fed
//! by the client itself.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::error;

use crate::identifiers::ListenerId;
use crate::protocol::is_reserved_event;
use crate::transport::TransportHandle;

// ============================================================================
// Types
// ============================================================================

/// Event callback. Receives the parsed JSON payload of a frame.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

// ============================================================================
// ListenerRegistry
// ============================================================================

/// Subscriber registry with one-listener-per-name transport bookkeeping.
#[derive(Default)]
pub struct ListenerRegistry {
    /// Callbacks per event name.
    subscribers: FxHashMap<String, Vec<(ListenerId, EventCallback)>>,
    /// Names with a listener on the current transport.
    attached: FxHashSet<String>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback for `event`.
    ///
    /// Adding the same `Arc` twice is a no-op that returns the original ID,
    /// so the callback still runs once per frame.
    pub fn add(&mut self, event: &str, callback: EventCallback) -> ListenerId {
        let entries = self.subscribers.entry(event.to_string()).or_default();

        if let Some((id, _)) = entries
            .iter()
            .find(|(_, existing)| ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&callback)))
        {
            return *id;
        }

        let id = ListenerId::next();
        entries.push((id, callback));
        id
    }

    /// Removes one callback.
    ///
    /// Returns `true` if `event` has no callbacks left afterwards and was
    /// dropped from the registry.
    pub fn remove(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(entries) = self.subscribers.get_mut(event) else {
            return false;
        };

        entries.retain(|(existing, _)| *existing != id);

        if entries.is_empty() {
            self.subscribers.remove(event);
            return true;
        }
        false
    }

    /// Removes every callback for `event`. Returns `true` if any existed.
    pub fn remove_all(&mut self, event: &str) -> bool {
        self.subscribers.remove(event).is_some()
    }

    /// Snapshot of the callbacks for `event`, in registration order.
    #[must_use]
    pub fn callbacks(&self, event: &str) -> Vec<EventCallback> {
        self.subscribers
            .get(event)
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    /// Number of callbacks registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.subscribers.get(event).map_or(0, Vec::len)
    }

    /// Names with at least one callback.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.subscribers.keys().cloned().collect()
    }

    /// Returns `true` if `event` has a listener on the current transport.
    #[must_use]
    pub fn is_attached(&self, event: &str) -> bool {
        self.attached.contains(event)
    }

    /// Attaches the listener for `event` unless it is reserved, has no
    /// callbacks, or is already attached. Returns `true` if attached now.
    pub fn attach(&mut self, event: &str, handle: &dyn TransportHandle) -> bool {
        if is_reserved_event(event)
            || !self.subscribers.contains_key(event)
            || self.attached.contains(event)
        {
            return false;
        }

        handle.add_event_listener(event);
        self.attached.insert(event.to_string());
        true
    }

    /// Forgets the previous transport's listeners and attaches one listener
    /// per subscribed name to `handle`. Returns the number attached.
    pub fn attach_all(&mut self, handle: &dyn TransportHandle) -> usize {
        self.attached.clear();
        self.event_names()
            .iter()
            .filter(|event| self.attach(event, handle))
            .count()
    }

    /// Detaches the listener for `event` if one is attached.
    pub fn detach(&mut self, event: &str, handle: Option<&dyn TransportHandle>) {
        if self.attached.remove(event)
            && let Some(handle) = handle
        {
            handle.remove_event_listener(event);
        }
    }

    /// Forgets every attached listener without touching any transport.
    pub fn clear_attached(&mut self) {
        self.attached.clear();
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Invokes each callback once with `payload`. A panicking callback is logged
/// and does not stop the others. Returns the number that completed.
pub fn dispatch(callbacks: &[EventCallback], event: &str, payload: &Value) -> usize {
    callbacks
        .iter()
        .filter(|callback| call_isolated("event", event, || callback(payload)))
        .count()
}

/// Runs a user callback, catching and logging a panic.
pub(crate) fn call_isolated(kind: &str, name: &str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            error!(kind, name, panic = %panic_message(payload.as_ref()), "Callback panicked");
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

// ============================================================================
// Tests
// ============================================================================
