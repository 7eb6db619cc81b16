//! Typed single-event subscription with a reactive state view.
//!
//! [`EventSubscription`] owns at most one [`EventClient`] at a time. It
//! subscribes that client to one event name plus the error channel, decodes
//! payloads into `T`, and publishes a [`SubscriptionState`] snapshot through a
//! [`tokio::sync::watch`] channel.
//!
//! # Lifecycle
//!
//! | Trigger | Effect |
//! |---------|--------|
//! | `enabled = false` | No client exists |
//! | `enabled = true` | Fresh client, subscribed and connected to `url` |
//! | `url`, event name, `enabled` or config change | Old client torn down, then a new one (if enabled) |
//! | `reconnect()` | `data` and `error` cleared, connection restarted |
//! | `disconnect()` | Client idles, subscriptions kept |
//! | drop | Old client torn down |
//!
//! Tearing down removes the client's subscriptions first, then disconnects
//! it, so a torn-down client can never write into the state again.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use push_stream::{EventSubscription, SseTransport, SubscriptionOptions};
//!
//! #[derive(Clone, serde::Deserialize)]
//! struct Members {
//!     #[serde(rename = "participantCount")]
//!     participant_count: u32,
//! }
//!
//! let subscription: EventSubscription<Members> = EventSubscription::new(
//!     Arc::new(SseTransport::new()),
//!     SubscriptionOptions::new("https://example.com/events", "waiting-members-updated"),
//! );
//!
//! let mut view = subscription.watch();
//! while view.changed().await.is_ok() {
//!     let state = view.borrow_and_update().clone();
//!     println!("{} members, {}", state.data.map_or(0, |m| m.participant_count), state.status);
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::client::{ClientConfig, ConnectionStatus, EventClient, Listener, StatusObserver};
use crate::error::{ErrorCode, ErrorRecord};
use crate::transport::StreamTransport;

// ============================================================================
// SubscriptionOptions
// ============================================================================

/// What an [`EventSubscription`] connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Stream endpoint.
    pub url: String,
    /// Event name whose payloads populate `data`.
    pub event_name: String,
    /// Whether a client should exist at all.
    pub enabled: bool,
    /// Options for each client created.
    pub config: ClientConfig,
}

impl SubscriptionOptions {
    /// Creates enabled options with the default client configuration.
    #[must_use]
    pub fn new(url: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            event_name: event_name.into(),
            enabled: true,
            config: ClientConfig::new(),
        }
    }

    /// Sets whether the subscription is enabled.
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the client configuration.
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }
}

// ============================================================================
// SubscriptionState
// ============================================================================

/// Snapshot of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionState<T> {
    /// Most recent payload that decoded as `T`.
    pub data: Option<T>,
    /// Status of the current client, `idle` when there is none.
    pub status: ConnectionStatus,
    /// Most recent error record.
    pub error: Option<ErrorRecord>,
}

impl<T> Default for SubscriptionState<T> {
    fn default() -> Self {
        Self {
            data: None,
            status: ConnectionStatus::Idle,
            error: None,
        }
    }
}

// ============================================================================
// EventSubscription
// ============================================================================

/// Live client bound to the subscription, with its registrations.
struct Binding {
    client: EventClient,
    listeners: Vec<Listener>,
    observer: StatusObserver,
}

/// Typed view over one event of a push stream.
///
/// Must be used from within a tokio runtime while enabled.
pub struct EventSubscription<T> {
    transport: Arc<dyn StreamTransport>,
    options: SubscriptionOptions,
    state: Arc<watch::Sender<SubscriptionState<T>>>,
    /// Bumped on every teardown; callbacks of older bindings become no-ops.
    generation: Arc<AtomicU64>,
    binding: Option<Binding>,
}

impl<T> fmt::Debug for EventSubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("options", &self.options)
            .field("active", &self.binding.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> EventSubscription<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Creates the subscription and, if enabled, connects.
    pub fn new(transport: Arc<dyn StreamTransport>, options: SubscriptionOptions) -> Self {
        let (state, _) = watch::channel(SubscriptionState::default());
        let mut subscription = Self {
            transport,
            options,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            binding: None,
        };
        subscription.bind();
        subscription
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Current snapshot.
    #[must_use]
    pub fn state(&self) -> SubscriptionState<T> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SubscriptionState<T>> {
        self.state.subscribe()
    }

    /// Most recent decoded payload.
    #[must_use]
    pub fn data(&self) -> Option<T> {
        self.state.borrow().data.clone()
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    /// Most recent error record.
    #[must_use]
    pub fn error(&self) -> Option<ErrorRecord> {
        self.state.borrow().error.clone()
    }

    /// Current options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &SubscriptionOptions {
        &self.options
    }

    /// Returns `true` if a client currently exists.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.binding.is_some()
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    /// Enables or disables the subscription.
    pub fn set_enabled(&mut self, enabled: bool) {
        let options = SubscriptionOptions {
            enabled,
            ..self.options.clone()
        };
        self.update(options);
    }

    /// Points the subscription at another endpoint.
    pub fn set_url(&mut self, url: impl Into<String>) {
        let options = SubscriptionOptions {
            url: url.into(),
            ..self.options.clone()
        };
        self.update(options);
    }

    /// Applies new options. Any change replaces the client.
    pub fn update(&mut self, options: SubscriptionOptions) {
        if options == self.options {
            return;
        }
        self.unbind();
        self.options = options;
        self.bind();
    }

    /// Clears `data` and `error` and restarts the connection with a fresh
    /// retry budget.
    pub fn reconnect(&mut self) {
        self.state.send_modify(|state| {
            state.data = None;
            state.error = None;
        });

        match &self.binding {
            Some(binding) => {
                binding.client.disconnect();
                binding.client.connect(self.options.url.clone());
            }
            None => debug!("Reconnect ignored, subscription disabled"),
        }
    }

    /// Disconnects the client, keeping its subscriptions for a later
    /// [`reconnect`](Self::reconnect).
    pub fn disconnect(&mut self) {
        if let Some(binding) = &self.binding {
            binding.client.disconnect();
        }
    }

    // ------------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------------

    fn bind(&mut self) {
        if !self.options.enabled {
            return;
        }

        let generation = self.generation.load(Ordering::Acquire);
        let client = EventClient::with_shared_transport(
            Arc::clone(&self.transport),
            self.options.config.clone(),
        );

        self.state.send_modify(|state| {
            state.data = None;
            state.error = None;
        });

        let observer = {
            let state = Arc::clone(&self.state);
            let current = Arc::clone(&self.generation);
            client.on_status_change(move |status| {
                if current.load(Ordering::Acquire) != generation {
                    return;
                }
                state.send_modify(|state| {
                    state.status = status;
                    if status == ConnectionStatus::Connecting {
                        state.error = None;
                    }
                });
            })
        };

        let data = {
            let state = Arc::clone(&self.state);
            let current = Arc::clone(&self.generation);
            let event = self.options.event_name.clone();
            client.on(&self.options.event_name, move |value| {
                if current.load(Ordering::Acquire) != generation {
                    return;
                }
                match T::deserialize(value) {
                    Ok(data) => state.send_modify(|state| state.data = Some(data)),
                    Err(e) => {
                        warn!(event = %event, error = %e, "Payload does not match the expected shape");
                        let record = ErrorRecord::new(
                            ErrorCode::ParseError,
                            format!("Failed to decode '{event}' payload: {e}"),
                        );
                        state.send_modify(|state| state.error = Some(record));
                    }
                }
            })
        };

        let errors = {
            let state = Arc::clone(&self.state);
            let current = Arc::clone(&self.generation);
            client.on_error(move |record| {
                if current.load(Ordering::Acquire) != generation {
                    return;
                }
                let record = record.clone();
                state.send_modify(|state| state.error = Some(record));
            })
        };

        debug!(
            url = %self.options.url,
            event = %self.options.event_name,
            "Subscription bound"
        );
        client.connect(self.options.url.clone());

        self.binding = Some(Binding {
            client,
            listeners: vec![data, errors],
            observer,
        });
    }

    fn unbind(&mut self) {
        teardown(self.binding.take(), &self.generation);
        self.state.send_modify(|state| state.status = ConnectionStatus::Idle);
    }
}

/// Removes a binding's registrations, then disconnects its client.
fn teardown(binding: Option<Binding>, generation: &AtomicU64) {
    let Some(binding) = binding else {
        return;
    };
    generation.fetch_add(1, Ordering::AcqRel);

    for listener in &binding.listeners {
        listener.unsubscribe();
    }
    binding.observer.unsubscribe();
    binding.client.disconnect();
    debug!("Subscription torn down");
}

impl<T> Drop for EventSubscription<T> {
    fn drop(&mut self) {
        teardown(self.binding.take(), &self.generation);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::TransportError;
    use crate::transport::memory::MemoryTransport;

    const URL: &str = "memory://session/42";
    const EVENT: &str = "waiting-members-updated";

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Members {
        #[serde(rename = "participantCount")]
        participant_count: u32,
        members: Vec<String>,
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn subscribe(options: SubscriptionOptions) -> (MemoryTransport, EventSubscription<Members>) {
        let transport = MemoryTransport::new();
        let subscription = EventSubscription::new(Arc::new(transport.clone()), options);
        (transport, subscription)
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_creates_no_client() {
        let (transport, mut subscription) =
            subscribe(SubscriptionOptions::new(URL, EVENT).with_enabled(false));

        assert!(!subscription.is_active());
        assert_eq!(transport.open_count(), 0);
        assert_eq!(subscription.status(), ConnectionStatus::Idle);

        subscription.set_enabled(true);
        assert!(subscription.is_active());
        assert_eq!(transport.open_count(), 1);
        assert_eq!(subscription.status(), ConnectionStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_follows_latest_payload() {
        let (transport, subscription) = subscribe(SubscriptionOptions::new(URL, EVENT));
        let stream = transport.last().unwrap();
        assert_eq!(stream.listened_events(), vec![EVENT]);

        stream.open();
        stream.send(EVENT, r#"{"participantCount":3,"members":[]}"#);
        stream.send(EVENT, r#"{"participantCount":4,"members":["ana"]}"#);
        settle().await;

        let state = subscription.state();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(
            state.data,
            Some(Members {
                participant_count: 4,
                members: vec!["ana".to_string()],
            })
        );
        assert_eq!(state.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_payload_sets_parse_error() {
        let (transport, subscription) = subscribe(SubscriptionOptions::new(URL, EVENT));
        let stream = transport.last().unwrap();
        stream.open();
        stream.send(EVENT, r#"{"participantCount":3,"members":[]}"#);
        stream.send(EVENT, r#"{"participantCount":"many"}"#);
        settle().await;

        assert_eq!(subscription.error().map(|e| e.code), Some(ErrorCode::ParseError));
        assert_eq!(subscription.data().map(|d| d.participant_count), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_sets_error() {
        let (transport, subscription) = subscribe(SubscriptionOptions::new(URL, EVENT));
        transport.last().unwrap().open();
        settle().await;

        transport
            .last()
            .unwrap()
            .fail(TransportError::connection("network lost"));
        settle().await;

        assert_eq!(
            subscription.error().map(|e| e.code),
            Some(ErrorCode::ConnectionFailed)
        );
        assert_eq!(subscription.status(), ConnectionStatus::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_change_replaces_client() {
        let (transport, mut subscription) = subscribe(SubscriptionOptions::new(URL, EVENT));
        let old = transport.last().unwrap();
        old.open();
        settle().await;

        subscription.set_url("memory://session/43");

        assert!(old.is_closed());
        assert_eq!(old.listener_count(EVENT), 0);
        assert_eq!(transport.open_count(), 2);
        assert_eq!(transport.last().unwrap().request().url, "memory://session/43");
        assert_eq!(subscription.status(), ConnectionStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_options_keep_client() {
        let (transport, mut subscription) = subscribe(SubscriptionOptions::new(URL, EVENT));
        subscription.set_url(URL);
        subscription.set_enabled(true);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_tears_down() {
        let (transport, mut subscription) = subscribe(SubscriptionOptions::new(URL, EVENT));
        let stream = transport.last().unwrap();
        stream.open();
        settle().await;

        subscription.set_enabled(false);

        assert!(stream.is_closed());
        assert!(!subscription.is_active());
        assert_eq!(subscription.status(), ConnectionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_clears_state() {
        let (transport, mut subscription) = subscribe(SubscriptionOptions::new(URL, EVENT));
        let stream = transport.last().unwrap();
        stream.open();
        stream.send(EVENT, r#"{"participantCount":3,"members":[]}"#);
        stream.send(EVENT, "{}");
        settle().await;
        assert!(subscription.data().is_some());
        assert!(subscription.error().is_some());

        subscription.reconnect();

        assert_eq!(subscription.data(), None);
        assert_eq!(subscription.error(), None);
        assert_eq!(transport.open_count(), 2);
        assert!(stream.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_then_reconnect_resumes() {
        let (transport, mut subscription) = subscribe(SubscriptionOptions::new(URL, EVENT));
        transport.last().unwrap().open();
        settle().await;

        subscription.disconnect();
        assert_eq!(subscription.status(), ConnectionStatus::Idle);
        assert!(subscription.is_active());

        subscription.reconnect();
        let stream = transport.last().unwrap();
        assert_eq!(stream.listened_events(), vec![EVENT]);
        stream.open();
        stream.send(EVENT, r#"{"participantCount":1,"members":[]}"#);
        settle().await;

        assert_eq!(subscription.data().map(|d| d.participant_count), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_sees_updates() {
        let (transport, subscription) = subscribe(SubscriptionOptions::new(URL, EVENT));
        let mut view = subscription.watch();
        assert!(!view.has_changed().unwrap());

        transport.last().unwrap().open();
        settle().await;

        assert!(view.has_changed().unwrap());
        assert_eq!(view.borrow_and_update().status, ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_tears_down() {
        let (transport, subscription) = subscribe(SubscriptionOptions::new(URL, EVENT));
        let stream = transport.last().unwrap();
        stream.open();
        settle().await;

        drop(subscription);

        assert!(stream.is_closed());
        assert_eq!(stream.listener_count(EVENT), 0);
    }
}
