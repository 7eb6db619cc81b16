//! Connection state machine.
//!
//! [`EventClient`] owns at most one live transport, the subscriber registry,
//! and the reconnect and stabilization timers.
//!
//! # Locking
//!
//! All state sits behind one mutex. User callbacks never run while it is
//! held: each operation records the notifications it produces and delivers
//! them after unlocking, so callbacks may freely call back into the client.
//!
//! # Transport Identity
//!
//! Every opened transport gets a fresh [`TransportId`]. The pump task that
//! drains a transport's signals tags them with that ID; signals of a retired
//! transport are dropped. Retiring the current transport (on `disconnect()`,
//! on failure, on drop) is what marks its close as intentional.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::ErrorRecord;
use crate::identifiers::{ListenerId, ObserverId, TransportId};
use crate::protocol::{ERROR_EVENT, Frame};
use crate::transport::{
    OpenRequest, StreamTransport, TransportError, TransportHandle, TransportSignal,
    TransportStream,
};

use super::builder::EventClientBuilder;
use super::config::ClientConfig;
use super::policy::ReconnectPolicy;
use super::registry::{EventCallback, ListenerRegistry, dispatch};
use super::status::{ConnectionStatus, StatusBroadcaster, StatusCallback};

// ============================================================================
// Types
// ============================================================================

/// Notification produced under the lock, delivered after it is released.
enum Notice {
    /// Status transition number and new status.
    Status(u64, ConnectionStatus),
    /// Record for the `"error"` channel.
    Error(ErrorRecord),
}

/// The transport instance currently owned by the machine.
struct ActiveTransport {
    id: TransportId,
    handle: Box<dyn TransportHandle>,
}

/// One-shot timer owned by the machine.
///
/// Cancelling aborts the task and bumps the epoch, so a timer that already
/// woke up but has not yet taken the lock finds its epoch stale.
#[derive(Default)]
struct TimerSlot {
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

impl TimerSlot {
    fn cancel(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn arm(&mut self, spawn: impl FnOnce(u64) -> JoinHandle<()>) {
        self.cancel();
        self.task = Some(spawn(self.epoch));
    }

    /// Consumes the timer if `epoch` is still current.
    fn fire(&mut self, epoch: u64) -> bool {
        if self.epoch != epoch || self.task.is_none() {
            return false;
        }
        self.task = None;
        true
    }

    fn is_pending(&self) -> bool {
        self.task.is_some()
    }
}

/// Mutable machine state.
#[derive(Default)]
struct MachineState {
    status: ConnectionStatus,
    /// Number of the last status transition.
    status_seq: u64,
    url: Option<String>,
    /// Consecutive failure-triggered retries.
    attempts: u32,
    /// ID of the last frame that carried one, for resumption.
    last_event_id: Option<String>,
    current: Option<ActiveTransport>,
    registry: ListenerRegistry,
    reconnect_timer: TimerSlot,
    stabilization_timer: TimerSlot,
}

impl MachineState {
    fn transition(&mut self, next: ConnectionStatus, notices: &mut Vec<Notice>) {
        if self.status == next {
            return;
        }
        debug!(from = %self.status, to = %next, "Status transition");
        self.status = next;
        self.status_seq += 1;
        notices.push(Notice::Status(self.status_seq, next));
    }

    fn is_current(&self, id: TransportId) -> bool {
        self.current.as_ref().is_some_and(|active| active.id == id)
    }

    /// Closes and forgets the current transport.
    fn retire_transport(&mut self) {
        if let Some(active) = self.current.take() {
            trace!(transport_id = %active.id, "Retiring transport");
            active.handle.close();
        }
        self.registry.clear_attached();
    }
}

/// State shared between client handles, pump tasks and timer tasks.
struct Shared {
    transport: Arc<dyn StreamTransport>,
    config: ClientConfig,
    policy: ReconnectPolicy,
    state: Mutex<MachineState>,
    status: StatusBroadcaster,
}

// ============================================================================
// EventClient
// ============================================================================

/// Auto-reconnecting server push client with named-event multiplexing.
///
/// Cloning yields another handle to the same machine. Dropping the last
/// handle cancels timers and closes the transport.
///
/// All methods must be called from within a tokio runtime.
///
/// # Example
///
/// ```ignore
/// use push_stream::{ClientConfig, EventClient, SseTransport};
///
/// let client = EventClient::new(SseTransport::new(), ClientConfig::new());
///
/// client.on("waiting-members-updated", |payload| {
///     println!("members: {payload}");
/// });
/// client.on_error(|record| eprintln!("stream error: {record}"));
/// client.on_status_change(|status| println!("status: {status}"));
///
/// client.connect("https://example.com/sessions/42/events");
/// ```
#[derive(Clone)]
pub struct EventClient {
    shared: Arc<Shared>,
}

impl fmt::Debug for EventClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("EventClient")
            .field("status", &state.status)
            .field("url", &state.url)
            .field("attempts", &state.attempts)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EventClient - Construction
// ============================================================================

impl EventClient {
    /// Creates an idle client. No connection is made until [`connect`].
    ///
    /// The configuration is used as given; use [`EventClient::builder`] for
    /// validation.
    ///
    /// [`connect`]: EventClient::connect
    #[must_use]
    pub fn new(transport: impl StreamTransport, config: ClientConfig) -> Self {
        Self::with_shared_transport(Arc::new(transport), config)
    }

    /// Creates an idle client over a shared transport factory.
    #[must_use]
    pub fn with_shared_transport(transport: Arc<dyn StreamTransport>, config: ClientConfig) -> Self {
        let policy = ReconnectPolicy::from_config(&config);
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                policy,
                state: Mutex::new(MachineState::default()),
                status: StatusBroadcaster::new(),
            }),
        }
    }

    /// Returns a builder for a validated client.
    #[inline]
    #[must_use]
    pub fn builder() -> EventClientBuilder {
        EventClientBuilder::new()
    }
}

// ============================================================================
// EventClient - Connection
// ============================================================================

impl EventClient {
    /// Opens a transport to `url`.
    ///
    /// A no-op while a transport is open or opening, even for a different
    /// URL: call [`disconnect`](Self::disconnect) first to switch endpoints.
    /// Otherwise cancels any pending retry and starts from zero attempts.
    pub fn connect(&self, url: impl Into<String>) {
        self.shared.connect(url.into());
    }

    /// Closes the transport, cancels all timers and returns to `idle`.
    ///
    /// Idempotent.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Disconnects and connects again to the last URL, with a fresh retry
    /// budget. A no-op if no URL was ever connected.
    pub fn reconnect(&self) {
        self.shared.reconnect();
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().status
    }

    /// Returns `true` if the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// URL of the current connection, if any.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.shared.state.lock().url.clone()
    }

    /// Consecutive failure-triggered retries so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.shared.state.lock().attempts
    }

    /// Returns `true` while a backoff timer is pending.
    #[must_use]
    pub fn is_reconnect_pending(&self) -> bool {
        self.shared.state.lock().reconnect_timer.is_pending()
    }

    /// Configuration this client was created with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }
}

// ============================================================================
// EventClient - Subscriptions
// ============================================================================

impl EventClient {
    /// Subscribes `callback` to frames named `event`.
    ///
    /// Use `"message"` for unnamed frames and `"error"` for error records.
    /// The first subscriber of a name attaches one listener to the live
    /// transport; later subscribers share it.
    pub fn on<F>(&self, event: &str, callback: F) -> Listener
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add_listener(event, Arc::new(callback))
    }

    /// Subscribes a shared callback. Adding the same `Arc` again for the same
    /// name returns the existing registration.
    pub fn add_listener(&self, event: &str, callback: EventCallback) -> Listener {
        let id = self.shared.add_listener(event, callback);
        Listener {
            shared: Arc::downgrade(&self.shared),
            event: event.to_string(),
            id,
        }
    }

    /// Subscribes to the `"error"` channel with typed records.
    pub fn on_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(&ErrorRecord) + Send + Sync + 'static,
    {
        self.on(ERROR_EVENT, move |value| match ErrorRecord::from_value(value) {
            Ok(record) => callback(&record),
            Err(e) => warn!(error = %e, "Malformed error record"),
        })
    }

    /// Removes one callback (`Some(id)`) or every callback (`None`) for
    /// `event`.
    pub fn off(&self, event: &str, id: Option<ListenerId>) {
        self.shared.off(event, id);
    }

    /// Number of callbacks subscribed to `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.shared.state.lock().registry.listener_count(event)
    }

    /// Registers a status observer, invoked once per transition.
    pub fn on_status_change<F>(&self, callback: F) -> StatusObserver
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        let callback: StatusCallback = Arc::new(callback);
        StatusObserver {
            shared: Arc::downgrade(&self.shared),
            id: self.shared.status.subscribe(callback),
        }
    }
}

// ============================================================================
// Listener / StatusObserver
// ============================================================================

/// Registration of one event callback.
///
/// Dropping it does not unsubscribe; call [`Listener::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Listener {
    shared: Weak<Shared>,
    event: String,
    id: ListenerId,
}

impl Listener {
    /// Registration ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Event name.
    #[inline]
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Removes the callback. Safe to call more than once, and from inside the
    /// callback itself.
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.off(&self.event, Some(self.id));
        }
    }
}

/// Registration of one status observer.
#[derive(Debug, Clone)]
pub struct StatusObserver {
    shared: Weak<Shared>,
    id: ObserverId,
}

impl StatusObserver {
    /// Registration ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Removes the observer.
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.status.unsubscribe(self.id);
        }
    }
}

// ============================================================================
// Shared - Operations
// ============================================================================

impl Shared {
    fn connect(self: &Arc<Self>, url: String) {
        let mut notices = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            if state.current.is_some() {
                debug!(
                    requested = %url,
                    current = ?state.url,
                    status = %state.status,
                    "Connect ignored, transport already open or opening"
                );
                return;
            }

            info!(url = %url, "Connecting");
            state.reconnect_timer.cancel();
            state.stabilization_timer.cancel();
            state.url = Some(url);
            state.attempts = 0;
            state.last_event_id = None;
            state.transition(ConnectionStatus::Connecting, &mut notices);
            self.open_transport(state);
        }
        self.deliver(notices);
    }

    fn disconnect(&self) {
        let mut notices = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            if state.url.is_some() {
                info!(url = ?state.url, "Disconnecting");
            }
            state.reconnect_timer.cancel();
            state.stabilization_timer.cancel();
            state.retire_transport();
            state.url = None;
            state.attempts = 0;
            state.last_event_id = None;
            state.transition(ConnectionStatus::Idle, &mut notices);
        }
        self.deliver(notices);
    }

    fn reconnect(self: &Arc<Self>) {
        let url = self.state.lock().url.clone();
        match url {
            Some(url) => {
                self.disconnect();
                self.connect(url);
            }
            None => warn!("Reconnect ignored, no URL to reconnect to"),
        }
    }

    fn add_listener(&self, event: &str, callback: EventCallback) -> ListenerId {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let id = state.registry.add(event, callback);
        if let Some(active) = &state.current
            && state.registry.attach(event, active.handle.as_ref())
        {
            self.log_verbose(event, "Attached transport listener");
        }
        id
    }

    fn off(&self, event: &str, id: Option<ListenerId>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let emptied = match id {
            Some(id) => state.registry.remove(event, id),
            None => state.registry.remove_all(event),
        };

        if emptied {
            let handle = state.current.as_ref().map(|active| active.handle.as_ref());
            state.registry.detach(event, handle);
            self.log_verbose(event, "Last subscriber removed");
        }
    }

    /// Opens a transport to the stored URL and re-attaches every subscribed
    /// name before any of its signals can be handled.
    fn open_transport(self: &Arc<Self>, state: &mut MachineState) {
        let Some(url) = state.url.clone() else {
            return;
        };

        let request = OpenRequest::new(url).with_last_event_id(state.last_event_id.clone());
        let TransportStream { handle, signals } = self.transport.open(request);
        let id = TransportId::next();

        let attached = state.registry.attach_all(handle.as_ref());
        debug!(transport_id = %id, attached, "Transport opening");

        state.current = Some(ActiveTransport { id, handle });
        tokio::spawn(pump_signals(Arc::downgrade(self), id, signals));
    }
}

// ============================================================================
// Shared - Signals
// ============================================================================

impl Shared {
    /// Handles one signal. Returns `false` once `id` is no longer current.
    fn handle_signal(self: &Arc<Self>, id: TransportId, signal: TransportSignal) -> bool {
        match signal {
            TransportSignal::Open => self.handle_open(id),
            TransportSignal::Frame(frame) => self.handle_frame(id, frame),
            TransportSignal::Error(error) => {
                self.handle_error(id, error);
                false
            }
        }
    }

    fn handle_open(self: &Arc<Self>, id: TransportId) -> bool {
        let mut notices = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.is_current(id) {
                return false;
            }

            info!(url = ?state.url, transport_id = %id, "Connected");
            state.transition(ConnectionStatus::Connected, &mut notices);

            let weak = Arc::downgrade(self);
            let window = self.config.stabilization_window;
            state.stabilization_timer.arm(|epoch| {
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    if let Some(shared) = weak.upgrade() {
                        shared.on_stabilized(epoch);
                    }
                })
            });
        }
        self.deliver(notices);
        true
    }

    fn handle_frame(&self, id: TransportId, frame: Frame) -> bool {
        let parsed = frame.json();

        let callbacks = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.is_current(id) {
                return false;
            }

            if let Some(frame_id) = frame.id.as_ref().filter(|id| !id.is_empty()) {
                state.last_event_id = Some(frame_id.clone());
            }

            if frame.event == ERROR_EVENT {
                warn!("Ignoring server frame on the reserved error channel");
                return true;
            }

            match &parsed {
                Ok(_) => state.registry.callbacks(&frame.event),
                Err(_) => Vec::new(),
            }
        };

        match parsed {
            Ok(payload) => {
                self.log_verbose(&frame.event, "Dispatching frame");
                dispatch(&callbacks, &frame.event, &payload);
            }
            Err(e) => {
                warn!(event = %frame.event, error = %e, "Malformed frame payload");
                self.emit_error(&ErrorRecord::parse_error(format!(
                    "Failed to parse '{}' frame: {e}",
                    frame.event
                )));
            }
        }
        true
    }

    fn handle_error(self: &Arc<Self>, id: TransportId, error: TransportError) {
        let mut notices = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.is_current(id) {
                trace!(transport_id = %id, "Ignoring error of retired transport");
                return;
            }

            warn!(url = ?state.url, transport_id = %id, error = %error, "Transport failed");
            state.stabilization_timer.cancel();
            state.retire_transport();
            state.transition(ConnectionStatus::Disconnected, &mut notices);

            let record = ErrorRecord::from(&error);
            let retry = record.code.is_retryable(self.config.retry_on_auth_error);
            notices.push(Notice::Error(record));

            if retry {
                self.schedule_reconnect(state, &mut notices);
            } else {
                warn!("Failure is not retried");
            }
        }
        self.deliver(notices);
    }

    /// Runs the reconnection policy for the next attempt.
    fn schedule_reconnect(self: &Arc<Self>, state: &mut MachineState, notices: &mut Vec<Notice>) {
        let attempt = state.attempts + 1;

        let Some(delay) = self.policy.next_delay(attempt) else {
            warn!(
                max_attempts = self.policy.max_attempts,
                "Max reconnect attempts reached"
            );
            state.reconnect_timer.cancel();
            notices.push(Notice::Error(ErrorRecord::max_reconnect_reached(
                self.policy.max_attempts,
            )));
            return;
        };

        state.attempts = attempt;
        state.transition(ConnectionStatus::Reconnecting, notices);
        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        let weak = Arc::downgrade(self);
        state.reconnect_timer.arm(|epoch| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(shared) = weak.upgrade() {
                    shared.on_reconnect_timer(epoch);
                }
            })
        });
    }

    fn on_reconnect_timer(self: &Arc<Self>, epoch: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.reconnect_timer.fire(epoch) || state.current.is_some() {
            return;
        }

        info!(url = ?state.url, attempt = state.attempts, "Reconnecting");
        self.open_transport(state);
    }

    fn on_stabilized(&self, epoch: u64) {
        let mut state = self.state.lock();
        if !state.stabilization_timer.fire(epoch) {
            return;
        }
        if state.attempts > 0 {
            debug!(attempts = state.attempts, "Connection stable, resetting attempts");
        }
        state.attempts = 0;
    }
}

// ============================================================================
// Shared - Delivery
// ============================================================================

impl Shared {
    /// Delivers notifications in the order they were produced.
    fn deliver(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Status(seq, status) => {
                    self.status.notify(seq, status);
                }
                Notice::Error(record) => self.emit_error(&record),
            }
        }
    }

    /// Emits a record on the `"error"` channel.
    fn emit_error(&self, record: &ErrorRecord) {
        let callbacks = self.state.lock().registry.callbacks(ERROR_EVENT);
        if callbacks.is_empty() {
            debug!(code = %record.code, "No error subscribers");
            return;
        }
        dispatch(&callbacks, ERROR_EVENT, &record.to_value());
    }

    fn log_verbose(&self, event: &str, message: &str) {
        if self.config.debug {
            debug!(event, "{message}");
        } else {
            trace!(event, "{message}");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.reconnect_timer.cancel();
        state.stabilization_timer.cancel();
        state.retire_transport();
    }
}

// ============================================================================
// Pump Task
// ============================================================================

/// Drains one transport's signals into the machine, in delivery order.
async fn pump_signals(
    shared: Weak<Shared>,
    id: TransportId,
    mut signals: mpsc::UnboundedReceiver<TransportSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !shared.handle_signal(id, signal) {
            break;
        }
    }
    trace!(transport_id = %id, "Signal pump finished");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use crate::error::ErrorCode;
    use crate::transport::memory::MemoryTransport;

    const URL: &str = "memory://session/42";

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        settle().await;
    }

    fn client_with(config: ClientConfig) -> (MemoryTransport, EventClient) {
        let transport = MemoryTransport::new();
        let client = EventClient::new(transport.clone(), config);
        (transport, client)
    }

    fn client() -> (MemoryTransport, EventClient) {
        client_with(ClientConfig::new())
    }

    fn record_values(client: &EventClient, event: &str) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.on(event, move |value| sink.lock().push(value.clone()));
        seen
    }

    fn record_errors(client: &EventClient) -> Arc<Mutex<Vec<ErrorRecord>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.on_error(move |record| sink.lock().push(record.clone()));
        seen
    }

    fn record_status(client: &EventClient) -> Arc<Mutex<Vec<ConnectionStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.on_status_change(move |status| sink.lock().push(status));
        seen
    }

    fn codes(errors: &Mutex<Vec<ErrorRecord>>) -> Vec<ErrorCode> {
        errors.lock().iter().map(|record| record.code).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_open() {
        let (transport, client) = client();
        let statuses = record_status(&client);

        client.connect(URL);
        assert_eq!(client.status(), ConnectionStatus::Connecting);
        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.requests()[0].url, URL);
        assert_eq!(transport.requests()[0].last_event_id, None);

        transport.last().unwrap().open();
        settle().await;

        assert!(client.is_connected());
        assert_eq!(
            *statuses.lock(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_open_is_noop() {
        let (transport, client) = client();
        client.connect(URL);
        transport.last().unwrap().open();
        settle().await;

        client.connect("memory://elsewhere");

        assert_eq!(transport.open_count(), 1);
        assert_eq!(client.url().as_deref(), Some(URL));
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_transport_listener_per_event() {
        let (transport, client) = client();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            client.on("update", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        client.connect(URL);
        let stream = transport.last().unwrap();
        stream.open();
        settle().await;

        for _ in 0..2 {
            let count = Arc::clone(&count);
            client.on("update", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(stream.attach_calls("update"), 1);
        assert!(stream.send("update", "{}"));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_callback_registered_once() {
        let (transport, client) = client();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let callback: EventCallback = Arc::new(move |_: &Value| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let first = client.add_listener("update", Arc::clone(&callback));
        let second = client.add_listener("update", callback);
        assert_eq!(first.id(), second.id());
        assert_eq!(client.listener_count("update"), 1);

        client.connect(URL);
        let stream = transport.last().unwrap();
        stream.open();
        stream.send("update", "1");
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listeners_reattached_after_reconnect() {
        let (transport, client) = client();
        let statuses = record_status(&client);
        let seen = record_values(&client, "update");

        client.connect(URL);
        let first = transport.last().unwrap();
        first.open();
        settle().await;

        first.fail(TransportError::connection("reset"));
        settle().await;
        assert!(first.is_closed());
        assert_eq!(client.status(), ConnectionStatus::Reconnecting);
        assert_eq!(client.attempts(), 1);

        advance(1_300).await;
        assert_eq!(transport.open_count(), 2);
        let second = transport.last().unwrap();
        assert_eq!(second.attach_calls("update"), 1);
        assert_eq!(client.status(), ConnectionStatus::Reconnecting);

        second.open();
        second.send("update", r#"{"n":1}"#);
        settle().await;

        assert!(!first.send("update", r#"{"n":0}"#));
        assert_eq!(*seen.lock(), vec![json!({"n": 1})]);
        assert_eq!(
            *statuses.lock(),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Reconnecting,
                ConnectionStatus::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_members_scenario() {
        let (transport, client) = client();
        let statuses = record_status(&client);
        let members = record_values(&client, "waiting-members-updated");

        client.connect(URL);
        let first = transport.last().unwrap();
        first.open();
        first.send(
            "waiting-members-updated",
            r#"{"participantCount":3,"members":[]}"#,
        );
        settle().await;
        assert!(client.is_connected());
        assert_eq!(
            *members.lock(),
            vec![json!({"participantCount": 3, "members": []})]
        );

        first.fail(TransportError::connection("network lost"));
        settle().await;
        assert_eq!(client.status(), ConnectionStatus::Reconnecting);

        advance(1_300).await;
        let second = transport.last().unwrap();
        second.open();
        second.send(
            "waiting-members-updated",
            r#"{"participantCount":4,"members":["a"]}"#,
        );
        settle().await;

        assert!(client.is_connected());
        assert_eq!(members.lock().len(), 2);
        assert_eq!(statuses.lock().last(), Some(&ConnectionStatus::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let (transport, client) =
            client_with(ClientConfig::new().with_max_reconnect_attempts(2));
        let errors = record_errors(&client);

        client.connect(URL);
        transport.last().unwrap().fail(TransportError::connection("refused"));
        settle().await;
        advance(1_300).await;
        assert_eq!(transport.open_count(), 2);

        transport.last().unwrap().fail(TransportError::connection("refused"));
        settle().await;
        assert_eq!(client.attempts(), 2);
        advance(2_600).await;
        assert_eq!(transport.open_count(), 3);

        transport.last().unwrap().fail(TransportError::connection("refused"));
        settle().await;

        assert_eq!(
            codes(&errors),
            vec![
                ErrorCode::ConnectionFailed,
                ErrorCode::ConnectionFailed,
                ErrorCode::ConnectionFailed,
                ErrorCode::MaxReconnectReached,
            ]
        );
        assert_eq!(
            errors.lock()[3].message,
            "Max reconnect attempts (2) reached"
        );
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert_eq!(client.attempts(), 2);
        assert!(!client.is_reconnect_pending());

        advance(120_000).await;
        assert_eq!(transport.open_count(), 3);

        client.connect(URL);
        assert_eq!(transport.open_count(), 4);
        assert_eq!(client.attempts(), 0);
        assert_eq!(client.status(), ConnectionStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_connection_resets_attempts() {
        let (transport, client) = client();

        client.connect(URL);
        transport.last().unwrap().fail(TransportError::connection("refused"));
        settle().await;
        advance(1_300).await;

        transport.last().unwrap().open();
        settle().await;
        assert_eq!(client.attempts(), 1);

        advance(3_100).await;
        assert_eq!(client.attempts(), 0);

        transport.last().unwrap().fail(TransportError::connection("reset"));
        settle().await;
        assert_eq!(client.attempts(), 1);
        advance(1_300).await;
        assert_eq!(transport.open_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_connection_keeps_streak() {
        let (transport, client) = client();

        client.connect(URL);
        transport.last().unwrap().fail(TransportError::connection("refused"));
        settle().await;
        advance(1_300).await;

        transport.last().unwrap().open();
        settle().await;
        advance(1_000).await;
        transport.last().unwrap().fail(TransportError::connection("reset"));
        settle().await;

        assert_eq!(client.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_isolated() {
        let (transport, client) = client();
        let errors = record_errors(&client);
        let updates = record_values(&client, "update");
        let messages = record_values(&client, "message");

        client.connect(URL);
        let stream = transport.last().unwrap();
        stream.open();
        stream.send("update", "{broken");
        stream.send("update", r#"{"ok":true}"#);
        stream.send("message", "[1,2]");
        settle().await;

        assert_eq!(codes(&errors), vec![ErrorCode::ParseError]);
        assert!(errors.lock()[0].message.contains("update"));
        assert_eq!(*updates.lock(), vec![json!({"ok": true})]);
        assert_eq!(*messages.lock(), vec![json!([1, 2])]);
        assert!(client.is_connected());
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_idempotent() {
        let (transport, client) = client();
        let statuses = record_status(&client);

        client.connect(URL);
        let stream = transport.last().unwrap();
        stream.open();
        settle().await;

        client.disconnect();
        client.disconnect();

        assert!(stream.is_closed());
        assert_eq!(client.status(), ConnectionStatus::Idle);
        assert_eq!(client.url(), None);
        assert_eq!(
            statuses
                .lock()
                .iter()
                .filter(|status| **status == ConnectionStatus::Idle)
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (transport, client) = client();

        client.connect(URL);
        transport.last().unwrap().fail(TransportError::connection("refused"));
        settle().await;
        assert!(client.is_reconnect_pending());

        client.disconnect();
        advance(60_000).await;

        assert_eq!(transport.open_count(), 1);
        assert_eq!(client.status(), ConnectionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_resets_budget() {
        let (transport, client) = client();
        let statuses = record_status(&client);

        client.connect(URL);
        transport.last().unwrap().fail(TransportError::connection("refused"));
        settle().await;
        assert_eq!(client.attempts(), 1);

        client.reconnect();

        assert_eq!(transport.open_count(), 2);
        assert_eq!(client.attempts(), 0);
        assert_eq!(client.status(), ConnectionStatus::Connecting);
        assert!(!client.is_reconnect_pending());
        assert_eq!(
            statuses.lock()[3..],
            [ConnectionStatus::Idle, ConnectionStatus::Connecting]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_without_url_is_noop() {
        let (transport, client) = client();
        client.reconnect();
        assert_eq!(transport.open_count(), 0);
        assert_eq!(client.status(), ConnectionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_not_retried_when_disabled() {
        let (transport, client) =
            client_with(ClientConfig::new().with_retry_on_auth_error(false));
        let errors = record_errors(&client);

        client.connect(URL);
        transport.last().unwrap().fail(TransportError::auth("HTTP 401"));
        settle().await;
        advance(60_000).await;

        assert_eq!(codes(&errors), vec![ErrorCode::AuthError]);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_error_retried() {
        let (transport, client) = client();
        let errors = record_errors(&client);

        client.connect(URL);
        transport.last().unwrap().fail(TransportError::unknown("boom"));
        settle().await;
        assert_eq!(client.status(), ConnectionStatus::Reconnecting);
        advance(1_300).await;

        assert_eq!(codes(&errors), vec![ErrorCode::Unknown]);
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_event_id_resumed_on_retry_only() {
        let (transport, client) = client();
        record_values(&client, "message");

        client.connect(URL);
        let stream = transport.last().unwrap();
        stream.open();
        stream.send_frame(Frame::message("{}").with_id("7"));
        settle().await;
        stream.fail(TransportError::connection("reset"));
        settle().await;
        advance(1_300).await;

        assert_eq!(transport.requests()[1].last_event_id.as_deref(), Some("7"));

        client.disconnect();
        client.connect(URL);
        assert_eq!(transport.requests()[2].last_event_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_detaches_last_listener() {
        let (transport, client) = client();
        client.connect(URL);
        let stream = transport.last().unwrap();
        stream.open();
        settle().await;

        let a = client.on("update", |_| {});
        let b = client.on("update", |_| {});
        a.unsubscribe();
        assert_eq!(stream.listener_count("update"), 1);
        b.unsubscribe();
        b.unsubscribe();
        assert_eq!(stream.listener_count("update"), 0);

        client.on("update", |_| {});
        assert_eq!(stream.listener_count("update"), 1);
        assert_eq!(stream.attach_calls("update"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_removes_all() {
        let (transport, client) = client();
        let seen = record_values(&client, "update");
        client.on("update", |_| {});

        client.connect(URL);
        let stream = transport.last().unwrap();
        stream.open();
        settle().await;

        client.off("update", None);
        assert_eq!(client.listener_count("update"), 0);
        assert!(!stream.send("update", "1"));
        settle().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_unsubscribes_itself() {
        let (transport, client) = client();
        let count = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Listener>>> = Arc::new(Mutex::new(None));

        let listener = {
            let count = Arc::clone(&count);
            let slot = Arc::clone(&slot);
            client.on("message", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(listener) = slot.lock().as_ref() {
                    listener.unsubscribe();
                }
            })
        };
        *slot.lock() = Some(listener);

        client.connect(URL);
        let stream = transport.last().unwrap();
        stream.open();
        stream.send("message", "1");
        stream.send("message", "2");
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_observer_may_disconnect() {
        let (transport, client) = client();
        let statuses = record_status(&client);
        {
            let client_ref = client.clone();
            client.on_status_change(move |status| {
                if status == ConnectionStatus::Connected {
                    client_ref.disconnect();
                }
            });
        }

        client.connect(URL);
        transport.last().unwrap().open();
        settle().await;

        assert_eq!(client.status(), ConnectionStatus::Idle);
        assert_eq!(statuses.lock().last(), Some(&ConnectionStatus::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_observers_never_see_superseded_status() {
        let (transport, client) = client();
        {
            let client_ref = client.clone();
            client.on_status_change(move |status| {
                if status == ConnectionStatus::Connected {
                    client_ref.disconnect();
                }
            });
        }
        let statuses = record_status(&client);

        client.connect(URL);
        transport.last().unwrap().open();
        settle().await;

        assert_eq!(client.status(), ConnectionStatus::Idle);
        assert_eq!(
            *statuses.lock(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Idle]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_subscriber_isolated() {
        let (transport, client) = client();
        client.on("update", |_| panic!("subscriber failure"));
        let seen = record_values(&client, "update");

        client.connect(URL);
        let stream = transport.last().unwrap();
        stream.open();
        stream.send("update", "1");
        stream.send("update", "2");
        settle().await;

        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_transport() {
        let (transport, client) = client();
        client.connect(URL);
        let stream = transport.last().unwrap();
        stream.open();
        settle().await;

        drop(client);

        assert!(stream.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_observer_unsubscribe() {
        let (transport, client) = client();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let observer = client.on_status_change(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        client.connect(URL);
        observer.unsubscribe();
        transport.last().unwrap().open();
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
