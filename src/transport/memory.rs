//! Scripted in-process transport.
//!
//! [`MemoryTransport`] records every open request and hands the test (or any
//! in-process producer) a [`MemoryStream`] per opened instance. The producer
//! then plays the server: it opens the stream, pushes frames and fails it.
//!
//! Listener bookkeeping is observable, which makes the client's
//! one-listener-per-event guarantees directly testable.
//!
//! # Example
//!
//! ```ignore
//! let transport = MemoryTransport::new();
//! let client = EventClient::new(transport.clone(), ClientConfig::new());
//! client.connect("memory://feed");
//!
//! let stream = transport.last().unwrap();
//! stream.open();
//! stream.send("update", r#"{"n":1}"#);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::protocol::Frame;

use super::{
    OpenRequest, StreamTransport, TransportError, TransportHandle, TransportSignal,
    TransportStream,
};

// ============================================================================
// MemoryTransport
// ============================================================================

/// Transport whose streams are driven from inside the process.
///
/// Cloning shares the same record of opened streams.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    streams: Arc<Mutex<Vec<MemoryStream>>>,
}

impl MemoryTransport {
    /// Creates a transport with no opened streams.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many streams have been opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Returns the stream opened at `index` (0-based, in open order).
    #[must_use]
    pub fn stream(&self, index: usize) -> Option<MemoryStream> {
        self.streams.lock().get(index).cloned()
    }

    /// Returns the most recently opened stream.
    #[must_use]
    pub fn last(&self) -> Option<MemoryStream> {
        self.streams.lock().last().cloned()
    }

    /// Returns every open request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<OpenRequest> {
        self.streams
            .lock()
            .iter()
            .map(|stream| stream.request().clone())
            .collect()
    }
}

impl StreamTransport for MemoryTransport {
    fn open(&self, request: OpenRequest) -> TransportStream {
        let (tx, rx) = mpsc::unbounded_channel();
        trace!(url = %request.url, "Memory stream opened");

        let shared = Arc::new(StreamShared {
            request,
            tx,
            state: Mutex::new(StreamState::default()),
        });

        self.streams.lock().push(MemoryStream {
            shared: Arc::clone(&shared),
        });

        TransportStream::new(Box::new(MemoryHandle { shared }), rx)
    }
}

// ============================================================================
// MemoryStream
// ============================================================================

/// Producer side of one opened memory transport instance.
#[derive(Clone)]
pub struct MemoryStream {
    shared: Arc<StreamShared>,
}

struct StreamShared {
    request: OpenRequest,
    tx: mpsc::UnboundedSender<TransportSignal>,
    state: Mutex<StreamState>,
}

#[derive(Default)]
struct StreamState {
    /// Currently attached listeners per event name.
    listeners: FxHashMap<String, usize>,
    /// Total `add_event_listener` calls per event name.
    attach_calls: FxHashMap<String, usize>,
    /// Closed by the owner.
    closed: bool,
    /// Terminated by `fail`.
    failed: bool,
}

impl MemoryStream {
    /// Returns the request this stream was opened with.
    #[inline]
    #[must_use]
    pub fn request(&self) -> &OpenRequest {
        &self.shared.request
    }

    /// Signals that the stream is established.
    ///
    /// Returns `false` if the stream is closed or failed.
    pub fn open(&self) -> bool {
        if !self.is_live() {
            return false;
        }
        self.shared.tx.send(TransportSignal::Open).is_ok()
    }

    /// Pushes a frame with the given event name and payload.
    ///
    /// Returns `true` if the frame was delivered to the owner.
    pub fn send(&self, event: &str, data: &str) -> bool {
        self.send_frame(Frame::new(event, data))
    }

    /// Pushes a frame.
    ///
    /// Named frames without an attached listener are dropped, like a browser
    /// event source drops events nobody listens for.
    pub fn send_frame(&self, frame: Frame) -> bool {
        {
            let state = self.shared.state.lock();
            if state.closed || state.failed {
                return false;
            }
            if !frame.is_message() && !state.listeners.contains_key(&frame.event) {
                trace!(event = %frame.event, "Memory frame dropped, no listener");
                return false;
            }
        }
        self.shared.tx.send(TransportSignal::Frame(frame)).is_ok()
    }

    /// Terminates the stream with an error.
    pub fn fail(&self, error: TransportError) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.closed || state.failed {
                return false;
            }
            state.failed = true;
        }
        self.shared.tx.send(TransportSignal::Error(error)).is_ok()
    }

    /// Returns the number of listeners currently attached for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.shared
            .state
            .lock()
            .listeners
            .get(event)
            .copied()
            .unwrap_or(0)
    }

    /// Returns how many times a listener was attached for `event`.
    #[must_use]
    pub fn attach_calls(&self, event: &str) -> usize {
        self.shared
            .state
            .lock()
            .attach_calls
            .get(event)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the names with an attached listener, sorted.
    #[must_use]
    pub fn listened_events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.state.lock().listeners.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns `true` if the owner closed this stream.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    fn is_live(&self) -> bool {
        let state = self.shared.state.lock();
        !state.closed && !state.failed
    }
}

// ============================================================================
// MemoryHandle
// ============================================================================

struct MemoryHandle {
    shared: Arc<StreamShared>,
}

impl TransportHandle for MemoryHandle {
    fn add_event_listener(&self, event: &str) {
        let mut state = self.shared.state.lock();
        *state.listeners.entry(event.to_string()).or_insert(0) += 1;
        *state.attach_calls.entry(event.to_string()).or_insert(0) += 1;
    }

    fn remove_event_listener(&self, event: &str) {
        let mut state = self.shared.state.lock();
        if let Some(count) = state.listeners.get_mut(event) {
            *count -= 1;
            if *count == 0 {
                state.listeners.remove(event);
            }
        }
    }

    fn close(&self) {
        self.shared.state.lock().closed = true;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_requests() {
        let transport = MemoryTransport::new();
        let _stream = transport.open(OpenRequest::new("memory://a"));
        let _stream = transport.open(
            OpenRequest::new("memory://b").with_last_event_id(Some("9".to_string())),
        );

        assert_eq!(transport.open_count(), 2);
        let requests = transport.requests();
        assert_eq!(requests[0].url, "memory://a");
        assert_eq!(requests[1].last_event_id.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn test_named_frames_need_listener() {
        let transport = MemoryTransport::new();
        let TransportStream {
            handle,
            mut signals,
        } = transport.open(OpenRequest::new("memory://a"));
        let stream = transport.last().unwrap();

        assert!(!stream.send("update", "1"));
        assert!(stream.send("message", "2"));

        handle.add_event_listener("update");
        assert!(stream.send("update", "3"));

        assert_eq!(
            signals.recv().await,
            Some(TransportSignal::Frame(Frame::message("2")))
        );
        assert_eq!(
            signals.recv().await,
            Some(TransportSignal::Frame(Frame::new("update", "3")))
        );
    }

    #[tokio::test]
    async fn test_listener_bookkeeping() {
        let transport = MemoryTransport::new();
        let opened = transport.open(OpenRequest::new("memory://a"));
        let stream = transport.last().unwrap();

        opened.handle.add_event_listener("a");
        opened.handle.add_event_listener("b");
        opened.handle.remove_event_listener("a");
        opened.handle.add_event_listener("a");

        assert_eq!(stream.listener_count("a"), 1);
        assert_eq!(stream.attach_calls("a"), 2);
        assert_eq!(stream.listened_events(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_closed_stream_is_silent() {
        let transport = MemoryTransport::new();
        let opened = transport.open(OpenRequest::new("memory://a"));
        let stream = transport.last().unwrap();

        opened.handle.close();
        assert!(stream.is_closed());
        assert!(!stream.open());
        assert!(!stream.send("message", "1"));
        assert!(!stream.fail(TransportError::connection("late")));
    }

    #[tokio::test]
    async fn test_fail_is_terminal() {
        let transport = MemoryTransport::new();
        let _opened = transport.open(OpenRequest::new("memory://a"));
        let stream = transport.last().unwrap();

        assert!(stream.fail(TransportError::connection("drop")));
        assert!(!stream.fail(TransportError::connection("again")));
        assert!(!stream.send("message", "1"));
    }
}
