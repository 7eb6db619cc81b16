//! HTTP `text/event-stream` transport.
//!
//! Opens a streaming GET request with `reqwest` and decodes the body with
//! [`FrameDecoder`]. Each [`StreamTransport::open`] call spawns one reader
//! task; closing the handle aborts it.
//!
//! # Response Handling
//!
//! | Response | Signal |
//! |----------|--------|
//! | request failed | `Error(Connection)` |
//! | 401 / 403 | `Error(Auth)` |
//! | other non-2xx | `Error(Connection)` |
//! | 2xx, not `text/event-stream` | `Error(Connection)` |
//! | 2xx `text/event-stream` | `Open`, then `Frame`s |
//! | body ended or read error | `Error(Connection)` |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{DEFAULT_MAX_LINE_LENGTH, FrameDecoder};

use super::{
    OpenRequest, StreamTransport, TransportError, TransportHandle, TransportSignal,
    TransportStream,
};

// ============================================================================
// Constants
// ============================================================================

/// MIME type of server push streams.
const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Resume header sent on reconnect.
const LAST_EVENT_ID: &str = "last-event-id";

// ============================================================================
// Types
// ============================================================================

/// Event names with an attached listener, shared with the reader task.
type ListenedEvents = Arc<RwLock<FxHashSet<String>>>;

// ============================================================================
// SseTransport
// ============================================================================

/// Server-sent events over HTTP.
///
/// # Example
///
/// ```ignore
/// use push_stream::{ClientConfig, EventClient, SseTransport};
///
/// let transport = SseTransport::new().with_header("authorization", "Bearer token")?;
/// let client = EventClient::new(transport, ClientConfig::new());
/// client.connect("https://example.com/events");
/// ```
#[derive(Debug, Clone)]
pub struct SseTransport {
    /// HTTP client shared by all opened streams.
    client: Client,
    /// Extra headers sent with every request.
    headers: HeaderMap,
    /// Longest accepted stream line, in bytes.
    max_line_length: usize,
}

impl Default for SseTransport {
    fn default() -> Self {
        Self::with_client(Client::new())
    }
}

impl SseTransport {
    /// Creates a transport with a default HTTP client.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport using an existing HTTP client.
    #[inline]
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            headers: HeaderMap::new(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Creates a transport whose HTTP client gives up connecting after
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    /// Adds a header sent with every stream request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the name or value is not a valid
    /// HTTP header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::transport(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::transport(format!("Invalid header value for '{name}': {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets the longest stream line accepted before the connection is
    /// treated as failed.
    #[inline]
    #[must_use]
    pub fn with_max_line_length(mut self, limit: usize) -> Self {
        self.max_line_length = limit;
        self
    }
}

impl StreamTransport for SseTransport {
    fn open(&self, request: OpenRequest) -> TransportStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let listened = ListenedEvents::default();

        let task = tokio::spawn(run_stream(
            self.client.clone(),
            self.headers.clone(),
            self.max_line_length,
            request,
            Arc::clone(&listened),
            tx,
        ));

        TransportStream::new(Box::new(SseHandle { listened, task }), rx)
    }
}

// ============================================================================
// SseHandle
// ============================================================================

/// Control handle of one HTTP stream.
struct SseHandle {
    listened: ListenedEvents,
    task: JoinHandle<()>,
}

impl TransportHandle for SseHandle {
    fn add_event_listener(&self, event: &str) {
        self.listened.write().insert(event.to_string());
    }

    fn remove_event_listener(&self, event: &str) {
        self.listened.write().remove(event);
    }

    fn close(&self) {
        self.task.abort();
    }
}

impl Drop for SseHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Reader Task
// ============================================================================

/// Reads one stream to completion and reports the terminal error.
async fn run_stream(
    client: Client,
    headers: HeaderMap,
    max_line_length: usize,
    request: OpenRequest,
    listened: ListenedEvents,
    tx: mpsc::UnboundedSender<TransportSignal>,
) {
    let decoder = FrameDecoder::new().with_max_line_length(max_line_length);
    if let Err(error) = read_stream(&client, headers, decoder, &request, &listened, &tx).await {
        debug!(url = %request.url, error = %error, "Event stream ended");
        let _ = tx.send(TransportSignal::Error(error));
    }
}

/// Returns `Ok` only when the receiver went away.
async fn read_stream(
    client: &Client,
    headers: HeaderMap,
    mut decoder: FrameDecoder,
    request: &OpenRequest,
    listened: &ListenedEvents,
    tx: &mpsc::UnboundedSender<TransportSignal>,
) -> StdResult<(), TransportError> {
    let url = parse_stream_url(request)?;
    let mut builder = client
        .get(url)
        .headers(headers)
        .header(ACCEPT, EVENT_STREAM_MIME)
        .header(CACHE_CONTROL, "no-cache");

    if let Some(id) = &request.last_event_id {
        builder = builder.header(LAST_EVENT_ID, id.as_str());
    }

    let response = builder
        .send()
        .await
        .map_err(|e| TransportError::connection(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TransportError::auth(format!("HTTP {status}")));
    }
    if !status.is_success() {
        return Err(TransportError::connection(format!("HTTP {status}")));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !content_type.starts_with(EVENT_STREAM_MIME) {
        return Err(TransportError::connection(format!(
            "Unexpected content type '{content_type}'"
        )));
    }

    if tx.send(TransportSignal::Open).is_err() {
        return Ok(());
    }

    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| TransportError::connection(e.to_string()))?;

        let frames = decoder
            .feed(&chunk)
            .map_err(|e| TransportError::connection(e.to_string()))?;

        for frame in frames {
            if !frame.is_message() && !listened.read().contains(&frame.event) {
                trace!(event = %frame.event, "Dropping frame without listener");
                continue;
            }
            if tx.send(TransportSignal::Frame(frame)).is_err() {
                return Ok(());
            }
        }
    }

    if let Some(retry) = decoder.retry_hint() {
        trace!(retry_ms = retry, "Server retry hint ignored, backoff policy applies");
    }

    Err(TransportError::connection("Stream closed by server"))
}

/// Parses a stream URL, accepting only `http` and `https`.
fn parse_stream_url(request: &OpenRequest) -> StdResult<Url, TransportError> {
    let url = request.parse_url().map_err(|e| {
        TransportError::connection(format!("Invalid URL '{}': {e}", request.url))
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(TransportError::connection(format!(
            "Unsupported URL scheme '{scheme}'"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
