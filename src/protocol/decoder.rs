//! Incremental `text/event-stream` decoder.
//!
//! Bytes arrive in arbitrary chunks from the network; [`FrameDecoder::feed`]
//! buffers partial lines and returns every frame completed by the chunk.
//! A line that grows past the configured limit without a terminator fails
//! the feed with [`LineTooLong`].
//!
//! # Line Rules
//!
//! | Line | Effect |
//! |------|--------|
//! | empty | dispatch buffered frame (dropped if no `data`) |
//! | `: text` | comment, ignored |
//! | `event: name` | set frame event name |
//! | `data: text` | append a data line |
//! | `id: value` | set last event ID (ignored if it contains NUL) |
//! | `retry: ms` | reconnection hint (digits only) |
//! | other | ignored |

// ============================================================================
// Imports
// ============================================================================

use std::mem;

use thiserror::Error;

use super::frame::{Frame, MESSAGE_EVENT};

// ============================================================================
// Constants
// ============================================================================

const BOM: char = '\u{feff}';

/// Default upper bound for a single unterminated line, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

// ============================================================================
// LineTooLong
// ============================================================================

/// A line exceeded the decoder's length limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Stream line exceeds {limit} bytes")]
pub struct LineTooLong {
    /// Configured limit, in bytes.
    pub limit: usize,
}

// ============================================================================
// FrameDecoder
// ============================================================================

/// Stateful decoder turning a byte stream into [`Frame`]s.
#[derive(Debug)]
pub struct FrameDecoder {
    /// Bytes of the current, not yet terminated line.
    line: Vec<u8>,
    /// Upper bound for `line`.
    max_line_length: usize,
    /// Previous chunk ended with `\r`; swallow a leading `\n`.
    pending_cr: bool,
    /// At least one line has been processed (BOM already handled).
    started: bool,
    /// Event name buffer.
    event: Option<String>,
    /// Data buffer, each line terminated by `\n`.
    data: String,
    /// Last event ID seen on the stream.
    last_event_id: Option<String>,
    /// Last valid `retry:` value.
    retry: Option<u64>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            line: Vec::new(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            pending_cr: false,
            started: false,
            event: None,
            data: String::new(),
            last_event_id: None,
            retry: None,
        }
    }
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum length of a single line, in bytes.
    #[inline]
    #[must_use]
    pub fn with_max_line_length(mut self, limit: usize) -> Self {
        self.max_line_length = limit;
        self
    }

    /// Feeds a chunk of bytes and returns all frames it completes.
    ///
    /// # Errors
    ///
    /// Returns [`LineTooLong`] once the current line passes the length
    /// limit. The decoder should be discarded afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, LineTooLong> {
        let mut frames = Vec::new();

        for &byte in chunk {
            if mem::take(&mut self.pending_cr) && byte == b'\n' {
                continue;
            }

            match byte {
                b'\n' => self.finish_line(&mut frames),
                b'\r' => {
                    self.pending_cr = true;
                    self.finish_line(&mut frames);
                }
                _ => {
                    if self.line.len() >= self.max_line_length {
                        return Err(LineTooLong {
                            limit: self.max_line_length,
                        });
                    }
                    self.line.push(byte);
                }
            }
        }

        Ok(frames)
    }

    /// Returns the last event ID seen on the stream.
    #[inline]
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Returns the last reconnection delay hint sent by the server, in ms.
    #[inline]
    #[must_use]
    pub fn retry_hint(&self) -> Option<u64> {
        self.retry
    }

    /// Processes one complete line.
    fn finish_line(&mut self, frames: &mut Vec<Frame>) {
        let raw = mem::take(&mut self.line);
        let mut text = String::from_utf8_lossy(&raw).into_owned();

        if !self.started {
            self.started = true;
            if let Some(stripped) = text.strip_prefix(BOM) {
                text = stripped.to_string();
            }
        }

        if text.is_empty() {
            self.dispatch(frames);
            return;
        }

        if text.starts_with(':') {
            return;
        }

        let (field, value) = match text.find(':') {
            Some(idx) => {
                let value = &text[idx + 1..];
                (&text[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (text.as_str(), ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" if !value.contains('\0') => {
                self.last_event_id = (!value.is_empty()).then(|| value.to_string());
            }
            "retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                self.retry = value.parse().ok();
            }
            _ => {}
        }
    }

    /// Emits the buffered frame, if any, and resets the buffers.
    fn dispatch(&mut self, frames: &mut Vec<Frame>) {
        let event = self.event.take();

        if self.data.is_empty() {
            return;
        }

        let mut data = mem::take(&mut self.data);
        data.pop();

        frames.push(Frame {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| MESSAGE_EVENT.to_string()),
            data,
            id: self.last_event_id.clone(),
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
