//! # SSE Parser
//!
//! Incremental Server-Sent Events parser used by every agent channel.
//!
//! Text arrives at arbitrary boundaries. The parser keeps the trailing,
//! possibly incomplete line as carry-over and only interprets complete
//! lines:
//! - `data: ` appends to the record's data (multiple lines joined by `\n`)
//! - `event: ` and `id: ` set the corresponding fields
//! - comments and unknown fields are ignored
//! - a blank line ends the record; it is emitted only if data was seen

use crate::error::{Error, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};

/// One dispatched SSE record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Accumulated data field
    pub data: String,
    /// Event type, if the record named one
    pub event: Option<String>,
    /// Last event id, if the record carried one
    pub id: Option<String>,
}

/// Incremental line-oriented SSE parser
#[derive(Debug, Default)]
pub struct SseParser {
    carry: String,
    data: Option<String>,
    event: Option<String>,
    id: Option<String>,
}

impl SseParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text fragment and return every record it completes
    pub fn feed(&mut self, fragment: &str) -> Vec<SseEvent> {
        self.carry.push_str(fragment);

        let Some(last_newline) = self.carry.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);

        complete[..last_newline]
            .split('\n')
            .filter_map(|line| self.process_line(line))
            .collect()
    }

    /// Text still waiting for its line terminator
    pub fn pending(&self) -> &str {
        &self.carry
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let Some((field, value)) = line.split_once(':') else {
            tracing::trace!(line, "Ignoring SSE line without field separator");
            return None;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => tracing::trace!(field, "Ignoring unknown SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        self.data.take().map(|data| SseEvent { data, event, id })
    }
}

/// UTF-8 decoder that carries incomplete sequences across chunks
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match e.error_len() {
                        // Incomplete sequence at the end; wait for the next chunk
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
        out
    }
}

/// Turn a raw byte stream into a lazy stream of SSE records.
///
/// A transport error is yielded once as [`Error::Network`] and ends the
/// stream. A trailing record without its blank line is not emitted.
pub fn sse_events<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut byte_stream = std::pin::pin!(byte_stream);
        let mut parser = SseParser::new();
        let mut decoder = Utf8Carry::default();

        while let Some(chunk) = byte_stream.next().await {
            match chunk {
                Ok(bytes) => {
                    let text = decoder.decode(&bytes);
                    for event in parser.feed(&text) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(Error::Network(format!("SSE transport error: {}", e)));
                    break;
                }
            }
        }

        if !parser.pending().is_empty() {
            tracing::debug!(
                pending = parser.pending().len(),
                "SSE stream ended with an unterminated line"
            );
        }
    }
}
