use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::EventStream;
use crate::chat::{StreamEvent, TimestampRef};
use crate::error::ChatError;

const DATA_PREFIX: &str = "data: ";

/// JSON payload of one `data:` line
///
/// `{"content": "..."}` carries a delta, `{"done": true, "timestamps": [...]}`
/// closes the stream.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<TimestampRef>>,
}

impl WireEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn done(timestamps: Vec<TimestampRef>) -> Self {
        Self {
            done: true,
            timestamps: Some(timestamps),
            ..Self::default()
        }
    }

    /// Events carried by this payload, delta first
    pub fn into_events(self) -> Vec<StreamEvent> {
        let mut events = Vec::with_capacity(2);

        if let Some(text) = self.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::ContentDelta(text));
        }

        if self.done {
            events.push(StreamEvent::Done(self.timestamps.unwrap_or_default()));
        }

        events
    }
}

/// Incremental decoder for the chat event stream
///
/// Bytes are buffered until a full line is available, so neither an event
/// nor a multi-byte character is ever split across network chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return the events completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            decode_line(&line[..pos], &mut events);
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            decode_line(&line, &mut events);
        }
        events
    }
}

fn decode_line(raw: &[u8], events: &mut Vec<StreamEvent>) {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim_end_matches('\r'),
        Err(e) => {
            warn!("Dropping non UTF-8 stream line: {}", e);
            return;
        }
    };

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return;
    };

    match serde_json::from_str::<WireEvent>(payload) {
        Ok(wire) => {
            let decoded = wire.into_events();
            if decoded.is_empty() {
                debug!("Ignoring stream payload without content or done: {}", payload);
            }
            events.extend(decoded);
        }
        Err(e) => {
            warn!("Dropping malformed stream payload: {}", e);
        }
    }
}

/// Turn a raw response body into answer events
///
/// A body error is yielded once and ends the stream.
pub fn decode_stream<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut body = Box::pin(body);

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.push(bytes.as_ref()) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(ChatError::Transport(format!("Stream error: {}", e)));
                    return;
                }
            }
        }

        for event in decoder.finish() {
            yield Ok(event);
        }
    })
}
