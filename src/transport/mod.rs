//! Streaming chat transport
//!
//! The assembler never talks to the network directly. It opens an event
//! stream through a [`ChatTransport`], which lets tests feed synthetic event
//! sequences and lets the HTTP client ([`crate::api::ApiClient`]) plug in the
//! real backend.

mod sse;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::chat::StreamEvent;
use crate::error::Result;

pub use sse::{decode_stream, SseDecoder, WireEvent};

/// Ordered events of one streamed answer
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Body of a chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub document_id: String,
    pub message: String,
    pub stream: bool,
}

impl ChatRequest {
    pub fn streaming(document_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            message: message.into(),
            stream: true,
        }
    }
}

/// Bearer credential passed explicitly into every call
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Opens the event stream for one question
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send the request and return the ordered answer events
    ///
    /// Rejections (bad status, bad credential) are reported here; failures
    /// after the stream is open arrive as `Err` items of the stream.
    async fn open(&self, request: &ChatRequest, credentials: &Credentials) -> Result<EventStream>;
}
