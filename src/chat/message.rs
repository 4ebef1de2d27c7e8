use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A point in the document's audio/video track referenced by an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampRef {
    /// Offset from the start of the media, in seconds
    pub start: f64,

    /// Label shown next to the control
    pub text: String,
}

impl TimestampRef {
    pub fn new(start: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            text: text.into(),
        }
    }
}

/// One event of a streamed answer
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Next fragment of the answer text
    ContentDelta(String),
    /// Stream completed; carries the timestamp references for the answer
    Done(Vec<TimestampRef>),
}

/// A single entry of a conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,

    pub role: Role,

    /// Message text. Grows only for an assistant message while streaming.
    pub content: String,

    /// True while deltas are still being applied
    pub is_streaming: bool,

    /// Timestamp references attached when the answer completed
    pub timestamps: Vec<TimestampRef>,

    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// A finished user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            is_streaming: false,
            timestamps: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// An empty assistant placeholder that will receive streamed deltas
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: String::new(),
            is_streaming: true,
            timestamps: Vec::new(),
            created_at: Utc::now(),
        }
    }
}
