//! Request and response types of the document-chat API

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::{ChatMessage, Role, TimestampRef};

// ============================================================================
// Documents
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Audio,
    Video,
}

impl DocumentType {
    /// Whether the document has a playable track
    pub fn has_media(self) -> bool {
        matches!(self, DocumentType::Audio | DocumentType::Video)
    }

    /// Pick the upload type from a file extension the backend accepts
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentType::Pdf),
            "mp3" | "wav" | "m4a" | "flac" | "ogg" => Some(DocumentType::Audio),
            "mp4" | "webm" | "mkv" | "avi" | "mov" => Some(DocumentType::Video),
            _ => None,
        }
    }

    /// Path segment of the upload endpoint
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Pdf => "pdf",
            DocumentType::Audio => "audio",
            DocumentType::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    /// Processing has finished, successfully or not
    pub fn is_settled(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub original_filename: String,
    pub document_type: DocumentType,
    pub file_size: u64,
    pub status: DocumentStatus,
    #[serde(default)]
    pub summary: Option<String>,
    /// Media length in seconds
    #[serde(default)]
    pub duration: Option<f64>,
    /// Precomputed segment list for audio/video documents
    #[serde(default)]
    pub timestamps: Option<Vec<TimestampRef>>,
    #[serde(with = "flexible_time")]
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn timestamps(&self) -> &[TimestampRef] {
        self.timestamps.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentList {
    pub documents: Vec<Document>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(with = "flexible_time")]
    pub created_at: DateTime<Utc>,
}

/// Response of the login endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    pub user: User,
}

fn bearer() -> String {
    "bearer".to_string()
}

// ============================================================================
// Chat
// ============================================================================

/// A stored message as returned by the history endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    #[serde(with = "flexible_time")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sources: Option<Vec<serde_json::Value>>,
}

impl From<HistoryMessage> for ChatMessage {
    fn from(message: HistoryMessage) -> Self {
        ChatMessage {
            id: Uuid::new_v4(),
            role: message.role,
            content: message.content,
            is_streaming: false,
            timestamps: Vec::new(),
            created_at: message.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    pub id: String,
    pub document_id: String,
    pub messages: Vec<HistoryMessage>,
    #[serde(with = "flexible_time")]
    pub created_at: DateTime<Utc>,
}

/// Answer of the non-streaming chat endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    #[serde(default)]
    pub sources: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub timestamps: Option<Vec<TimestampRef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeRequest {
    pub document_id: String,
    pub max_length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub document_id: String,
    pub summary: String,
    pub word_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampQuery {
    pub document_id: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampMatches {
    pub document_id: String,
    pub query: String,
    pub timestamps: Vec<TimestampRef>,
}

/// Instants from the API may or may not carry an offset; offset-less ones are UTC
mod flexible_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;

        if let Ok(with_offset) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(with_offset.with_timezone(&Utc));
        }

        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
