//! Error types for the chat client

use thiserror::Error;

/// Chat client error types
#[derive(Error, Debug)]
pub enum ChatError {
    /// Network or stream failure before the answer completed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status
    #[error("Request rejected with status {status}")]
    Rejected { status: u16 },

    /// Expired or invalid credential; the caller must re-authenticate
    #[error("Authentication failed with status {status}")]
    Auth { status: u16 },

    /// Malformed event or response body
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Another answer is still streaming in this conversation
    #[error("An answer is already streaming in this conversation")]
    Busy,

    /// A wait gave up before its condition was met
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The media collaborator refused a command
    #[error("Media error: {0}")]
    Media(String),

    /// Request could not be built (bad URL, bad client settings)
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// Map an HTTP status to the matching rejection variant
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => ChatError::Auth {
                status: status.as_u16(),
            },
            other => ChatError::Rejected { status: other },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::Auth { .. })
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_builder() {
            ChatError::Http(error)
        } else if error.is_decode() {
            ChatError::Protocol(error.to_string())
        } else if let Some(status) = error.status() {
            ChatError::from_status(status)
        } else {
            // Connect, timeout, reset and body read failures
            ChatError::Transport(error.to_string())
        }
    }
}

/// Result type alias for chat client operations
pub type Result<T> = std::result::Result<T, ChatError>;
