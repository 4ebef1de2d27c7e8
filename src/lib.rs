pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod playback;
pub mod transport;

pub use api::{ApiClient, Document, DocumentStatus, DocumentType, User};
pub use chat::{
    AnswerStream, AnswerUpdate, AssemblerConfig, AssemblyState, CancelHandle, ChatMessage,
    Conversation, ConversationTranscript, Role, StreamEvent, TimestampRef,
};
pub use config::Config;
pub use error::{ChatError, Result};
pub use playback::{format_timestamp, LocalMediaPlayer, MediaPlayer, TimestampPlaybackBridge};
pub use transport::{ChatRequest, ChatTransport, Credentials, EventStream, SseDecoder};
