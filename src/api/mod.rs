//! Document-chat API client
//!
//! Wraps the backend's HTTP endpoints:
//! - POST /chat/stream - streamed answer (via [`crate::transport::ChatTransport`])
//! - POST /chat - whole answer at once
//! - GET /chat/history/:id - stored conversation
//! - POST /chat/summarize - document summary
//! - POST /chat/timestamps - moments related to a query
//! - GET /documents, GET /documents/:id - document metadata and status
//! - DELETE /documents/:id - remove a document and its chat history
//! - POST /upload/:type - multipart upload of a pdf, audio or video file
//! - POST /auth/login, GET /auth/me - bearer credential and its user

mod client;
mod types;

pub use client::ApiClient;
pub use types::{
    AuthToken, ChatHistory, ChatReply, Document, DocumentList, DocumentStatus, DocumentType,
    HistoryMessage, LoginRequest, Summary, SummarizeRequest, TimestampMatches, TimestampQuery,
    User,
};
