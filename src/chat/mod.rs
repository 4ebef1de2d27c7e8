//! Conversation transcript and streamed answer assembly
//!
//! A [`Conversation`] holds the transcript for one document. Asking a
//! question appends the user message plus an assistant placeholder, and the
//! returned [`AnswerStream`] folds the server's events into that placeholder:
//! - deltas are appended in arrival order
//! - `Done` closes the message and attaches its timestamp references
//! - transport failures replace the content with a fixed notice
//! - cancellation freezes the content as it is

mod assembler;
mod message;
mod transcript;

pub use assembler::{
    AnswerStream, AnswerUpdate, AssemblerConfig, AssemblyState, CancelHandle, Conversation,
    DEFAULT_FAILURE_MESSAGE,
};
pub use message::{ChatMessage, Role, StreamEvent, TimestampRef};
pub use transcript::ConversationTranscript;
