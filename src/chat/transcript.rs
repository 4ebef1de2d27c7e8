use std::collections::HashMap;

use uuid::Uuid;

use super::message::{ChatMessage, TimestampRef};

/// Ordered conversation transcript with an id index
///
/// Messages are only ever appended. The in-flight assistant message is
/// mutated in place through the methods below, which refuse to touch a
/// message once `is_streaming` is false.
#[derive(Debug, Default, Clone)]
pub struct ConversationTranscript {
    messages: Vec<ChatMessage>,
    index: HashMap<Uuid, usize>,
}

impl ConversationTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its id
    pub fn push(&mut self, message: ChatMessage) -> Uuid {
        let id = message.id;
        self.index.insert(id, self.messages.len());
        self.messages.push(message);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<&ChatMessage> {
        self.index.get(id).map(|&i| &self.messages[i])
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages still receiving deltas
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }

    /// Append one delta to a streaming message
    ///
    /// Returns false if the message is unknown or already finished.
    pub fn append_delta(&mut self, id: &Uuid, fragment: &str) -> bool {
        match self.streaming_mut(id) {
            Some(message) => {
                message.content.push_str(fragment);
                true
            }
            None => false,
        }
    }

    /// Close a streaming message and attach its timestamp references
    pub fn finalize(&mut self, id: &Uuid, timestamps: Vec<TimestampRef>) -> bool {
        match self.streaming_mut(id) {
            Some(message) => {
                message.is_streaming = false;
                message.timestamps = timestamps;
                true
            }
            None => false,
        }
    }

    /// Replace the content of a streaming message with a failure notice
    pub fn fail(&mut self, id: &Uuid, notice: &str) -> bool {
        match self.streaming_mut(id) {
            Some(message) => {
                message.content = notice.to_string();
                message.timestamps.clear();
                message.is_streaming = false;
                true
            }
            None => false,
        }
    }

    /// Stop a streaming message, keeping whatever content it has
    pub fn freeze(&mut self, id: &Uuid) -> bool {
        match self.streaming_mut(id) {
            Some(message) => {
                message.is_streaming = false;
                true
            }
            None => false,
        }
    }

    fn streaming_mut(&mut self, id: &Uuid) -> Option<&mut ChatMessage> {
        let &i = self.index.get(id)?;
        let message = &mut self.messages[i];
        if message.is_streaming {
            Some(message)
        } else {
            None
        }
    }
}
