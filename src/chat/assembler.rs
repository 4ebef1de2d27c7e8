use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::{ChatMessage, StreamEvent, TimestampRef};
use super::transcript::ConversationTranscript;
use crate::error::{ChatError, Result};
use crate::transport::{ChatRequest, ChatTransport, Credentials, EventStream};

/// Default text substituted into an answer that could not be completed
pub const DEFAULT_FAILURE_MESSAGE: &str = "Sorry, an error occurred. Please try again.";

/// Configuration for answer assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Plain-language text shown when an answer fails
    pub failure_message: String,

    /// Number of buffered updates per observer before the slowest one lags
    pub update_capacity: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
            update_capacity: 256,
        }
    }
}

/// Lifecycle of one streamed answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssemblyState {
    /// Placeholder created, request not sent yet
    Idle,
    /// Request open, deltas being applied
    Streaming,
    Finalized,
    Failed,
    Cancelled,
}

impl AssemblyState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AssemblyState::Finalized | AssemblyState::Failed | AssemblyState::Cancelled
        )
    }
}

/// Snapshot of the in-flight answer, published after every applied mutation
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerUpdate {
    pub message_id: Uuid,
    pub state: AssemblyState,
    pub content: String,
    pub timestamps: Vec<TimestampRef>,
}

/// State shared between a conversation, its answer stream and cancel handles
struct Shared {
    transcript: RwLock<ConversationTranscript>,
    in_flight: AtomicBool,
    updates: broadcast::Sender<AnswerUpdate>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, ConversationTranscript> {
        self.transcript.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConversationTranscript> {
        self.transcript.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one mutation to the in-flight message and publish the result
    ///
    /// The mutation, the snapshot and the publish happen under a single write
    /// lock, so readers observe either the previous or the new content and
    /// observers receive updates in mutation order. Moving to a terminal
    /// state releases the conversation for the next question.
    fn mutate<F>(&self, id: &Uuid, state: AssemblyState, apply: F) -> Option<AnswerUpdate>
    where
        F: FnOnce(&mut ConversationTranscript) -> bool,
    {
        let mut transcript = self.write();
        if !apply(&mut transcript) {
            return None;
        }

        let message = transcript.get(id)?;
        let update = AnswerUpdate {
            message_id: *id,
            state,
            content: message.content.clone(),
            timestamps: message.timestamps.clone(),
        };

        // broadcast::Sender::send never blocks; no receivers is fine
        let _ = self.updates.send(update.clone());

        if state.is_terminal() {
            self.in_flight.store(false, Ordering::SeqCst);
        }
        Some(update)
    }

    fn cancel(&self, id: &Uuid) -> bool {
        let cancelled = self
            .mutate(id, AssemblyState::Cancelled, |t| t.freeze(id))
            .is_some();
        if cancelled {
            info!("Answer {} cancelled", id);
        }
        cancelled
    }
}

/// A conversation about one document
///
/// Owns the transcript and enforces that at most one answer streams at a
/// time. Cloning yields another handle to the same conversation.
#[derive(Clone)]
pub struct Conversation {
    document_id: String,
    transport: Arc<dyn ChatTransport>,
    credentials: Credentials,
    config: Arc<AssemblerConfig>,
    shared: Arc<Shared>,
}

impl Conversation {
    pub fn new(
        document_id: impl Into<String>,
        transport: Arc<dyn ChatTransport>,
        credentials: Credentials,
        config: AssemblerConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(config.update_capacity.max(1));

        Self {
            document_id: document_id.into(),
            transport,
            credentials,
            config: Arc::new(config),
            shared: Arc::new(Shared {
                transcript: RwLock::new(ConversationTranscript::new()),
                in_flight: AtomicBool::new(false),
                updates,
            }),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Receive an [`AnswerUpdate`] for every change to an in-flight answer
    pub fn subscribe(&self) -> broadcast::Receiver<AnswerUpdate> {
        self.shared.updates.subscribe()
    }

    /// Snapshot of the whole transcript
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.read().messages().to_vec()
    }

    pub fn message(&self, id: &Uuid) -> Option<ChatMessage> {
        self.shared.read().get(id).cloned()
    }

    /// Whether an answer is currently in flight
    pub fn is_busy(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Ask a question
    ///
    /// Appends the user message and an empty assistant placeholder, and
    /// returns the stream that fills the placeholder. The request itself is
    /// sent on the first [`AnswerStream::next`].
    pub fn begin(&self, question: &str) -> Result<AnswerStream> {
        self.claim()?;

        let message_id = {
            let mut transcript = self.shared.write();
            transcript.push(ChatMessage::user(question));
            transcript.push(ChatMessage::assistant_placeholder())
        };

        info!(
            "Asking about document {} (answer {})",
            self.document_id, message_id
        );

        Ok(AnswerStream {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            credentials: self.credentials.clone(),
            request: ChatRequest::streaming(self.document_id.clone(), question),
            failure_message: self.config.failure_message.clone(),
            message_id,
            state: AssemblyState::Idle,
            events: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Append previously stored messages, e.g. the server-side chat history
    ///
    /// Returns the number of messages added.
    pub fn load_history<I>(&self, history: I) -> Result<usize>
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        self.claim()?;

        let added = {
            let mut transcript = self.shared.write();
            let before = transcript.len();
            for mut message in history {
                message.is_streaming = false;
                transcript.push(message);
            }
            transcript.len() - before
        };

        self.shared.in_flight.store(false, Ordering::SeqCst);
        debug!("Loaded {} history messages for {}", added, self.document_id);
        Ok(added)
    }

    fn claim(&self) -> Result<()> {
        self.shared
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| {
                warn!("Conversation {} is busy", self.document_id);
                ChatError::Busy
            })
    }
}

/// Cancels an answer from another task
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    shared: Arc<Shared>,
    message_id: Uuid,
}

impl CancelHandle {
    /// Stop applying deltas and close the answer with its current content
    ///
    /// Once this returns, the answer no longer changes.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.shared.cancel(&self.message_id);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The answer to one question, pulled one update at a time
///
/// Dropping the stream before it finishes cancels the answer.
pub struct AnswerStream {
    shared: Arc<Shared>,
    transport: Arc<dyn ChatTransport>,
    credentials: Credentials,
    request: ChatRequest,
    failure_message: String,
    message_id: Uuid,
    state: AssemblyState,
    events: Option<EventStream>,
    cancelled: Arc<AtomicBool>,
}

impl AnswerStream {
    /// Id of the assistant message being filled
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
            shared: Arc::clone(&self.shared),
            message_id: self.message_id,
        }
    }

    pub fn cancel(&mut self) {
        self.cancel_handle().cancel();
        self.close(AssemblyState::Cancelled);
    }

    /// Advance the answer by one event
    ///
    /// Yields an update for every applied delta and one for completion.
    /// Returns `None` once the answer is finalized, failed or cancelled; a
    /// failure is reported once as `Some(Err(_))` before that.
    pub async fn next(&mut self) -> Option<Result<AnswerUpdate>> {
        loop {
            if self.is_cancelled() {
                self.close(AssemblyState::Cancelled);
            }

            match self.state {
                AssemblyState::Idle => {
                    let opened = self.transport.open(&self.request, &self.credentials).await;
                    if self.is_cancelled() {
                        continue;
                    }

                    match opened {
                        Ok(events) => {
                            debug!("Answer {} streaming", self.message_id);
                            self.events = Some(events);
                            self.state = AssemblyState::Streaming;
                        }
                        Err(e) => return Some(Err(self.fail(e))),
                    }
                }
                AssemblyState::Streaming => {
                    let event = match self.events.as_mut() {
                        Some(events) => events.next().await,
                        None => None,
                    };
                    if self.is_cancelled() {
                        debug!("Discarding event for cancelled answer {}", self.message_id);
                        continue;
                    }

                    match event {
                        Some(Ok(StreamEvent::ContentDelta(text))) if text.is_empty() => {}
                        Some(Ok(StreamEvent::ContentDelta(text))) => {
                            if let Some(update) = self.apply_delta(&text) {
                                return Some(Ok(update));
                            }
                            // Placeholder was closed underneath us
                            self.close(AssemblyState::Cancelled);
                        }
                        Some(Ok(StreamEvent::Done(timestamps))) => {
                            return self.finalize(timestamps).map(Ok);
                        }
                        Some(Err(ChatError::Protocol(reason))) => {
                            warn!("Dropping event for answer {}: {}", self.message_id, reason);
                        }
                        Some(Err(e)) => return Some(Err(self.fail(e))),
                        None => {
                            let e = ChatError::Transport(
                                "stream ended before completion".to_string(),
                            );
                            return Some(Err(self.fail(e)));
                        }
                    }
                }
                AssemblyState::Finalized | AssemblyState::Failed | AssemblyState::Cancelled => {
                    return None;
                }
            }
        }
    }

    /// Drive the answer to the end and return the final message
    pub async fn finish(mut self) -> Result<ChatMessage> {
        while let Some(update) = self.next().await {
            update?;
        }

        self.shared
            .read()
            .get(&self.message_id)
            .cloned()
            .ok_or_else(|| ChatError::Protocol("answer missing from transcript".to_string()))
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn apply_delta(&self, text: &str) -> Option<AnswerUpdate> {
        let id = self.message_id;
        let cancelled = &self.cancelled;

        self.shared.mutate(&id, AssemblyState::Streaming, |t| {
            !cancelled.load(Ordering::SeqCst) && t.append_delta(&id, text)
        })
    }

    fn finalize(&mut self, timestamps: Vec<TimestampRef>) -> Option<AnswerUpdate> {
        let id = self.message_id;
        let count = timestamps.len();
        let update = self
            .shared
            .mutate(&id, AssemblyState::Finalized, |t| t.finalize(&id, timestamps));

        match update {
            Some(update) => {
                info!("Answer {} complete ({} timestamps)", id, count);
                self.close(AssemblyState::Finalized);
                Some(update)
            }
            None => {
                self.close(AssemblyState::Cancelled);
                None
            }
        }
    }

    fn fail(&mut self, error: ChatError) -> ChatError {
        warn!("Answer {} failed: {}", self.message_id, error);

        let id = self.message_id;
        let notice = self.failure_message.as_str();
        self.shared.mutate(&id, AssemblyState::Failed, |t| t.fail(&id, notice));
        self.close(AssemblyState::Failed);
        error
    }

    fn close(&mut self, state: AssemblyState) {
        if !self.state.is_terminal() {
            self.state = state;
        }
        self.events = None;
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.cancelled.store(true, Ordering::SeqCst);
            self.shared.cancel(&self.message_id);
        }
    }
}
