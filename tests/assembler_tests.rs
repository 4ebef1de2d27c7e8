// Integration tests for streamed answer assembly
//
// These tests drive a Conversation with synthetic transports so every event
// sequence (deltas, completion, failures, cancellation) is deterministic.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use docchat::chat::DEFAULT_FAILURE_MESSAGE;
use docchat::{
    AssemblerConfig, AssemblyState, ChatError, ChatRequest, ChatTransport, Conversation,
    Credentials, EventStream, Role, StreamEvent, TimestampRef,
};
use futures::channel::mpsc;
use futures::StreamExt;

/// Replays a fixed event list, optionally failing at the end or up front
#[derive(Default)]
struct ScriptedTransport {
    events: Vec<StreamEvent>,
    fail_at_end: bool,
    reject_status: Option<u16>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    fn new(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open(
        &self,
        request: &ChatRequest,
        credentials: &Credentials,
    ) -> docchat::Result<EventStream> {
        assert_eq!(credentials.token(), "test-token");
        self.requests.lock().unwrap().push(request.clone());

        match self.reject_status {
            Some(status @ (401 | 403)) => return Err(ChatError::Auth { status }),
            Some(status) => return Err(ChatError::Rejected { status }),
            None => {}
        }

        let mut items: Vec<docchat::Result<StreamEvent>> =
            self.events.iter().cloned().map(Ok).collect();
        if self.fail_at_end {
            items.push(Err(ChatError::Transport("connection reset".to_string())));
        }

        Ok(futures::stream::iter(items).boxed())
    }
}

/// Hands out a stream fed by the test through a channel
struct ChannelTransport {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<docchat::Result<StreamEvent>>>>,
}

impl ChannelTransport {
    fn new() -> (Self, mpsc::UnboundedSender<docchat::Result<StreamEvent>>) {
        let (tx, rx) = mpsc::unbounded();
        (
            Self {
                receiver: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait::async_trait]
impl ChatTransport for ChannelTransport {
    async fn open(&self, _: &ChatRequest, _: &Credentials) -> docchat::Result<EventStream> {
        let rx = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ChatError::Transport("already opened".to_string()))?;
        Ok(rx.boxed())
    }
}

fn conversation(transport: Arc<dyn ChatTransport>) -> Conversation {
    Conversation::new(
        "doc-1",
        transport,
        Credentials::bearer("test-token"),
        AssemblerConfig::default(),
    )
}

fn delta(text: &str) -> StreamEvent {
    StreamEvent::ContentDelta(text.to_string())
}

#[tokio::test]
async fn test_end_to_end_answer() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new(vec![
        delta("It is"),
        delta(" about AI."),
        StreamEvent::Done(vec![TimestampRef::new(12.0, "intro")]),
    ]));
    let conv = conversation(transport.clone());

    let answer = conv.begin("What is this about?")?;
    let id = answer.message_id();
    let message = answer.finish().await?;

    assert_eq!(message.id, id);
    assert_eq!(message.content, "It is about AI.");
    assert!(!message.is_streaming);
    assert_eq!(message.timestamps, vec![TimestampRef::new(12.0, "intro")]);

    let messages = conv.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "What is this about?");
    assert_eq!(messages[1].role, Role::Assistant);

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].document_id, "doc-1");
    assert_eq!(requests[0].message, "What is this about?");
    assert!(requests[0].stream);

    Ok(())
}

#[tokio::test]
async fn test_chunk_boundaries_do_not_change_result() -> Result<()> {
    let whole = vec![delta("The quick brown fox"), StreamEvent::Done(Vec::new())];
    let split = vec![
        delta("The qu"),
        delta("ick bro"),
        delta("wn fox"),
        StreamEvent::Done(Vec::new()),
    ];

    let a = conversation(Arc::new(ScriptedTransport::new(whole)))
        .begin("q")?
        .finish()
        .await?;
    let b = conversation(Arc::new(ScriptedTransport::new(split)))
        .begin("q")?
        .finish()
        .await?;

    assert_eq!(a.content, "The quick brown fox");
    assert_eq!(a.content, b.content);
    Ok(())
}

#[tokio::test]
async fn test_updates_follow_arrival_order() -> Result<()> {
    let conv = conversation(Arc::new(ScriptedTransport::new(vec![
        delta("a"),
        delta("b"),
        delta("c"),
        StreamEvent::Done(Vec::new()),
    ])));

    let mut answer = conv.begin("q")?;
    let mut seen = Vec::new();
    while let Some(update) = answer.next().await {
        let update = update?;
        seen.push((update.state, update.content));
    }

    assert_eq!(
        seen,
        vec![
            (AssemblyState::Streaming, "a".to_string()),
            (AssemblyState::Streaming, "ab".to_string()),
            (AssemblyState::Streaming, "abc".to_string()),
            (AssemblyState::Finalized, "abc".to_string()),
        ]
    );
    assert_eq!(answer.state(), AssemblyState::Finalized);
    assert!(answer.next().await.is_none(), "stream is not restartable");
    Ok(())
}

#[tokio::test]
async fn test_late_delta_after_done_is_ignored() -> Result<()> {
    let conv = conversation(Arc::new(ScriptedTransport::new(vec![
        delta("final"),
        StreamEvent::Done(Vec::new()),
        delta(" spurious"),
    ])));

    let message = conv.begin("q")?.finish().await?;

    assert_eq!(message.content, "final");
    assert!(!message.is_streaming);
    assert_eq!(conv.messages()[1].content, "final");
    Ok(())
}

#[tokio::test]
async fn test_transport_failure_replaces_content() -> Result<()> {
    let transport = ScriptedTransport {
        events: vec![delta("partial answer")],
        fail_at_end: true,
        ..ScriptedTransport::default()
    };
    let conv = conversation(Arc::new(transport));

    let mut answer = conv.begin("q")?;
    let id = answer.message_id();

    let mut errors = 0;
    while let Some(update) = answer.next().await {
        if let Err(e) = update {
            assert!(matches!(e, ChatError::Transport(_)));
            errors += 1;
        }
    }

    assert_eq!(errors, 1);
    assert_eq!(answer.state(), AssemblyState::Failed);

    let message = conv.message(&id).unwrap();
    assert_eq!(message.content, DEFAULT_FAILURE_MESSAGE);
    assert!(!message.is_streaming);
    assert!(message.timestamps.is_empty());
    assert!(!conv.is_busy());
    Ok(())
}

#[tokio::test]
async fn test_stream_ending_without_done_fails() -> Result<()> {
    let conv = conversation(Arc::new(ScriptedTransport::new(vec![delta("cut off")])));

    let result = conv.begin("q")?.finish().await;

    assert!(matches!(result, Err(ChatError::Transport(_))));
    assert_eq!(conv.messages()[1].content, DEFAULT_FAILURE_MESSAGE);
    Ok(())
}

#[tokio::test]
async fn test_rejected_credentials_surface_auth_error() -> Result<()> {
    let transport = ScriptedTransport {
        reject_status: Some(401),
        ..ScriptedTransport::default()
    };
    let conv = Conversation::new(
        "doc-1",
        Arc::new(transport),
        Credentials::bearer("test-token"),
        AssemblerConfig {
            failure_message: "Something went wrong.".to_string(),
            ..AssemblerConfig::default()
        },
    );

    let result = conv.begin("q")?.finish().await;

    match result {
        Err(e) => assert!(e.is_auth()),
        Ok(_) => panic!("expected an auth error"),
    }
    let messages = conv.messages();
    let message = &messages[1];
    assert_eq!(message.content, "Something went wrong.");
    assert!(!message.is_streaming);
    Ok(())
}

#[tokio::test]
async fn test_protocol_error_does_not_end_stream() -> Result<()> {
    let (transport, tx) = ChannelTransport::new();
    let conv = conversation(Arc::new(transport));

    tx.unbounded_send(Ok(delta("one"))).unwrap();
    tx.unbounded_send(Err(ChatError::Protocol("bad event".to_string()))).unwrap();
    tx.unbounded_send(Ok(delta(" two"))).unwrap();
    tx.unbounded_send(Ok(StreamEvent::Done(Vec::new()))).unwrap();

    let message = conv.begin("q")?.finish().await?;
    assert_eq!(message.content, "one two");
    Ok(())
}

#[tokio::test]
async fn test_cancel_freezes_content() -> Result<()> {
    let (transport, tx) = ChannelTransport::new();
    let conv = conversation(Arc::new(transport));

    let mut answer = conv.begin("q")?;
    let id = answer.message_id();

    tx.unbounded_send(Ok(delta("one "))).unwrap();
    tx.unbounded_send(Ok(delta("two "))).unwrap();
    answer.next().await.unwrap()?;
    answer.next().await.unwrap()?;

    // Remaining deltas are already in flight when the caller gives up
    tx.unbounded_send(Ok(delta("three "))).unwrap();
    tx.unbounded_send(Ok(delta("four "))).unwrap();
    answer.cancel_handle().cancel();
    tx.unbounded_send(Ok(delta("five"))).unwrap();

    assert!(answer.next().await.is_none());
    assert_eq!(answer.state(), AssemblyState::Cancelled);

    let message = conv.message(&id).unwrap();
    assert_eq!(message.content, "one two ");
    assert!(!message.is_streaming);
    assert!(!conv.is_busy());
    Ok(())
}

#[tokio::test]
async fn test_dropping_stream_cancels_answer() -> Result<()> {
    let (transport, tx) = ChannelTransport::new();
    let conv = conversation(Arc::new(transport));

    let mut answer = conv.begin("q")?;
    tx.unbounded_send(Ok(delta("half"))).unwrap();
    answer.next().await.unwrap()?;
    drop(answer);

    let messages = conv.messages();
    let message = &messages[1];
    assert_eq!(message.content, "half");
    assert!(!message.is_streaming);
    assert!(!conv.is_busy());
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_request_is_sent() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new(vec![delta("never")]));
    let conv = conversation(transport.clone());

    let mut answer = conv.begin("q")?;
    answer.cancel();

    assert!(answer.next().await.is_none());
    assert_eq!(conv.messages()[1].content, "");
    assert!(transport.requests.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_second_question_rejected_while_streaming() -> Result<()> {
    let (transport, tx) = ChannelTransport::new();
    let conv = conversation(Arc::new(transport));

    let mut answer = conv.begin("first")?;
    tx.unbounded_send(Ok(delta("x"))).unwrap();
    answer.next().await.unwrap()?;

    assert!(matches!(conv.begin("second"), Err(ChatError::Busy)));
    assert!(matches!(conv.load_history(Vec::new()), Err(ChatError::Busy)));

    let streaming: Vec<_> = conv.messages().into_iter().filter(|m| m.is_streaming).collect();
    assert_eq!(streaming.len(), 1);
    assert_eq!(conv.messages().len(), 2);

    tx.unbounded_send(Ok(StreamEvent::Done(Vec::new()))).unwrap();
    answer.finish().await?;

    assert!(!conv.is_busy());
    let second = conv.begin("second")?;
    assert_eq!(conv.messages().iter().filter(|m| m.is_streaming).count(), 1);
    drop(second);
    assert_eq!(conv.messages().iter().filter(|m| m.is_streaming).count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_observers_receive_updates() -> Result<()> {
    let conv = conversation(Arc::new(ScriptedTransport::new(vec![
        delta("hi"),
        StreamEvent::Done(vec![TimestampRef::new(1.5, "start")]),
    ])));
    let mut updates = conv.subscribe();

    conv.begin("q")?.finish().await?;

    let first = updates.recv().await?;
    assert_eq!(first.state, AssemblyState::Streaming);
    assert_eq!(first.content, "hi");

    let last = updates.recv().await?;
    assert_eq!(last.state, AssemblyState::Finalized);
    assert_eq!(last.timestamps, vec![TimestampRef::new(1.5, "start")]);
    Ok(())
}

#[tokio::test]
async fn test_history_is_loaded_as_finished_messages() -> Result<()> {
    let conv = conversation(Arc::new(ScriptedTransport::new(Vec::new())));

    let mut stale = docchat::ChatMessage::assistant_placeholder();
    stale.content = "old answer".to_string();
    let added = conv.load_history(vec![docchat::ChatMessage::user("old question"), stale])?;

    assert_eq!(added, 2);
    assert!(conv.messages().iter().all(|m| !m.is_streaming));
    assert!(!conv.is_busy());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_never_see_partial_deltas() -> Result<()> {
    let deltas = ["alpha ", "beta ", "gamma ", "delta ", "epsilon"];
    let mut boundaries = HashSet::new();
    let mut total = 0;
    boundaries.insert(0);
    for d in deltas {
        total += d.len();
        boundaries.insert(total);
    }

    let mut events: Vec<StreamEvent> = Vec::new();
    for _ in 0..50 {
        events.extend(deltas.iter().map(|d| delta(d)));
    }
    events.push(StreamEvent::Done(Vec::new()));
    let conv = conversation(Arc::new(ScriptedTransport::new(events)));

    let answer = conv.begin("q")?;
    let id = answer.message_id();

    let reader_conv = conv.clone();
    let reader = tokio::spawn(async move {
        let mut observed = Vec::new();
        loop {
            let message = reader_conv.message(&id).unwrap();
            observed.push(message.content.len());
            if !message.is_streaming {
                break;
            }
            tokio::task::yield_now().await;
        }
        observed
    });

    answer.finish().await?;
    let observed = reader.await?;

    for len in observed {
        assert!(
            boundaries.contains(&(len % total)),
            "reader saw a partially applied delta ({} bytes)",
            len
        );
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_is_the_last_update_observed() -> Result<()> {
    for _ in 0..30 {
        let mut events: Vec<StreamEvent> = (0..500).map(|i| delta(&format!("{} ", i))).collect();
        events.push(StreamEvent::Done(Vec::new()));

        let conv = Conversation::new(
            "doc-1",
            Arc::new(ScriptedTransport::new(events)),
            Credentials::bearer("test-token"),
            AssemblerConfig {
                update_capacity: 4096,
                ..AssemblerConfig::default()
            },
        );
        let mut updates = conv.subscribe();

        let answer = conv.begin("q")?;
        let cancel = answer.cancel_handle();

        let writer = tokio::spawn(answer.finish());
        let canceller = tokio::spawn(async move {
            tokio::task::yield_now().await;
            cancel.cancel();
        });
        canceller.await?;
        writer.await??;

        let mut states = Vec::new();
        while let Ok(update) = updates.try_recv() {
            states.push(update.state);
        }

        let last = states.last().copied().unwrap_or(AssemblyState::Streaming);
        assert!(last.is_terminal(), "last update was {:?}", last);
        assert_eq!(
            states.iter().filter(|s| s.is_terminal()).count(),
            1,
            "exactly one terminal update: {:?}",
            &states[states.len().saturating_sub(3)..]
        );
    }
    Ok(())
}
