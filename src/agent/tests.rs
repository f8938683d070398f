use super::*;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::accumulator::StreamChunk;
use crate::conversation::Conversation;
use crate::message::{Arguments, Message, Role, ToolCall};
use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, Usage};
use crate::tools::{ToolDefinition, ToolError, ToolRegistry, ToolResult};

const MODEL: &str = "stub-model";

/// What the stub provider does for one request.
#[derive(Clone)]
enum Step {
    Reply(Message),
    Fail(ProviderError),
    /// Streams `content`, then an error chunk.
    BreakMidStream(String, ProviderError),
    /// Streams `content`, then closes without a final chunk.
    Truncate(String),
    /// Never answers.
    Hang,
}

struct StubProvider {
    steps: Mutex<VecDeque<Step>>,
    repeat: Option<Step>,
    streaming: bool,
    chunk_delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
}

impl StubProvider {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            repeat: None,
            streaming: true,
            chunk_delay: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn repeating(step: Step) -> Self {
        Self {
            repeat: Some(step),
            ..Self::new(Vec::new())
        }
    }

    fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, request: &ChatRequest) -> (Step, Usage) {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .expect("stub provider ran out of steps");
        let usage = Usage {
            prompt_tokens: 10 * n as u64,
            completion_tokens: 5,
        };
        (step, usage)
    }
}

fn fragments(content: &str) -> Vec<String> {
    content.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl LlmProvider for StubProvider {
    async fn send_blocking(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        match self.next_step(request) {
            (Step::Reply(message), usage) => Ok(ChatResponse {
                message,
                usage: Some(usage),
            }),
            (Step::Fail(err), _) | (Step::BreakMidStream(_, err), _) => Err(err),
            (Step::Truncate(_), _) => Err(ProviderError::Incomplete),
            (Step::Hang, _) => std::future::pending().await,
        }
    }

    async fn send_streaming(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let step = match self.next_step(request) {
            (Step::Fail(err), _) => return Err(err),
            other => other,
        };
        let (step, usage) = step;

        let (tx, rx) = mpsc::channel(100);
        let cancel = cancel.clone();
        let delay = self.chunk_delay;
        let id = format!("stream-{}", self.calls());
        tokio::spawn(async move {
            if matches!(step, Step::Hang) {
                cancel.cancelled().await;
                drop(tx);
                return;
            }
            let (content, ending) = match step {
                Step::Reply(message) => (message.content.clone(), Some(Ok(message))),
                Step::BreakMidStream(content, err) => (content, Some(Err(err))),
                Step::Truncate(content) => (content, None),
                Step::Fail(_) | Step::Hang => unreachable!(),
            };
            for fragment in fragments(&content) {
                if tx.send(StreamChunk::text(&id, fragment).with_model(MODEL)).await.is_err() {
                    return;
                }
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            match ending {
                Some(Ok(message)) => {
                    let last = StreamChunk::done(&id)
                        .with_tool_calls(message.tool_calls)
                        .with_usage(usage);
                    let _ = tx.send(last).await;
                }
                Some(Err(err)) => {
                    let _ = tx.send(StreamChunk::failed(&id, err)).await;
                }
                None => {}
            }
        });
        Ok(rx)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}

struct StubRegistry {
    broken_definitions: bool,
    executed: Mutex<Vec<String>>,
}

impl StubRegistry {
    fn new() -> Self {
        Self {
            broken_definitions: false,
            executed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ToolRegistry for StubRegistry {
    fn definitions(&self, format: &str) -> Result<Vec<ToolDefinition>, ToolError> {
        if self.broken_definitions {
            return Err(ToolError::UnsupportedFormat(format.to_string()));
        }
        Ok(vec![ToolDefinition {
            name: "calculate".into(),
            description: "Evaluate an arithmetic expression".into(),
            parameters: json!({
                "type": "object",
                "properties": {"expression": {"type": "string"}},
                "required": ["expression"]
            }),
        }])
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        name: &str,
        _arguments: &Arguments,
    ) -> Result<ToolResult, ToolError> {
        self.executed.lock().unwrap().push(name.to_string());
        match name {
            "calculate" => Ok(ToolResult::success("4")),
            "wait_for_cancel" => {
                cancel.cancelled().await;
                Err(ToolError::Cancelled)
            }
            "explode" => Err(ToolError::Execution("kaboom".into())),
            "soft_fail" => Ok(ToolResult {
                success: false,
                content: "ignored".into(),
                error: Some("bad input".into()),
            }),
            other => Err(ToolError::UnknownTool(other.into())),
        }
    }
}

fn args(value: Value) -> Arguments {
    match value {
        Value::Object(map) => map,
        _ => panic!("arguments must be an object"),
    }
}

fn tool_reply(name: &str, arguments: Value) -> Step {
    Step::Reply(Message::assistant_with_tools(
        "",
        vec![ToolCall::new(name, args(arguments)).with_id(format!("call_{name}"))],
    ))
}

fn text_reply(text: &str) -> Step {
    Step::Reply(Message::assistant(text))
}

fn settings() -> LoopSettings {
    LoopSettings {
        terminal_send_timeout: Duration::from_millis(200),
        ..LoopSettings::default()
    }
}

fn engine(provider: Arc<StubProvider>, registry: Arc<StubRegistry>) -> ConversationLoop {
    ConversationLoop::new(provider, Some(registry), settings())
}

async fn drain(rx: &mut mpsc::Receiver<StreamingUpdate>) -> Vec<StreamingUpdate> {
    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }
    updates
}

async fn stream_turn(
    engine: &ConversationLoop,
    conversation: Conversation,
    text: &str,
) -> (Vec<StreamingUpdate>, FinishedTurn) {
    let mut turn = engine.start_streaming(
        conversation,
        Prompt::new(text).unwrap(),
        CancellationToken::new(),
    );
    let updates = drain(&mut turn.updates).await;
    let finished = turn.finish().await.unwrap();
    (updates, finished)
}

fn count(updates: &[StreamingUpdate], pred: impl Fn(&StreamingUpdate) -> bool) -> usize {
    updates.iter().filter(|u| pred(u)).count()
}

fn is_message_complete(update: &StreamingUpdate) -> bool {
    matches!(update, StreamingUpdate::MessageComplete { .. })
}

fn roles(conversation: &Conversation) -> Vec<Role> {
    conversation.messages().iter().map(|m| m.role).collect()
}

#[tokio::test]
async fn test_plain_reply_streamed() {
    let provider = Arc::new(StubProvider::new(vec![text_reply("Hi there!")]));
    let engine = engine(provider.clone(), Arc::new(StubRegistry::new()));

    let (updates, finished) = stream_turn(&engine, Conversation::new(MODEL), "Hello").await;

    assert_eq!(finished.conversation.len(), 2);
    assert_eq!(roles(&finished.conversation), vec![Role::User, Role::Assistant]);
    assert!(matches!(
        updates.first(),
        Some(StreamingUpdate::StreamStarted { model }) if model == MODEL
    ));
    assert_eq!(count(&updates, is_message_complete), 1);
    let completed = updates.iter().find_map(|u| match u {
        StreamingUpdate::MessageComplete { message, stream_id, .. } => {
            Some((message.content.clone(), stream_id.clone()))
        }
        _ => None,
    });
    assert_eq!(completed, Some(("Hi there!".to_string(), Some("stream-1".to_string()))));

    let streamed: String = updates
        .iter()
        .filter_map(|u| match u {
            StreamingUpdate::ChunkReceived { fragment, .. } => Some(fragment.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hi there!");
    assert_eq!(finished.report.iterations, 1);
    assert_eq!(
        finished.report.outcome,
        Ok(LoopOutcome::Completed(finished.conversation.messages()[1].clone()))
    );
}

#[tokio::test]
async fn test_plain_reply_blocking() {
    let provider = Arc::new(StubProvider::new(vec![text_reply("Hi there!")]));
    let engine = engine(provider.clone(), Arc::new(StubRegistry::new()));
    let mut conversation = Conversation::new(MODEL);

    let report = engine
        .send(&mut conversation, "Hello", &CancellationToken::new())
        .await;

    match report.outcome {
        Ok(LoopOutcome::Completed(message)) => assert_eq!(message.content, "Hi there!"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(conversation.len(), 2);
    assert_eq!(
        report.usage,
        Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5
        })
    );
}

#[tokio::test]
async fn test_tool_round_trip() {
    let provider = Arc::new(StubProvider::new(vec![
        tool_reply("calculate", json!({"expression": "2+2"})),
        text_reply("The result of 2+2 is 4"),
    ]));
    let registry = Arc::new(StubRegistry::new());
    let engine = engine(provider.clone(), registry.clone());

    let (updates, finished) = stream_turn(&engine, Conversation::new(MODEL), "What is 2+2?").await;
    let conversation = &finished.conversation;

    assert_eq!(
        roles(conversation),
        vec![
            Role::User,
            Role::Assistant,
            Role::ToolProgress,
            Role::Tool,
            Role::Assistant
        ]
    );
    assert!(conversation.messages()[1].has_tool_calls());
    assert_eq!(conversation.messages()[2].content, "calculate(2+2)");
    assert_eq!(conversation.messages()[3].content, "4");
    assert_eq!(
        conversation.messages()[3].tool_call_id.as_deref(),
        Some("call_calculate")
    );
    assert_eq!(conversation.messages()[4].content, "The result of 2+2 is 4");
    assert_eq!(*registry.executed.lock().unwrap(), vec!["calculate"]);

    let started = updates.iter().find_map(|u| match u {
        StreamingUpdate::ToolExecutionStarted { tool_name, summary } => {
            Some((tool_name.clone(), summary.clone()))
        }
        _ => None,
    });
    assert_eq!(started, Some(("calculate".to_string(), "2+2".to_string())));
    assert_eq!(
        count(&updates, |u| matches!(
            u,
            StreamingUpdate::ToolExecutionComplete { failed: false, .. }
        )),
        1
    );
    assert_eq!(count(&updates, is_message_complete), 2);

    let second_request = &provider.requests.lock().unwrap()[1];
    assert_eq!(second_request.messages.len(), 4);
    assert_eq!(second_request.tools.as_ref().map(Vec::len), Some(1));
    assert_eq!(finished.report.activity.len(), 3);
}

#[tokio::test]
async fn test_iteration_budget_keeps_history() {
    let provider = Arc::new(StubProvider::repeating(tool_reply(
        "calculate",
        json!({"expression": "1+1"}),
    )));
    let engine = ConversationLoop::new(
        provider.clone(),
        Some(Arc::new(StubRegistry::new())),
        LoopSettings {
            max_iterations: 3,
            ..settings()
        },
    );

    let (updates, finished) = stream_turn(&engine, Conversation::new(MODEL), "loop forever").await;

    assert_eq!(
        finished.report.outcome,
        Err(LoopError::MaxIterations { limit: 3 })
    );
    assert_eq!(provider.calls(), 3);
    assert_eq!(finished.report.iterations, 3);
    assert_eq!(finished.conversation.len(), 1 + 3 * 3);
    assert!(matches!(
        updates.last(),
        Some(StreamingUpdate::StreamError {
            error: LoopError::MaxIterations { limit: 3 }
        })
    ));
}

#[tokio::test]
async fn test_cancel_after_first_chunk() {
    let provider = Arc::new(
        StubProvider::new(vec![text_reply("a slow reply that never quite finishes")])
            .with_chunk_delay(Duration::from_secs(30)),
    );
    let engine = engine(provider, Arc::new(StubRegistry::new()));
    let original = Conversation::with_system(MODEL, "be brief");
    let cancel = CancellationToken::new();

    let mut turn = engine.start_streaming(
        original.clone(),
        Prompt::new("Hello").unwrap(),
        cancel.clone(),
    );
    loop {
        match turn.updates.recv().await {
            Some(StreamingUpdate::ChunkReceived { .. }) => {
                cancel.cancel();
                break;
            }
            Some(_) => continue,
            None => panic!("channel closed before the first chunk"),
        }
    }
    let rest = drain(&mut turn.updates).await;
    let finished = turn.finish().await.unwrap();

    assert_eq!(count(&rest, is_message_complete), 0);
    assert_eq!(finished.report.outcome, Ok(LoopOutcome::Cancelled));
    assert_eq!(finished.conversation.messages(), original.messages());
}

#[tokio::test]
async fn test_transport_failure_rolls_back_at_any_iteration() {
    for k in 1..=3 {
        let mut steps: Vec<Step> = (1..k)
            .map(|_| tool_reply("calculate", json!({"expression": "2+2"})))
            .collect();
        steps.push(Step::Fail(ProviderError::Request("connection refused".into())));
        let provider = Arc::new(StubProvider::new(steps));
        let engine = engine(provider.clone(), Arc::new(StubRegistry::new()));
        let original = Conversation::with_system(MODEL, "sys").with_message(Message::user("earlier"));

        let (updates, finished) = stream_turn(&engine, original.clone(), "go").await;

        assert_eq!(provider.calls(), k, "iteration {k}");
        assert_eq!(
            finished.report.outcome,
            Err(LoopError::Provider(ProviderError::Request(
                "connection refused".into()
            )))
        );
        assert_eq!(finished.conversation.messages(), original.messages());
        assert!(matches!(
            updates.last(),
            Some(StreamingUpdate::StreamError { .. })
        ));
    }
}

#[tokio::test]
async fn test_blocking_failure_rolls_back() {
    let provider = Arc::new(StubProvider::new(vec![
        tool_reply("calculate", json!({"expression": "2+2"})),
        Step::Fail(ProviderError::Request("503".into())),
    ]));
    let engine = engine(provider, Arc::new(StubRegistry::new()));
    let mut conversation = Conversation::new(MODEL);

    let report = engine
        .send(&mut conversation, "hi", &CancellationToken::new())
        .await;

    assert!(matches!(report.outcome, Err(LoopError::Provider(_))));
    assert!(conversation.is_empty());
    assert_eq!(report.usage.map(|u| u.prompt_tokens), Some(10));
}

#[tokio::test]
async fn test_stream_error_chunk_rolls_back() {
    let provider = Arc::new(StubProvider::new(vec![Step::BreakMidStream(
        "partial answer ".into(),
        ProviderError::Stream("reset by peer".into()),
    )]));
    let engine = engine(provider, Arc::new(StubRegistry::new()));

    let (updates, finished) = stream_turn(&engine, Conversation::new(MODEL), "hi").await;

    assert!(finished.conversation.is_empty());
    assert_eq!(count(&updates, is_message_complete), 0);
    assert!(matches!(
        updates.last(),
        Some(StreamingUpdate::StreamError {
            error: LoopError::Provider(ProviderError::Stream(_))
        })
    ));
}

#[tokio::test]
async fn test_stream_without_final_chunk_is_transport_error() {
    let provider = Arc::new(StubProvider::new(vec![Step::Truncate("cut off ".into())]));
    let engine = engine(provider, Arc::new(StubRegistry::new()));

    let (_, finished) = stream_turn(&engine, Conversation::new(MODEL), "hi").await;

    assert_eq!(
        finished.report.outcome,
        Err(LoopError::Provider(ProviderError::Incomplete))
    );
    assert!(finished.conversation.is_empty());
}

#[tokio::test]
async fn test_tool_definition_failure_rolls_back() {
    let provider = Arc::new(StubProvider::new(vec![text_reply("unused")]));
    let registry = Arc::new(StubRegistry {
        broken_definitions: true,
        ..StubRegistry::new()
    });
    let engine = engine(provider.clone(), registry);

    let (_, finished) = stream_turn(&engine, Conversation::new(MODEL), "hi").await;

    assert!(matches!(
        finished.report.outcome,
        Err(LoopError::ToolDefinitions(ToolError::UnsupportedFormat(_)))
    ));
    assert_eq!(provider.calls(), 0);
    assert_eq!(finished.report.iterations, 0);
    assert!(finished.conversation.is_empty());
}

#[tokio::test]
async fn test_tool_error_is_not_fatal() {
    let provider = Arc::new(StubProvider::new(vec![
        tool_reply("explode", json!({"target": "everything"})),
        text_reply("That tool failed, sorry."),
    ]));
    let engine = engine(provider.clone(), Arc::new(StubRegistry::new()));

    let (updates, finished) = stream_turn(&engine, Conversation::new(MODEL), "try it").await;

    assert_eq!(provider.calls(), 2);
    assert!(matches!(finished.report.outcome, Ok(LoopOutcome::Completed(_))));
    let tool_message = &finished.conversation.messages()[3];
    assert_eq!(tool_message.role, Role::Tool);
    assert_eq!(tool_message.content, "Tool execution failed: kaboom");
    assert_eq!(
        count(&updates, |u| matches!(
            u,
            StreamingUpdate::ToolExecutionComplete { failed: true, .. }
        )),
        1
    );
}

#[tokio::test]
async fn test_unsuccessful_tool_result_uses_error_text() {
    let provider = Arc::new(StubProvider::new(vec![
        tool_reply("soft_fail", json!({"input": "x"})),
        text_reply("ok"),
    ]));
    let engine = engine(provider, Arc::new(StubRegistry::new()));
    let mut conversation = Conversation::new(MODEL);

    engine
        .send(&mut conversation, "go", &CancellationToken::new())
        .await;

    assert_eq!(conversation.messages()[3].content, "bad input");
}

#[tokio::test]
async fn test_no_registry_still_answers() {
    let provider = Arc::new(StubProvider::new(vec![
        tool_reply("calculate", json!({"expression": "2+2"})),
        text_reply("I could not run the tool."),
    ]));
    let engine = ConversationLoop::new(provider.clone(), None, settings());
    let mut conversation = Conversation::new(MODEL);

    let report = engine
        .send(&mut conversation, "2+2?", &CancellationToken::new())
        .await;

    assert!(matches!(report.outcome, Ok(LoopOutcome::Completed(_))));
    assert!(provider.requests.lock().unwrap()[0].tools.is_none());
    assert_eq!(
        conversation.messages()[3].content,
        "Tool execution failed: no tool registry configured"
    );
}

#[tokio::test]
async fn test_fallback_without_streaming() {
    let provider = Arc::new(
        StubProvider::new(vec![
            tool_reply("calculate", json!({"expression": "2+2"})),
            text_reply("The result of 2+2 is 4"),
        ])
        .without_streaming(),
    );
    let engine = engine(provider, Arc::new(StubRegistry::new()));

    let (updates, finished) = stream_turn(&engine, Conversation::new(MODEL), "What is 2+2?").await;

    assert_eq!(finished.conversation.len(), 5);
    assert_eq!(updates.len(), 2);
    assert!(matches!(updates[0], StreamingUpdate::StreamStarted { .. }));
    match &updates[1] {
        StreamingUpdate::MessageComplete {
            stream_id,
            message,
            stats,
            ..
        } => {
            assert!(stream_id.is_none());
            assert!(stats.is_none());
            assert_eq!(message.content, "The result of 2+2 is 4");
        }
        other => panic!("unexpected update: {other:?}"),
    }
}

#[tokio::test]
async fn test_optimistic_user_message_not_duplicated() {
    let provider = Arc::new(StubProvider::new(vec![text_reply("Hi!")]));
    let engine = engine(provider, Arc::new(StubRegistry::new()));
    let mut conversation = Conversation::new(MODEL).with_message(Message::user("Hello"));

    engine
        .send(&mut conversation, "Hello", &CancellationToken::new())
        .await;

    assert_eq!(roles(&conversation), vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn test_empty_message_rejected() {
    assert_eq!(Prompt::new("   \n"), Err(LoopError::EmptyMessage));

    let provider = Arc::new(StubProvider::new(Vec::new()));
    let engine = engine(provider.clone(), Arc::new(StubRegistry::new()));
    let mut conversation = Conversation::new(MODEL);
    let report = engine
        .send(&mut conversation, "", &CancellationToken::new())
        .await;

    assert_eq!(report.outcome, Err(LoopError::EmptyMessage));
    assert_eq!(provider.calls(), 0);
    assert!(conversation.is_empty());
}

#[tokio::test]
async fn test_slow_observer_still_gets_every_chunk() {
    let provider = Arc::new(StubProvider::new(vec![text_reply("one two three four five six")]));
    let engine = ConversationLoop::new(
        provider,
        Some(Arc::new(StubRegistry::new())),
        LoopSettings {
            update_buffer: 1,
            activity_refresh_chunks: 1,
            ..settings()
        },
    );

    let mut turn = engine.start_streaming(
        Conversation::new(MODEL),
        Prompt::new("count").unwrap(),
        CancellationToken::new(),
    );
    let mut updates = Vec::new();
    while let Some(update) = turn.updates.recv().await {
        updates.push(update);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let finished = turn.finish().await.unwrap();

    let chunks = count(&updates, |u| matches!(u, StreamingUpdate::ChunkReceived { .. }));
    let activity = count(&updates, |u| matches!(u, StreamingUpdate::ActivityUpdate { .. }));
    assert_eq!(chunks, 6);
    assert!(activity <= 7);
    assert_eq!(count(&updates, is_message_complete), 1);
    assert!(matches!(finished.report.outcome, Ok(LoopOutcome::Completed(_))));
}

#[tokio::test]
async fn test_terminal_update_gives_up_on_stalled_observer() {
    let provider = Arc::new(StubProvider::new(vec![text_reply("done")]).without_streaming());
    let engine = ConversationLoop::new(
        provider,
        None,
        LoopSettings {
            update_buffer: 1,
            terminal_send_timeout: Duration::from_millis(20),
            ..settings()
        },
    );

    let mut turn = engine.start_streaming(
        Conversation::new(MODEL),
        Prompt::new("hi").unwrap(),
        CancellationToken::new(),
    );
    let finished = tokio::time::timeout(Duration::from_secs(5), &mut turn.handle)
        .await
        .expect("turn should not block on a stalled observer")
        .unwrap();

    assert!(matches!(finished.report.outcome, Ok(LoopOutcome::Completed(_))));
    assert!(matches!(
        turn.updates.recv().await,
        Some(StreamingUpdate::StreamStarted { .. })
    ));
    assert!(turn.updates.recv().await.is_none());
}

#[tokio::test]
async fn test_usage_is_last_reported() {
    let provider = Arc::new(StubProvider::new(vec![
        tool_reply("calculate", json!({"expression": "2+2"})),
        text_reply("4"),
    ]));
    let engine = engine(provider, Arc::new(StubRegistry::new()));

    let (_, finished) = stream_turn(&engine, Conversation::new(MODEL), "2+2").await;

    assert_eq!(
        finished.report.usage,
        Some(Usage {
            prompt_tokens: 20,
            completion_tokens: 5
        })
    );
}

#[tokio::test]
async fn test_activity_refreshes_every_ten_chunks() {
    let reply: String = (1..=20).map(|i| format!("w{i} ")).collect();
    let provider = Arc::new(StubProvider::new(vec![text_reply(reply.trim_end())]));
    let engine = ConversationLoop::new(provider, None, LoopSettings::default());

    let (updates, finished) = stream_turn(&engine, Conversation::new(MODEL), "count").await;

    let chunks = count(&updates, |u| matches!(u, StreamingUpdate::ChunkReceived { .. }));
    let trees: Vec<&str> = updates
        .iter()
        .filter_map(|u| match u {
            StreamingUpdate::ActivityUpdate { tree } => Some(tree.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, 20);
    assert_eq!(trees.len(), 2);
    assert!(trees[0].contains("● assistant › generating response [10%]"), "{}", trees[0]);
    assert!(trees[1].contains("● assistant › generating response [20%]"), "{}", trees[1]);
    assert!(matches!(finished.report.outcome, Ok(LoopOutcome::Completed(_))));
}

#[tokio::test]
async fn test_cancel_during_tool_execution() {
    let provider = Arc::new(StubProvider::new(vec![tool_reply(
        "wait_for_cancel",
        json!({"input": "forever"}),
    )]));
    let engine = engine(provider.clone(), Arc::new(StubRegistry::new()));
    let original = Conversation::with_system(MODEL, "sys");
    let cancel = CancellationToken::new();

    let mut turn = engine.start_streaming(
        original.clone(),
        Prompt::new("wait").unwrap(),
        cancel.clone(),
    );
    loop {
        match turn.updates.recv().await {
            Some(StreamingUpdate::ToolExecutionStarted { .. }) => {
                cancel.cancel();
                break;
            }
            Some(_) => continue,
            None => panic!("channel closed before the tool started"),
        }
    }
    let rest = drain(&mut turn.updates).await;
    let finished = turn.finish().await.unwrap();

    assert_eq!(count(&rest, is_message_complete), 0);
    assert_eq!(
        count(&rest, |u| matches!(u, StreamingUpdate::StreamError { .. })),
        0
    );
    assert_eq!(finished.report.outcome, Ok(LoopOutcome::Cancelled));
    assert_eq!(finished.conversation.messages(), original.messages());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_cancel_during_blocking_request() {
    let provider = Arc::new(StubProvider::new(vec![Step::Hang]));
    let engine = engine(provider.clone(), Arc::new(StubRegistry::new()));
    let original = Conversation::with_system(MODEL, "sys").with_message(Message::user("earlier"));
    let mut conversation = original.clone();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        engine.send(&mut conversation, "hello?", &cancel),
    )
    .await
    .expect("cancellation should end the turn");

    assert_eq!(report.outcome, Ok(LoopOutcome::Cancelled));
    assert_eq!(conversation.messages(), original.messages());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_cancel_during_fallback_request() {
    let provider = Arc::new(StubProvider::new(vec![Step::Hang]).without_streaming());
    let engine = engine(provider, Arc::new(StubRegistry::new()));
    let original = Conversation::new(MODEL);
    let cancel = CancellationToken::new();

    let mut turn = engine.start_streaming(
        original.clone(),
        Prompt::new("hello?").unwrap(),
        cancel.clone(),
    );
    assert!(matches!(
        turn.updates.recv().await,
        Some(StreamingUpdate::StreamStarted { .. })
    ));
    cancel.cancel();
    let rest = drain(&mut turn.updates).await;
    let finished = turn.finish().await.unwrap();

    assert!(rest.is_empty(), "unexpected updates: {rest:?}");
    assert_eq!(finished.report.outcome, Ok(LoopOutcome::Cancelled));
    assert_eq!(finished.conversation.messages(), original.messages());
}
