//! The conversation loop.
//!
//! One user message drives a bounded sequence of request → reply → tool
//! rounds until the model answers without asking for tools:
//!
//! ```text
//! Idle → Requesting → StreamingResponse → (ToolExecuting → Requesting)* → Completed | Failed
//! ```
//!
//! Transport failures and cancellation put the conversation back the way it
//! was before the turn. Running out of iterations keeps everything the turn
//! produced.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::tool_exec::{summarize, ToolRunner};
use super::update::{StreamingUpdate, UpdateSink};
use crate::accumulator::{ChunkAccumulator, StreamStats};
use crate::activity::{ActivityTree, OperationKind};
use crate::constants::{
    DEFAULT_ACTIVITY_REFRESH_CHUNKS, DEFAULT_MAX_ITERATIONS, DEFAULT_TERMINAL_SEND_TIMEOUT_MS,
    DEFAULT_TOOL_DEFINITION_FORMAT, DEFAULT_UPDATE_BUFFER, STREAMING_PROGRESS_CAP,
};
use crate::conversation::Conversation;
use crate::message::Message;
use crate::provider::{ChatRequest, LlmProvider, ProviderError, Usage};
use crate::tools::{ToolDefinition, ToolError, ToolRegistry};

/// Owner name recorded on iteration activity nodes.
const ITERATION_OWNER: &str = "assistant";

/// Tuning knobs for a [`ConversationLoop`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    /// Ceiling on request/tool rounds per user message.
    pub max_iterations: usize,
    /// Capacity of the update channel.
    pub update_buffer: usize,
    /// Chunks between progress bumps and activity refreshes.
    pub activity_refresh_chunks: usize,
    /// Longest wait for delivering `MessageComplete` / `StreamError`.
    pub terminal_send_timeout: Duration,
    /// Use incremental delivery when the provider supports it.
    pub streaming: bool,
    pub tool_definition_format: String,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            update_buffer: DEFAULT_UPDATE_BUFFER,
            activity_refresh_chunks: DEFAULT_ACTIVITY_REFRESH_CHUNKS,
            terminal_send_timeout: Duration::from_millis(DEFAULT_TERMINAL_SEND_TIMEOUT_MS),
            streaming: true,
            tool_definition_format: DEFAULT_TOOL_DEFINITION_FORMAT.to_string(),
        }
    }
}

/// Why a turn failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoopError {
    #[error("cannot send an empty message")]
    EmptyMessage,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("failed to load tool definitions: {0}")]
    ToolDefinitions(ToolError),
    #[error("maximum tool execution iterations reached ({limit})")]
    MaxIterations { limit: usize },
    #[error("conversation task failed: {0}")]
    Task(String),
}

impl LoopError {
    /// Whether the conversation was restored to its pre-turn state.
    pub fn rolled_back(&self) -> bool {
        !matches!(self, LoopError::MaxIterations { .. })
    }
}

/// How a turn that did not fail ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// The model's final answer, already appended to the conversation.
    Completed(Message),
    /// The caller cancelled; nothing from this turn was kept.
    Cancelled,
}

/// Everything a finished turn reports back.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub outcome: Result<LoopOutcome, LoopError>,
    /// Last usage the provider reported during the turn.
    pub usage: Option<Usage>,
    /// Provider requests issued; zero if the turn failed before the first.
    pub iterations: usize,
    pub activity: ActivityTree,
}

/// Result of a streamed turn: the conversation handed back plus its report.
#[derive(Debug)]
pub struct FinishedTurn {
    pub conversation: Conversation,
    pub report: TurnReport,
}

/// A turn running in its own task.
pub struct StreamingTurn {
    /// Closes once the turn reaches a terminal state.
    pub updates: mpsc::Receiver<StreamingUpdate>,
    pub handle: JoinHandle<FinishedTurn>,
}

impl StreamingTurn {
    /// Waits for the task and returns the conversation with its report.
    ///
    /// # Errors
    ///
    /// Fails only if the task panicked or was aborted.
    pub async fn finish(self) -> Result<FinishedTurn, LoopError> {
        self.handle.await.map_err(|e| LoopError::Task(e.to_string()))
    }
}

/// A validated, non-empty user message.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt(String);

impl Prompt {
    /// # Errors
    ///
    /// Rejects empty and whitespace-only text.
    pub fn new(text: impl Into<String>) -> Result<Self, LoopError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(LoopError::EmptyMessage);
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Requesting,
    StreamingResponse,
    ToolExecuting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Blocking,
    Streaming,
}

/// One assistant reply, however it was delivered.
struct Reply {
    message: Message,
    usage: Option<Usage>,
    stream_id: Option<String>,
    stats: Option<StreamStats>,
}

/// State that lives for one turn.
struct Turn<'a> {
    conversation: &'a mut Conversation,
    cancel: &'a CancellationToken,
    sink: &'a UpdateSink,
    delivery: Delivery,
    state: LoopState,
    tree: ActivityTree,
    usage: Option<Usage>,
    iterations: usize,
}

impl Turn<'_> {
    fn enter(&mut self, next: LoopState) {
        tracing::debug!(from = ?self.state, to = ?next, iteration = self.iterations, "loop state");
        self.state = next;
    }

    fn finish(self, outcome: Result<LoopOutcome, LoopError>) -> TurnReport {
        TurnReport {
            outcome,
            usage: self.usage,
            iterations: self.iterations,
            activity: self.tree,
        }
    }
}

/// Drives conversations against a provider and a tool registry.
///
/// Cheap to clone; clones share the same collaborators.
#[derive(Clone)]
pub struct ConversationLoop {
    provider: Arc<dyn LlmProvider>,
    tools: ToolRunner,
    registry: Option<Arc<dyn ToolRegistry>>,
    settings: Arc<LoopSettings>,
}

impl ConversationLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Option<Arc<dyn ToolRegistry>>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            provider,
            tools: ToolRunner::new(registry.clone()),
            registry,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Runs a turn to completion without emitting updates.
    pub async fn send(
        &self,
        conversation: &mut Conversation,
        text: &str,
        cancel: &CancellationToken,
    ) -> TurnReport {
        let prompt = match Prompt::new(text) {
            Ok(prompt) => prompt,
            Err(err) => {
                return TurnReport {
                    outcome: Err(err),
                    usage: None,
                    iterations: 0,
                    activity: ActivityTree::new(),
                }
            }
        };
        self.drive(
            conversation,
            &prompt,
            cancel,
            &UpdateSink::silent(),
            Delivery::Blocking,
        )
        .await
    }

    /// Moves `conversation` into a new task and runs a turn there.
    ///
    /// Updates arrive on the returned channel, which closes when the turn
    /// ends. The conversation comes back through the join handle.
    pub fn start_streaming(
        &self,
        mut conversation: Conversation,
        prompt: Prompt,
        cancel: CancellationToken,
    ) -> StreamingTurn {
        let (tx, rx) = mpsc::channel(self.settings.update_buffer.max(1));
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let sink = UpdateSink::new(tx, cancel.clone(), engine.settings.terminal_send_timeout);
            let report = engine
                .run_observed(&mut conversation, &prompt, &cancel, &sink)
                .await;
            FinishedTurn {
                conversation,
                report,
            }
        });
        StreamingTurn {
            updates: rx,
            handle,
        }
    }

    /// Wraps a turn with the start and terminal updates. Providers without
    /// incremental delivery run the blocking cycle behind a silent sink, so
    /// observers see only `StreamStarted` and the final outcome.
    async fn run_observed(
        &self,
        conversation: &mut Conversation,
        prompt: &Prompt,
        cancel: &CancellationToken,
        sink: &UpdateSink,
    ) -> TurnReport {
        sink.send(StreamingUpdate::StreamStarted {
            model: conversation.model().to_string(),
        })
        .await;

        let streaming = self.settings.streaming && self.provider.supports_streaming();
        let report = if streaming {
            self.drive(conversation, prompt, cancel, sink, Delivery::Streaming)
                .await
        } else {
            tracing::debug!("provider does not stream, running blocking cycle");
            self.drive(
                conversation,
                prompt,
                cancel,
                &UpdateSink::silent(),
                Delivery::Blocking,
            )
            .await
        };

        match &report.outcome {
            Ok(LoopOutcome::Completed(message)) if !streaming => {
                sink.send(StreamingUpdate::MessageComplete {
                    stream_id: None,
                    message: message.clone(),
                    stats: None,
                    activity: report.activity.render(),
                })
                .await;
            }
            Err(error) => {
                sink.send(StreamingUpdate::StreamError {
                    error: error.clone(),
                })
                .await;
            }
            _ => {}
        }
        report
    }

    async fn drive(
        &self,
        conversation: &mut Conversation,
        prompt: &Prompt,
        cancel: &CancellationToken,
        sink: &UpdateSink,
        delivery: Delivery,
    ) -> TurnReport {
        let entry = conversation.snapshot();
        if !conversation.ends_with_user_text(prompt.as_str()) {
            conversation.append(Message::user(prompt.as_str()));
        }

        let mut turn = Turn {
            conversation,
            cancel,
            sink,
            delivery,
            state: LoopState::Idle,
            tree: ActivityTree::new(),
            usage: None,
            iterations: 0,
        };

        let limit = self.settings.max_iterations;
        for round in 1..=limit {
            turn.enter(LoopState::Requesting);

            let node_id = format!("iteration-{round}");
            if let Err(err) = turn.tree.add_node(
                &node_id,
                ITERATION_OWNER,
                "generating response",
                OperationKind::Analysis,
                None,
            ) {
                tracing::warn!(error = %err, "not tracking iteration activity");
            }

            let reply = match self.request(&mut turn, &node_id).await {
                Ok(Some(reply)) if !cancel.is_cancelled() => reply,
                Ok(_) => {
                    turn.conversation.restore(entry);
                    tracing::info!(iteration = round, "turn cancelled");
                    return turn.finish(Ok(LoopOutcome::Cancelled));
                }
                Err(err) => {
                    let _ = turn.tree.fail(&node_id, err.to_string());
                    turn.enter(LoopState::Failed);
                    turn.conversation.restore(entry);
                    tracing::warn!(iteration = round, error = %err, "turn failed, rolled back");
                    return turn.finish(Err(err));
                }
            };

            let _ = turn.tree.complete(&node_id);
            if reply.usage.is_some() {
                turn.usage = reply.usage;
            }
            turn.conversation.append(reply.message.clone());
            if turn.delivery == Delivery::Streaming {
                turn.sink
                    .send(StreamingUpdate::MessageComplete {
                        stream_id: reply.stream_id,
                        message: reply.message.clone(),
                        stats: reply.stats,
                        activity: turn.tree.render(),
                    })
                    .await;
            }

            if !reply.message.has_tool_calls() {
                turn.enter(LoopState::Completed);
                return turn.finish(Ok(LoopOutcome::Completed(reply.message)));
            }

            turn.enter(LoopState::ToolExecuting);
            for call in &reply.message.tool_calls {
                let summary = summarize(call);
                tracing::info!(tool = %call.function_name, %summary, "running tool");
                turn.sink
                    .send(StreamingUpdate::ToolExecutionStarted {
                        tool_name: call.function_name.clone(),
                        summary: summary.clone(),
                    })
                    .await;
                turn.conversation
                    .append(Message::tool_progress(&call.function_name, &summary));

                let outcome = self
                    .tools
                    .run(cancel, call, &mut turn.tree, Some(&node_id), turn.sink)
                    .await;
                if cancel.is_cancelled() {
                    turn.conversation.restore(entry);
                    tracing::info!(tool = %call.function_name, "turn cancelled during tool execution");
                    return turn.finish(Ok(LoopOutcome::Cancelled));
                }
                turn.conversation.append(outcome.message);
                turn.sink
                    .send(StreamingUpdate::ToolExecutionComplete {
                        tool_name: call.function_name.clone(),
                        failed: outcome.failed,
                    })
                    .await;
            }
        }

        turn.enter(LoopState::Failed);
        tracing::warn!(limit, "iteration budget exhausted");
        turn.finish(Err(LoopError::MaxIterations { limit }))
    }

    /// Sends the current history. `Ok(None)` means the turn was cancelled.
    async fn request(&self, turn: &mut Turn<'_>, node_id: &str) -> Result<Option<Reply>, LoopError> {
        let request = ChatRequest {
            model: turn.conversation.model().to_string(),
            messages: turn.conversation.messages().to_vec(),
            tools: self.tool_definitions()?,
        };
        turn.iterations += 1;

        match turn.delivery {
            Delivery::Blocking => {
                tokio::select! {
                    biased;
                    _ = turn.cancel.cancelled() => Ok(None),
                    response = self.provider.send_blocking(&request) => {
                        let response = response?;
                        Ok(Some(Reply {
                            message: response.message,
                            usage: response.usage,
                            stream_id: None,
                            stats: None,
                        }))
                    }
                }
            }
            Delivery::Streaming => self.stream_reply(turn, &request, node_id).await,
        }
    }

    fn tool_definitions(&self) -> Result<Option<Vec<ToolDefinition>>, LoopError> {
        let Some(registry) = &self.registry else {
            return Ok(None);
        };
        let definitions = registry
            .definitions(&self.settings.tool_definition_format)
            .map_err(LoopError::ToolDefinitions)?;
        Ok((!definitions.is_empty()).then_some(definitions))
    }

    async fn stream_reply(
        &self,
        turn: &mut Turn<'_>,
        request: &ChatRequest,
        node_id: &str,
    ) -> Result<Option<Reply>, LoopError> {
        let cancel = turn.cancel;
        let mut chunks = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            rx = self.provider.send_streaming(cancel, request) => rx?,
        };
        turn.enter(LoopState::StreamingResponse);

        let mut accumulator = ChunkAccumulator::new();
        let mut usage = None;
        let refresh_every = self.settings.activity_refresh_chunks.max(1);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                chunk = chunks.recv() => chunk,
            };
            let Some(chunk) = chunk else {
                return Err(ProviderError::Incomplete.into());
            };

            accumulator.add_chunk(&chunk);
            if let Some(err) = chunk.error {
                return Err(err.into());
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }

            let stream_id = chunk.stream_id;
            let Some(stats) = accumulator.stats(&stream_id) else {
                continue;
            };
            if !chunk.content.is_empty() {
                turn.sink
                    .send(StreamingUpdate::ChunkReceived {
                        stream_id: stream_id.clone(),
                        fragment: chunk.content,
                        stats: stats.clone(),
                    })
                    .await;
            }
            if stats.chunk_count % refresh_every == 0 {
                let percent = (stats.chunk_count as f64).min(STREAMING_PROGRESS_CAP);
                let _ = turn.tree.update_progress(node_id, percent);
                turn.sink
                    .send(StreamingUpdate::ActivityUpdate {
                        tree: turn.tree.render(),
                    })
                    .await;
            }

            if chunk.is_final {
                let message = accumulator
                    .finalize(&stream_id)
                    .ok_or(ProviderError::Incomplete)?;
                return Ok(Some(Reply {
                    message,
                    usage,
                    stream_id: Some(stream_id),
                    stats: Some(StreamStats {
                        is_complete: true,
                        ..stats
                    }),
                }));
            }
        }
    }
}
