//! rig-core backed implementation of [`LlmProvider`].
//!
//! Wraps the provider-specific rig clients behind enum dispatch. Each request
//! builds a low-level completion request from nagare's message history; the
//! loop, not rig, decides when tools run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, GetTokenUsage};
use rig::message::{
    AssistantContent, Message as RigMessage, Text, ToolCall as RigToolCall, ToolFunction,
};
use rig::providers::{anthropic, openai, openrouter};
use rig::streaming::StreamedAssistantContent;
use rig::OneOrMany;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::kind::ProviderKind;
use super::resolve::ModelSelection;
use super::{ChatRequest, ChatResponse, LlmProvider, ProviderError, Usage};
use crate::accumulator::StreamChunk;
use crate::config::Config;
use crate::constants::{DEFAULT_UPDATE_BUFFER, MAX_TOKENS};
use crate::message::{Arguments, Message, Role, ToolCall};

/// Internal enum wrapping provider-specific clients.
enum ClientKind {
    Anthropic(anthropic::Client),
    OpenAI(openai::Client),
    OpenRouter(openrouter::Client),
    Ollama(openai::Client),
}

/// A configured LLM backend.
pub struct RigProvider {
    client: ClientKind,
    kind: ProviderKind,
}

/// Dispatches an operation across provider-specific clients.
///
/// Matches on [`ClientKind`] and executes the same block for each variant,
/// letting the compiler monomorphize per provider.
macro_rules! dispatch {
    ($self:expr, |$client:ident| $body:expr) => {
        match &$self.client {
            ClientKind::Anthropic($client) => $body,
            ClientKind::OpenAI($client) => $body,
            ClientKind::OpenRouter($client) => $body,
            ClientKind::Ollama($client) => $body,
        }
    };
}

/// Builds a rig completion request for `$model` from a prepared [`RigRequest`].
macro_rules! build_request {
    ($model:expr, $prepared:expr) => {{
        let prepared = $prepared;
        let mut builder = $model
            .completion_request(prepared.prompt)
            .messages(prepared.history)
            .tools(prepared.tools)
            .max_tokens(MAX_TOKENS);
        if let Some(preamble) = prepared.preamble {
            builder = builder.preamble(preamble);
        }
        builder.build()
    }};
}

impl RigProvider {
    /// Creates a provider from the loaded application config.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key is found for the selected provider
    /// or if client construction fails.
    pub fn from_config(config: &Config, selection: &ModelSelection) -> Result<Self> {
        let client = match selection.provider {
            ProviderKind::Anthropic => {
                let api_key = config
                    .resolve_api_key("anthropic")
                    .context("No API key found for Anthropic. Set ANTHROPIC_API_KEY or configure it in config.toml")?;
                ClientKind::Anthropic(
                    anthropic::Client::new(&api_key)
                        .context("Failed to create Anthropic client")?,
                )
            }
            ProviderKind::OpenAI => {
                let api_key = config
                    .resolve_api_key("openai")
                    .context("No API key found for OpenAI. Set OPENAI_API_KEY or configure it in config.toml")?;
                ClientKind::OpenAI(
                    openai::Client::new(&api_key).context("Failed to create OpenAI client")?,
                )
            }
            ProviderKind::OpenRouter => {
                let api_key = config
                    .resolve_api_key("openrouter")
                    .context("No API key found for OpenRouter. Set OPENROUTER_API_KEY or configure it in config.toml")?;
                ClientKind::OpenRouter(
                    openrouter::Client::new(&api_key)
                        .context("Failed to create OpenRouter client")?,
                )
            }
            ProviderKind::Ollama => {
                let base_url = config
                    .provider
                    .ollama
                    .as_ref()
                    .and_then(|o| o.base_url.as_deref())
                    .unwrap_or(crate::constants::OLLAMA_DEFAULT_BASE_URL);
                ClientKind::Ollama(
                    openai::Client::builder()
                        .api_key("ollama")
                        .base_url(format!("{}/v1", base_url))
                        .build()
                        .context("Failed to create Ollama client")?,
                )
            }
        };
        tracing::debug!(provider = ?selection.provider, model = %selection.model, "provider ready");
        Ok(Self {
            client,
            kind: selection.provider,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }
}

#[async_trait]
impl LlmProvider for RigProvider {
    async fn send_blocking(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        dispatch!(self, |client| {
            let model = client.completion_model(&request.model);
            let rig_request = build_request!(model, RigRequest::from_chat(request)?);
            let response = model
                .completion(rig_request)
                .await
                .map_err(|e| ProviderError::Request(e.to_string()))?;

            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for content in response.choice.iter() {
                match content {
                    AssistantContent::Text(t) => text.push_str(&t.text),
                    AssistantContent::ToolCall(tc) => tool_calls.push(tool_call_from_rig(tc)),
                    _ => {}
                }
            }
            Ok(ChatResponse {
                message: Message::assistant_with_tools(text, tool_calls),
                usage: Some(usage_from_rig(&response.usage)),
            })
        })
    }

    async fn send_streaming(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let (tx, rx) = mpsc::channel(DEFAULT_UPDATE_BUFFER);
        let stream_id = uuid::Uuid::new_v4().to_string();
        let model_name = request.model.clone();
        let cancel = cancel.clone();

        dispatch!(self, |client| {
            let model = client.completion_model(&request.model);
            let rig_request = build_request!(model, RigRequest::from_chat(request)?);
            let stream = model
                .stream(rig_request)
                .await
                .map_err(|e| ProviderError::Request(e.to_string()))?;
            tokio::spawn(pump_stream(stream, tx, stream_id, model_name, cancel));
        });

        Ok(rx)
    }
}

/// Forwards a rig stream into the chunk channel until it ends, fails, or
/// `cancel` fires.
async fn pump_stream<S, R>(
    stream: S,
    tx: mpsc::Sender<StreamChunk>,
    stream_id: String,
    model: String,
    cancel: CancellationToken,
) where
    S: futures::Stream<Item = Result<StreamedAssistantContent<R>, rig::completion::CompletionError>>
        + Send
        + 'static,
    R: GetTokenUsage + Send + 'static,
{
    let mut stream = Box::pin(stream);
    let mut tool_calls = Vec::new();
    let mut usage = None;

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => return,
            item = stream.next() => item,
        };
        let chunk = match item {
            Some(Ok(StreamedAssistantContent::Text(Text { text }))) => {
                StreamChunk::text(&stream_id, text).with_model(&model)
            }
            Some(Ok(StreamedAssistantContent::ToolCall { tool_call, .. })) => {
                tool_calls.push(tool_call_from_rig(&tool_call));
                continue;
            }
            Some(Ok(StreamedAssistantContent::Final(response))) => {
                usage = response.token_usage().map(|u| usage_from_rig(&u));
                continue;
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                tracing::warn!(error = %err, "provider stream failed");
                let _ = tx
                    .send(StreamChunk::failed(&stream_id, ProviderError::Stream(err.to_string())))
                    .await;
                return;
            }
            None => break,
        };
        if tx.send(chunk).await.is_err() {
            return;
        }
    }

    let mut last = StreamChunk::done(&stream_id)
        .with_model(&model)
        .with_tool_calls(tool_calls);
    last.usage = usage;
    let _ = tx.send(last).await;
}

/// nagare's history split into the pieces rig's request builder wants.
struct RigRequest {
    preamble: Option<String>,
    prompt: RigMessage,
    history: Vec<RigMessage>,
    tools: Vec<rig::completion::ToolDefinition>,
}

impl RigRequest {
    /// System text becomes the preamble; the newest provider-visible message
    /// becomes the prompt and everything before it the chat history.
    fn from_chat(request: &ChatRequest) -> Result<Self, ProviderError> {
        let preamble = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let mut history: Vec<RigMessage> =
            request.messages.iter().filter_map(to_rig_message).collect();
        let prompt = history
            .pop()
            .ok_or_else(|| ProviderError::InvalidRequest("no messages to send".into()))?;

        let tools = request
            .tools
            .iter()
            .flatten()
            .map(|def| rig::completion::ToolDefinition {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            })
            .collect();

        Ok(Self {
            preamble,
            prompt,
            history,
            tools,
        })
    }
}

/// Converts a nagare [`Message`] to a rig-core [`RigMessage`].
///
/// System, progress, and error entries are never sent to the model.
fn to_rig_message(msg: &Message) -> Option<RigMessage> {
    match msg.role {
        Role::User => Some(RigMessage::user(msg.text())),
        Role::Assistant if msg.tool_calls.is_empty() => Some(RigMessage::assistant(msg.text())),
        Role::Assistant => {
            let mut items: Vec<AssistantContent> = Vec::new();
            if !msg.content.is_empty() {
                items.push(AssistantContent::Text(Text {
                    text: msg.content.clone(),
                }));
            }
            for tc in &msg.tool_calls {
                items.push(AssistantContent::ToolCall(RigToolCall::new(
                    tc.id.clone().unwrap_or_else(|| tc.function_name.clone()),
                    ToolFunction::new(
                        tc.function_name.clone(),
                        Value::Object(tc.arguments.clone()),
                    ),
                )));
            }
            Some(RigMessage::Assistant {
                id: None,
                content: OneOrMany::many(items)
                    .unwrap_or_else(|_| OneOrMany::one(AssistantContent::text(""))),
            })
        }
        Role::Tool => {
            let id = msg
                .tool_call_id
                .clone()
                .or_else(|| msg.tool_name.clone())
                .unwrap_or_default();
            Some(RigMessage::tool_result(id, msg.text()))
        }
        Role::System | Role::ToolProgress | Role::Error => None,
    }
}

fn tool_call_from_rig(tc: &RigToolCall) -> ToolCall {
    let arguments = match &tc.function.arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Arguments::new(),
        other => {
            let mut map = Arguments::new();
            map.insert("input".to_string(), other.clone());
            map
        }
    };
    ToolCall::new(tc.function.name.clone(), arguments).with_id(tc.id.clone())
}

fn usage_from_rig(usage: &rig::completion::Usage) -> Usage {
    Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
    }
}
