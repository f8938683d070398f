//! LLM provider abstraction for nagare.
//!
//! The conversation loop talks to a model through the [`LlmProvider`] trait
//! and never sees a concrete backend. [`RigProvider`] implements it on top of
//! rig-core's provider clients with enum dispatch over Anthropic, OpenAI,
//! OpenRouter, and Ollama (local) via [`ProviderKind`].

mod kind;
mod resolve;
mod rig_client;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::accumulator::StreamChunk;
use crate::message::Message;
use crate::tools::ToolDefinition;

pub use kind::{default_model_for, ProviderKind};
pub use resolve::{resolve_model, ModelSelection};
pub use rig_client::RigProvider;

/// Token counts reported by the provider for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Everything the provider needs for one completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolDefinition>>,
}

/// A complete (non-streamed) reply.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant message, possibly carrying tool calls.
    pub message: Message,
    pub usage: Option<Usage>,
}

/// Transport-level failures. Any of these ends the current turn.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("stream ended before the final chunk")]
    Incomplete,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// A chat model the conversation loop can drive.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Sends the request and waits for the whole reply.
    async fn send_blocking(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Starts a streamed reply.
    ///
    /// The returned channel yields chunks for a single stream id and ends
    /// with either a final chunk or an error chunk. Producers stop early
    /// once `cancel` fires.
    async fn send_streaming(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError>;

    /// Whether [`LlmProvider::send_streaming`] delivers incrementally.
    fn supports_streaming(&self) -> bool {
        true
    }
}
