//! Struct definitions and serde defaults for nagare configuration.

use serde::{Deserialize, Serialize};

/// Root configuration, deserialized from `config.toml` / `nagare.toml`.
///
/// Every field is optional so a partial project file can be layered over
/// the global one.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Default model identifier; `provider/model` shorthand is accepted.
    #[serde(default)]
    pub model: Option<String>,
    /// Per-provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Default provider name (e.g., "anthropic", "ollama").
    #[serde(default)]
    pub default_provider: Option<String>,
    /// System prompt placed at the start of every conversation.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// `tracing` filter used when `NAGARE_LOG` is unset.
    #[serde(default)]
    pub log_level: Option<String>,
    /// Conversation loop tuning.
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Provider-specific configuration map.
///
/// Only providers the user has configured will be `Some`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProviderConfig {
    pub openai: Option<ProviderEntry>,
    pub anthropic: Option<ProviderEntry>,
    pub ollama: Option<ProviderEntry>,
    pub openrouter: Option<ProviderEntry>,
}

/// Connection details for a single LLM provider.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProviderEntry {
    /// API key for authentication. Environment variables take precedence.
    pub api_key: Option<String>,
    /// Custom base URL (proxies, self-hosted instances).
    pub base_url: Option<String>,
    /// Model to use with this provider, overriding the global default.
    pub model: Option<String>,
}

/// The `[agent]` table.
///
/// Unset values fall back to the constants in [`crate::constants`].
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    /// Ceiling on request/tool round-trips per user message.
    pub max_iterations: Option<usize>,
    /// Capacity of the streaming update channel.
    pub update_buffer: Option<usize>,
    /// Chunks between activity refreshes while streaming.
    pub activity_refresh_chunks: Option<usize>,
    /// Bound on delivering a terminal update to a slow observer.
    pub terminal_send_timeout_ms: Option<u64>,
    /// Prefer incremental delivery when the provider supports it.
    pub streaming: Option<bool>,
    /// Format tag requested from the tool registry.
    pub tool_definition_format: Option<String>,
}
