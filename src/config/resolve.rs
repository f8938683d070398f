//! Environment variable substitution and typed accessors over [`Config`].

use std::time::Duration;

use super::types::{Config, ProviderEntry};
use crate::agent::LoopSettings;
use crate::constants::{
    DEFAULT_ACTIVITY_REFRESH_CHUNKS, DEFAULT_LOG_LEVEL, DEFAULT_MAX_ITERATIONS,
    DEFAULT_SYSTEM_PROMPT, DEFAULT_TERMINAL_SEND_TIMEOUT_MS, DEFAULT_TOOL_DEFINITION_FORMAT,
    DEFAULT_UPDATE_BUFFER,
};
use crate::provider::ProviderKind;

impl Config {
    /// Resolve `{env:VAR_NAME}` patterns in string fields.
    pub(super) fn resolve_substitutions(&mut self) {
        for field in [
            &mut self.model,
            &mut self.system_prompt,
            &mut self.default_provider,
            &mut self.log_level,
        ] {
            if let Some(value) = field {
                *value = Self::resolve_str(value);
            }
        }
        Self::resolve_provider_entry(&mut self.provider.openai);
        Self::resolve_provider_entry(&mut self.provider.anthropic);
        Self::resolve_provider_entry(&mut self.provider.ollama);
        Self::resolve_provider_entry(&mut self.provider.openrouter);
    }

    fn resolve_provider_entry(entry: &mut Option<ProviderEntry>) {
        if let Some(ref mut e) = entry {
            for field in [&mut e.api_key, &mut e.base_url, &mut e.model] {
                if let Some(value) = field {
                    *value = Self::resolve_str(value);
                }
            }
        }
    }

    /// Replace `{env:VAR}` with the environment variable value (empty if unset).
    pub(super) fn resolve_str(s: &str) -> String {
        let mut result = s.to_string();
        while let Some(start) = result.find("{env:") {
            let Some(end) = result[start..].find('}') else {
                break;
            };
            let var_name = &result[start + 5..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        }
        result
    }

    fn entry(&self, provider: ProviderKind) -> Option<&ProviderEntry> {
        match provider {
            ProviderKind::OpenAI => self.provider.openai.as_ref(),
            ProviderKind::Anthropic => self.provider.anthropic.as_ref(),
            ProviderKind::Ollama => self.provider.ollama.as_ref(),
            ProviderKind::OpenRouter => self.provider.openrouter.as_ref(),
        }
    }

    /// Resolve API key for a provider: env var first, then config value.
    pub fn resolve_api_key(&self, provider: &str) -> Option<String> {
        let env_key = format!("{}_API_KEY", provider.to_uppercase());
        if let Ok(val) = std::env::var(&env_key) {
            if !val.is_empty() {
                return Some(val);
            }
        }
        let kind = provider.parse::<ProviderKind>().ok()?;
        self.entry(kind)
            .and_then(|e| e.api_key.clone())
            .filter(|k| !k.is_empty())
    }

    /// Configured default provider name, if any.
    pub fn provider_name(&self) -> Option<&str> {
        self.default_provider.as_deref().filter(|p| !p.is_empty())
    }

    /// Model for `provider`: the provider's own entry, then the top-level
    /// `model` (with any `provider/` prefix stripped).
    pub fn model_for(&self, provider: ProviderKind) -> Option<String> {
        if let Some(model) = self.entry(provider).and_then(|e| e.model.clone()) {
            return Some(model);
        }
        let model = self.model.as_deref().filter(|m| !m.is_empty())?;
        match model.split_once('/') {
            Some((prefix, rest)) if prefix.parse::<ProviderKind>().is_ok() => {
                (prefix == provider.name()).then(|| rest.to_string())
            }
            _ => Some(model.to_string()),
        }
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Conversation loop settings with defaults filled in.
    pub fn loop_settings(&self) -> LoopSettings {
        let agent = &self.agent;
        LoopSettings {
            max_iterations: agent.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS).max(1),
            update_buffer: agent.update_buffer.unwrap_or(DEFAULT_UPDATE_BUFFER).max(1),
            activity_refresh_chunks: agent
                .activity_refresh_chunks
                .unwrap_or(DEFAULT_ACTIVITY_REFRESH_CHUNKS)
                .max(1),
            terminal_send_timeout: Duration::from_millis(
                agent
                    .terminal_send_timeout_ms
                    .unwrap_or(DEFAULT_TERMINAL_SEND_TIMEOUT_MS),
            ),
            streaming: agent.streaming.unwrap_or(true),
            tool_definition_format: agent
                .tool_definition_format
                .clone()
                .unwrap_or_else(|| DEFAULT_TOOL_DEFINITION_FORMAT.to_string()),
        }
    }
}
