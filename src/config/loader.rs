//! File loading and merging for nagare configuration.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::types::{AgentConfig, Config, ProviderConfig, ProviderEntry};
use crate::constants::{
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL, OLLAMA_DEFAULT_BASE_URL,
    PROJECT_CONFIG_FILENAME,
};

impl Config {
    /// Loads the global config from `~/.config/nagare/config.toml`.
    ///
    /// If no config file exists, writes one with defaults (including
    /// `{env:VAR}` placeholders for API keys) and returns it.
    pub(super) fn load_global() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            let default_toml = default_config_toml();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &default_toml)
                .with_context(|| format!("Failed to write default config to {:?}", path))?;
            tracing::info!(path = %path.display(), "wrote default config");
            return toml::from_str(&default_toml).context("Failed to parse default config");
        }
        Self::from_file(&path)
    }

    /// Look for `nagare.toml` in the current dir, then walk up to the git root.
    pub(super) fn load_project() -> Result<Option<Config>> {
        let mut dir = std::env::current_dir()?;
        loop {
            let candidate = dir.join(PROJECT_CONFIG_FILENAME);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "using project config");
                return Self::from_file(&candidate).map(Some);
            }
            if dir.join(".git").exists() || !dir.pop() {
                break;
            }
        }
        Ok(None)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config at {:?}", path))
    }

    /// Merge project config over global config. Project values win when present.
    pub(super) fn merge(global: Config, project: Config) -> Config {
        Config {
            model: project.model.or(global.model),
            provider: ProviderConfig {
                openai: merge_entry(global.provider.openai, project.provider.openai),
                anthropic: merge_entry(global.provider.anthropic, project.provider.anthropic),
                ollama: merge_entry(global.provider.ollama, project.provider.ollama),
                openrouter: merge_entry(global.provider.openrouter, project.provider.openrouter),
            },
            default_provider: project.default_provider.or(global.default_provider),
            system_prompt: project.system_prompt.or(global.system_prompt),
            log_level: project.log_level.or(global.log_level),
            agent: AgentConfig {
                max_iterations: project.agent.max_iterations.or(global.agent.max_iterations),
                update_buffer: project.agent.update_buffer.or(global.agent.update_buffer),
                activity_refresh_chunks: project
                    .agent
                    .activity_refresh_chunks
                    .or(global.agent.activity_refresh_chunks),
                terminal_send_timeout_ms: project
                    .agent
                    .terminal_send_timeout_ms
                    .or(global.agent.terminal_send_timeout_ms),
                streaming: project.agent.streaming.or(global.agent.streaming),
                tool_definition_format: project
                    .agent
                    .tool_definition_format
                    .or(global.agent.tool_definition_format),
            },
        }
    }
}

fn merge_entry(global: Option<ProviderEntry>, project: Option<ProviderEntry>) -> Option<ProviderEntry> {
    match (global, project) {
        (Some(g), Some(p)) => Some(ProviderEntry {
            api_key: p.api_key.or(g.api_key),
            base_url: p.base_url.or(g.base_url),
            model: p.model.or(g.model),
        }),
        (g, p) => p.or(g),
    }
}

fn default_config_toml() -> String {
    format!(
        r#"model = "{DEFAULT_MODEL}"
log_level = "{DEFAULT_LOG_LEVEL}"

[agent]
max_iterations = {DEFAULT_MAX_ITERATIONS}
streaming = true

[provider.anthropic]
api_key = "{{env:ANTHROPIC_API_KEY}}"

[provider.openai]
api_key = "{{env:OPENAI_API_KEY}}"

[provider.openrouter]
api_key = "{{env:OPENROUTER_API_KEY}}"

[provider.ollama]
base_url = "{OLLAMA_DEFAULT_BASE_URL}"
"#
    )
}
