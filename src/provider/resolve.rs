//! Picks the provider and model for a run.
//!
//! Priority is CLI flags, then config, then built-in defaults. A
//! `provider/model` shorthand is accepted in `--model` when `--provider` is
//! not given.

use anyhow::Result;

use super::kind::{default_model_for, ProviderKind};
use crate::config::Config;
use crate::constants::DEFAULT_PROVIDER;

/// Resolved provider + model pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub provider: ProviderKind,
    pub model: String,
}

/// Resolve which provider and model to use.
///
/// Accepted forms:
///   --model anthropic/claude-sonnet-4-6   (shorthand, only without --provider)
///   --provider openrouter --model "org/model-name"   (slash kept in the model)
///   --provider ollama   (provider's default model)
///   (nothing)   (config, then built-in default)
pub fn resolve_model(
    cli_provider: Option<&str>,
    cli_model: Option<&str>,
    config: &Config,
) -> Result<ModelSelection> {
    if cli_provider.is_none() {
        if let Some((prov, model)) = cli_model.and_then(|m| m.split_once('/')) {
            if let Ok(provider) = prov.parse::<ProviderKind>() {
                return Ok(ModelSelection {
                    provider,
                    model: model.to_string(),
                });
            }
        }
    }

    let provider: ProviderKind = cli_provider
        .or(config.provider_name())
        .unwrap_or(DEFAULT_PROVIDER)
        .parse()?;

    let model = cli_model
        .map(String::from)
        .or_else(|| config.model_for(provider))
        .unwrap_or_else(|| default_model_for(provider).to_string());

    Ok(ModelSelection { provider, model })
}
