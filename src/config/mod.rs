//! Configuration types and path resolution for nagare.
//!
//! Settings are TOML, stored at the platform's XDG config path
//! (e.g. `~/.config/nagare/config.toml` on Linux) with optional per-project
//! overrides in `nagare.toml`.

mod loader;
mod paths;
mod resolve;
mod types;

pub use types::{AgentConfig, Config, ProviderConfig, ProviderEntry};

use anyhow::Result;

impl Config {
    /// Load config with precedence: project > global > defaults.
    /// Creates default config file if none exists.
    pub fn load() -> Result<Self> {
        let global = Self::load_global()?;
        let project = Self::load_project()?;

        let mut config = global;
        if let Some(proj) = project {
            config = Self::merge(config, proj);
        }

        config.resolve_substitutions();
        Ok(config)
    }
}
