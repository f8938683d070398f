//! Entry point for nagare, a streaming tool-calling assistant for the terminal.
//!
//! Loads environment variables and configuration, sets up logging, parses
//! CLI arguments via [`nagare::cli`], and dispatches to the chosen subcommand.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use nagare::config::Config;
use nagare::constants::{DEFAULT_LOG_LEVEL, LOG_ENV_VAR};

/// Logs go to stderr so they never interleave with streamed replies.
/// `NAGARE_LOG` wins over the config's `log_level`.
fn init_logging(config_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(config_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = nagare::cli::parse();
    let config = Config::load()?;
    init_logging(config.log_level());
    nagare::cli::run(cli, config).await
}
