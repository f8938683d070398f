//! Command-line interface definition and dispatch for nagare.
//!
//! Uses [`clap`] derive macros. Every subcommand that talks to a model builds
//! the same stack: config, provider, built-in tools, and a
//! [`ConversationLoop`] over them.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{ConversationLoop, LoopOutcome, LoopSettings, Prompt, TurnReport};
use crate::config::Config;
use crate::conversation::Conversation;
use crate::output::{self, StdoutRenderer};
use crate::provider::{self, ModelSelection, RigProvider};
use crate::tools::{Registry, ToolRegistry};
use crate::{chat, format};

/// Top-level CLI structure for nagare.
#[derive(Parser)]
#[command(name = "nagare", about = "A streaming tool-calling assistant for the terminal")]
pub struct Cli {
    /// Provider to use (anthropic, openai, openrouter, ollama)
    #[arg(short, long, global = true)]
    pub provider: Option<String>,
    /// Model to use (overrides config); `provider/model` is accepted
    #[arg(short, long, global = true)]
    pub model: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a one-shot question
    Ask {
        /// The question to ask
        prompt: Vec<String>,
        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
        /// Ceiling on request/tool rounds (overrides config)
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Print the activity tree as the turn progresses
        #[arg(long)]
        activity: bool,
    },
    /// Start an interactive chat session
    Chat {
        /// Print the activity tree as each turn progresses
        #[arg(long)]
        activity: bool,
    },
    /// List the built-in tools
    Tools,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective config
    Show,
    /// Print the config file location
    Path,
}

pub fn parse() -> Cli {
    Cli::parse()
}

/// Dispatches the parsed CLI command to its handler.
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Ask {
            prompt,
            no_stream,
            max_iterations,
            activity,
        } => {
            let prompt = Prompt::new(prompt.join(" ")).map_err(|_| {
                anyhow::anyhow!("No prompt provided. Usage: nagare ask \"your question here\"")
            })?;
            let selection =
                provider::resolve_model(cli.provider.as_deref(), cli.model.as_deref(), &config)?;
            let mut settings = config.loop_settings();
            if let Some(limit) = max_iterations {
                settings.max_iterations = limit.max(1);
            }
            if no_stream {
                settings.streaming = false;
            }
            let engine = build_loop(&config, &selection, settings)?;
            let conversation = Conversation::with_system(&selection.model, config.system_prompt());

            println!(
                "{} [model: {}]",
                "nagare".bold().cyan(),
                selection.model.yellow()
            );
            println!();
            println!("{} {}", ">".green().bold(), prompt.as_str());
            println!();

            let cancel = CancellationToken::new();
            let watcher = cancel_on_ctrl_c(&cancel);
            let report = if no_stream {
                ask_blocking(&engine, conversation, &prompt, &cancel).await
            } else {
                ask_streaming(&engine, conversation, prompt, cancel, activity).await?
            };
            watcher.abort();
            report_outcome(&report)
        }
        Commands::Chat { activity } => {
            let selection =
                provider::resolve_model(cli.provider.as_deref(), cli.model.as_deref(), &config)?;
            let engine = build_loop(&config, &selection, config.loop_settings())?;
            chat::run_chat(&config, &selection, engine, activity).await
        }
        Commands::Tools => {
            let registry = Registry::with_builtins(std::env::current_dir()?);
            for def in registry.definitions(&config.loop_settings().tool_definition_format)? {
                println!("{}  {}", def.name.cyan().bold(), def.description.dimmed());
            }
            Ok(())
        }
        Commands::Config { action } => {
            match action {
                ConfigAction::Show => {
                    let path = Config::config_path()?;
                    println!("{} {}", "Config path:".bold(), path.display());
                    println!();
                    println!("{}", toml::to_string_pretty(&config)?);
                }
                ConfigAction::Path => println!("{}", Config::config_path()?.display()),
            }
            Ok(())
        }
    }
}

/// Wires the selected provider and the built-in tools into a loop.
pub(crate) fn build_loop(
    config: &Config,
    selection: &ModelSelection,
    settings: LoopSettings,
) -> Result<ConversationLoop> {
    let provider = RigProvider::from_config(config, selection)?;
    let registry = Registry::with_builtins(std::env::current_dir()?);
    tracing::debug!(tools = ?registry.names(), "tools registered");
    Ok(ConversationLoop::new(
        Arc::new(provider),
        Some(Arc::new(registry)),
        settings,
    ))
}

/// Cancels `token` on the first Ctrl+C. Abort the handle once the turn ends.
pub(crate) fn cancel_on_ctrl_c(token: &CancellationToken) -> JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling turn");
            token.cancel();
        }
    })
}

async fn ask_blocking(
    engine: &ConversationLoop,
    mut conversation: Conversation,
    prompt: &Prompt,
    cancel: &CancellationToken,
) -> TurnReport {
    let report = engine.send(&mut conversation, prompt.as_str(), cancel).await;
    if let Ok(LoopOutcome::Completed(message)) = &report.outcome {
        println!("{}", format::render_markdown_lite(message.text()));
    }
    report
}

async fn ask_streaming(
    engine: &ConversationLoop,
    conversation: Conversation,
    prompt: Prompt,
    cancel: CancellationToken,
    activity: bool,
) -> Result<TurnReport> {
    let mut turn = engine.start_streaming(conversation, prompt, cancel);
    let mut renderer = StdoutRenderer::new().with_activity(activity);
    output::render_updates(&mut turn.updates, &mut renderer).await;
    let finished = turn.finish().await?;
    Ok(finished.report)
}

/// Prints the turn's footer and turns a failure into the process error.
pub(crate) fn report_outcome(report: &TurnReport) -> Result<()> {
    match &report.outcome {
        Ok(LoopOutcome::Completed(_)) => {
            if let Some(usage) = report.usage {
                println!(
                    "{}",
                    format!(
                        "Tokens: {} in / {} out ({} iteration{})",
                        usage.prompt_tokens,
                        usage.completion_tokens,
                        report.iterations,
                        if report.iterations == 1 { "" } else { "s" }
                    )
                    .dimmed()
                );
            }
            Ok(())
        }
        Ok(LoopOutcome::Cancelled) => {
            println!("{}", "cancelled.".dimmed());
            Ok(())
        }
        Err(err) if err.rolled_back() => {
            Err(anyhow::anyhow!("{err}; the conversation was left as it was"))
        }
        Err(err) => Err(anyhow::anyhow!("{err}; the partial exchange was kept")),
    }
}
