//! Interactive chat REPL for nagare.
//!
//! Uses [`rustyline`] for line editing and history. The [`Conversation`] is
//! handed to the loop for each turn and taken back when the turn finishes,
//! so a failed or cancelled turn leaves it exactly as it was.

mod commands;

use anyhow::Result;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio_util::sync::CancellationToken;

use crate::agent::{ConversationLoop, Prompt};
use crate::cli::{cancel_on_ctrl_c, report_outcome};
use crate::config::Config;
use crate::conversation::Conversation;
use crate::output::{self, StdoutRenderer};
use crate::provider::ModelSelection;

/// Runs the interactive chat REPL.
///
/// # Readline behavior
///
/// - **Ctrl+C** at the prompt clears the line; during a turn it cancels it
/// - **Ctrl+D** exits
/// - History is persisted to `~/.cache/nagare/chat_history.txt`
pub async fn run_chat(
    config: &Config,
    selection: &ModelSelection,
    engine: ConversationLoop,
    show_activity: bool,
) -> Result<()> {
    let mut conversation = Conversation::with_system(&selection.model, config.system_prompt());
    let mut last_activity = String::new();

    println!(
        "{} [provider: {}] [model: {}] (/help for commands, Ctrl+D to exit)",
        "nagare chat".bold().cyan(),
        selection.provider.to_string().yellow(),
        selection.model.yellow(),
    );
    println!();

    let mut rl = DefaultEditor::new()?;
    let history_path = Config::history_path()?;
    if history_path.exists() {
        let _ = rl.load_history(&history_path);
    }

    loop {
        let line = match rl.readline(&format!("{} ", ">".green().bold())) {
            Ok(line) => line.trim().to_string(),
            Err(ReadlineError::Interrupted) => {
                println!("{}", "^C".dimmed());
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "goodbye.".dimmed());
                break;
            }
            Err(e) => {
                eprintln!("{} {}", "error:".red().bold(), e);
                break;
            }
        };
        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') {
            if let commands::CommandAction::Unknown(cmd) =
                commands::handle_slash_command(&line, &mut conversation, &last_activity)
            {
                println!("{} Unknown command: {}", "?".yellow(), cmd);
            }
            continue;
        }

        let _ = rl.add_history_entry(&line);
        let Ok(prompt) = Prompt::new(line) else {
            continue;
        };
        println!();

        let cancel = CancellationToken::new();
        let watcher = cancel_on_ctrl_c(&cancel);
        let mut turn = engine.start_streaming(conversation.clone(), prompt, cancel);
        let mut renderer = StdoutRenderer::new().with_activity(show_activity);
        output::render_updates(&mut turn.updates, &mut renderer).await;
        let finished = turn.finish().await;
        watcher.abort();

        match finished {
            Ok(finished) => {
                conversation = finished.conversation;
                last_activity = finished.report.activity.render();
                if let Err(e) = report_outcome(&finished.report) {
                    eprintln!("{} {}", "error:".red().bold(), e);
                }
            }
            Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
        }
        println!();
    }

    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = rl.save_history(&history_path);

    Ok(())
}
