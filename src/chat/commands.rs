//! Slash command handlers for the chat REPL.
//!
//! Returns a [`CommandAction`] so the REPL loop can decide how to proceed.

use colored::Colorize;

use crate::conversation::Conversation;
use crate::format;
use crate::message::Role;

/// Action returned by slash command handling.
#[derive(Debug, PartialEq)]
pub(crate) enum CommandAction {
    Continue,
    Unknown(String),
}

/// Dispatch and handle a slash command.
///
/// `last_activity` is the rendered activity tree of the previous turn.
pub(crate) fn handle_slash_command(
    command: &str,
    conversation: &mut Conversation,
    last_activity: &str,
) -> CommandAction {
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "/history" => {
            for msg in conversation.messages() {
                if msg.role == Role::System {
                    continue;
                }
                println!("{}", format::format_message(msg));
                println!();
            }
            CommandAction::Continue
        }
        "/reset" | "/clear" => {
            conversation.reset();
            println!("{}", "History cleared.".dimmed());
            CommandAction::Continue
        }
        "/tree" => {
            if last_activity.is_empty() {
                println!("{}", "No activity yet.".dimmed());
            } else {
                println!("{last_activity}");
            }
            CommandAction::Continue
        }
        "/model" => {
            if arg.is_empty() {
                println!("{} {}", "model:".bold(), conversation.model().yellow());
            } else {
                conversation.set_model(arg);
                println!("{} {}", "switched to".dimmed(), arg.yellow());
            }
            CommandAction::Continue
        }
        "/help" => {
            println!("{}", "Commands:".bold());
            println!("  {} - show conversation history", "/history".cyan());
            println!("  {} - clear conversation (keeps the system prompt)", "/reset".cyan());
            println!("  {} - show the last turn's activity tree", "/tree".cyan());
            println!("  {} - show or switch the model", "/model [name]".cyan());
            println!("  {} - show this help", "/help".cyan());
            println!("  {} - cancel the running turn", "Ctrl+C".cyan());
            println!("  {} - exit", "Ctrl+D".cyan());
            CommandAction::Continue
        }
        _ => CommandAction::Unknown(name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn test_reset_keeps_system_prompt() {
        let mut conv = Conversation::with_system("m", "sys")
            .with_message(Message::user("hi"))
            .with_message(Message::assistant("hello"));

        assert_eq!(
            handle_slash_command("/reset", &mut conv, ""),
            CommandAction::Continue
        );
        assert_eq!(conv.len(), 1);
        assert!(conv.has_system_message());
    }

    #[test]
    fn test_model_switch() {
        let mut conv = Conversation::new("old");
        handle_slash_command("/model  new-model ", &mut conv, "");
        assert_eq!(conv.model(), "new-model");
    }

    #[test]
    fn test_unknown_command() {
        let mut conv = Conversation::new("m");
        assert_eq!(
            handle_slash_command("/nope extra", &mut conv, ""),
            CommandAction::Unknown("/nope".into())
        );
    }
}
