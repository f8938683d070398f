//! Terminal formatting for committed conversation messages.

use colored::Colorize;

use crate::message::{Message, Role};

/// Formats a message for `/history` and replay: a coloured role label on one
/// line, the body below it.
pub fn format_message(msg: &Message) -> String {
    format!("{}\n{}", role_label(msg.role), body(msg))
}

fn role_label(role: Role) -> String {
    match role {
        Role::User => "you:".green().bold().to_string(),
        Role::Assistant => "nagare:".cyan().bold().to_string(),
        Role::System => "system:".dimmed().to_string(),
        Role::Tool => "tool:".yellow().to_string(),
        Role::ToolProgress => "running:".yellow().dimmed().to_string(),
        Role::Error => "error:".red().bold().to_string(),
    }
}

fn body(msg: &Message) -> String {
    match msg.role {
        Role::User => msg.text().to_string(),
        Role::Assistant => {
            let mut out = render_markdown_lite(msg.text());
            for call in &msg.tool_calls {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("  {} {}", "→".yellow(), call.function_name.bold()));
            }
            out
        }
        Role::Error => msg.text().red().to_string(),
        _ => msg.text().dimmed().to_string(),
    }
}

/// Light markdown for terminal output: `**bold**`, `` `code` `` and fenced
/// code blocks. Everything else passes through untouched.
pub fn render_markdown_lite(text: &str) -> String {
    let mut lines = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if let Some(lang) = line.strip_prefix("```") {
            in_fence = !in_fence;
            if in_fence && !lang.is_empty() {
                lines.push(format!("  {}", lang.dimmed()));
            } else if !in_fence {
                lines.push(String::new());
            }
            continue;
        }
        if in_fence {
            lines.push(format!("  {}", line.dimmed()));
        } else {
            lines.push(render_inline(line));
        }
    }

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines.join("\n")
}

#[derive(Clone, Copy, PartialEq)]
enum Span {
    Plain,
    Bold,
    Code,
}

/// Styles one line. Unclosed markers are printed literally.
fn render_inline(line: &str) -> String {
    let mut out = String::new();
    let mut rest = line;

    while !rest.is_empty() {
        let (marker, span) = match (rest.find("**"), rest.find('`')) {
            (Some(b), Some(c)) if c < b => (c, Span::Code),
            (Some(b), _) => (b, Span::Bold),
            (None, Some(c)) => (c, Span::Code),
            (None, None) => (rest.len(), Span::Plain),
        };
        out.push_str(&rest[..marker]);
        if span == Span::Plain {
            break;
        }

        let delim = if span == Span::Bold { "**" } else { "`" };
        let after = &rest[marker + delim.len()..];
        match after.find(delim) {
            Some(end) => {
                let inner = &after[..end];
                let styled = if span == Span::Bold {
                    inner.bold()
                } else {
                    inner.dimmed()
                };
                out.push_str(&styled.to_string());
                rest = &after[end + delim.len()..];
            }
            None => {
                out.push_str(&rest[marker..]);
                break;
            }
        }
    }
    out
}
