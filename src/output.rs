//! Output rendering for nagare.
//!
//! The [`Renderer`] trait decouples the conversation loop's update stream
//! from the display. [`StdoutRenderer`] writes fragments to the terminal as
//! they arrive; [`render_updates`] drains a turn's channel into any renderer.

use std::io::{self, Write};

use colored::Colorize;
use tokio::sync::mpsc;

use crate::accumulator::StreamStats;
use crate::agent::StreamingUpdate;
use crate::format;
use crate::message::Message;

/// Receives the events of one turn.
pub trait Renderer {
    fn render_started(&mut self, model: &str);

    /// Called for every streamed fragment, in order.
    fn render_fragment(&mut self, fragment: &str);

    fn render_tool_started(&mut self, tool_name: &str, summary: &str);

    fn render_tool_finished(&mut self, tool_name: &str, failed: bool);

    /// Called when an assistant message is committed. `activity` is the
    /// rendered activity tree at that point.
    fn render_message(&mut self, message: &Message, stats: Option<&StreamStats>, activity: &str);

    /// Advisory activity snapshot. Renderers may ignore it.
    fn render_activity(&mut self, _tree: &str) {}

    /// The turn failed. Nothing else follows.
    fn render_error(&mut self, err: &str);
}

/// Forwards every update on `updates` to `renderer` until the channel closes.
pub async fn render_updates(
    updates: &mut mpsc::Receiver<StreamingUpdate>,
    renderer: &mut impl Renderer,
) {
    while let Some(update) = updates.recv().await {
        match update {
            StreamingUpdate::StreamStarted { model } => renderer.render_started(&model),
            StreamingUpdate::ChunkReceived { fragment, .. } => renderer.render_fragment(&fragment),
            StreamingUpdate::ToolExecutionStarted { tool_name, summary } => {
                renderer.render_tool_started(&tool_name, &summary)
            }
            StreamingUpdate::ToolExecutionComplete { tool_name, failed } => {
                renderer.render_tool_finished(&tool_name, failed)
            }
            StreamingUpdate::MessageComplete {
                message,
                stats,
                activity,
                ..
            } => renderer.render_message(&message, stats.as_ref(), &activity),
            StreamingUpdate::ActivityUpdate { tree } => renderer.render_activity(&tree),
            StreamingUpdate::StreamError { error } => renderer.render_error(&error.to_string()),
        }
    }
}

/// Renders a turn directly to stdout.
///
/// Fragments are printed with an explicit flush so the reply appears as it
/// is generated. A message that arrives without having been streamed is
/// printed in full, with markdown-lite formatting.
#[derive(Debug, Default)]
pub struct StdoutRenderer {
    /// Bytes of the current message already shown through fragments.
    streamed: usize,
    chunks: usize,
    show_activity: bool,
}

impl StdoutRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also print the activity tree whenever it is refreshed.
    pub fn with_activity(mut self, show: bool) -> Self {
        self.show_activity = show;
        self
    }

    /// Fragments received over the renderer's lifetime.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }
}

impl Renderer for StdoutRenderer {
    fn render_started(&mut self, model: &str) {
        tracing::debug!(%model, "stream started");
    }

    fn render_fragment(&mut self, fragment: &str) {
        print!("{fragment}");
        io::stdout().flush().ok();
        self.streamed += fragment.len();
        self.chunks += 1;
    }

    fn render_tool_started(&mut self, tool_name: &str, summary: &str) {
        if self.streamed > 0 {
            println!();
            self.streamed = 0;
        }
        println!("{} {}", "⚙".yellow(), format!("{tool_name}({summary})").dimmed());
    }

    fn render_tool_finished(&mut self, tool_name: &str, failed: bool) {
        if failed {
            println!("  {} {}", "✗".red(), format!("{tool_name} failed").dimmed());
        }
    }

    fn render_message(&mut self, message: &Message, stats: Option<&StreamStats>, activity: &str) {
        if self.show_activity && !message.has_tool_calls() {
            self.render_activity(activity);
        }
        if self.streamed == 0 && !message.content.is_empty() {
            print!("{}", format::render_markdown_lite(&message.content));
        }
        let shown = self.streamed > 0 || !message.content.is_empty();
        self.streamed = 0;
        if message.has_tool_calls() && !shown {
            return;
        }
        println!();
        if let Some(stats) = stats.filter(|_| !message.has_tool_calls()) {
            println!();
            println!(
                "{}",
                format!(
                    "[{} chunks, {:.1}s]",
                    stats.chunk_count,
                    stats.duration.num_milliseconds() as f64 / 1000.0
                )
                .dimmed()
            );
        }
    }

    fn render_activity(&mut self, tree: &str) {
        if self.show_activity && !tree.is_empty() {
            eprintln!("{}", tree.dimmed());
        }
    }

    /// Only closes the partial line; the caller reports the failure from the
    /// turn's outcome.
    fn render_error(&mut self, err: &str) {
        if self.streamed > 0 {
            println!();
            self.streamed = 0;
        }
        tracing::debug!(error = %err, "turn ended with an error");
    }
}
