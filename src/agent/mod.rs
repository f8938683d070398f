//! Tool-calling conversation loop.
//!
//! [`ConversationLoop`] sends the conversation to an [`LlmProvider`], runs
//! any tools the model asks for through a [`ToolRegistry`], and repeats
//! until the model answers in plain text or the iteration budget runs out.
//! Observers follow along through [`StreamingUpdate`]s.
//!
//! [`LlmProvider`]: crate::provider::LlmProvider
//! [`ToolRegistry`]: crate::tools::ToolRegistry

mod engine;
mod tool_exec;
mod update;

pub use engine::{
    ConversationLoop, FinishedTurn, LoopError, LoopOutcome, LoopSettings, Prompt, StreamingTurn,
    TurnReport,
};
pub use tool_exec::{summarize, ToolOutcome, ToolRunner};
pub use update::{StreamingUpdate, UpdateSink};

#[cfg(test)]
mod tests;
