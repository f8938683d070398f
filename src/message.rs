//! Message types for nagare's conversation log.
//!
//! Provides a structured [`Message`] type with a [`Role`] enum covering every
//! kind of entry the conversation loop produces, from user turns to tool
//! progress markers. These are nagare's internal types, converted to
//! provider-specific formats (e.g. rig-core's `Message`) when sent to the LLM.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::PROGRESS_SUMMARY_MAX_CHARS;

/// Tool arguments as sent by the model. Key order is preserved.
pub type Arguments = Map<String, Value>;

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned identifier, used to pair the result with the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the tool to invoke.
    pub function_name: String,
    /// Arguments to pass to the tool. Opaque to the conversation loop.
    #[serde(default)]
    pub arguments: Arguments,
}

impl ToolCall {
    pub fn new(function_name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: None,
            function_name: function_name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool that produced this message (`tool` and `tool_progress` roles).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The role of a message in the conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    /// Display-only marker recording which tool is about to run.
    /// Never sent to the provider.
    ToolProgress,
    Error,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text.into().trim())
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::with_role(Role::Error, text)
    }

    /// Creates an assistant message that requests tool calls.
    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, text)
        }
    }

    /// Creates a tool result message to feed back to the LLM.
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(call.function_name.clone()),
            tool_call_id: call.id.clone(),
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Creates a `name(summary)` progress marker for a tool about to run.
    ///
    /// Long summaries are cut to keep the marker on one line.
    pub fn tool_progress(tool_name: &str, summary: &str) -> Self {
        let shown = if summary.chars().count() > PROGRESS_SUMMARY_MAX_CHARS {
            let head: String = summary
                .chars()
                .take(PROGRESS_SUMMARY_MAX_CHARS - 3)
                .collect();
            format!("{head}...")
        } else {
            summary.to_string()
        };
        Self {
            tool_name: Some(tool_name.to_string()),
            ..Self::with_role(Role::ToolProgress, format!("{tool_name}({shown})"))
        }
    }

    pub fn text(&self) -> &str {
        &self.content
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "you"),
            Role::Assistant => write!(f, "nagare"),
            Role::Tool => write!(f, "tool"),
            Role::ToolProgress => write!(f, "running"),
            Role::Error => write!(f, "error"),
        }
    }
}
