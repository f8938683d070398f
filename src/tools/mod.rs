//! Tools the model can call, and the registry that dispatches them.
//!
//! The conversation loop only sees the [`ToolRegistry`] trait. [`Registry`]
//! is the built-in implementation holding nagare's [`Tool`]s.

pub mod bash_tool;
pub mod grep_tool;
pub mod read_file;
pub mod write_file;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::message::Arguments;
use bash_tool::BashTool;
use grep_tool::GrepTool;
use read_file::ReadFileTool;
use write_file::WriteFileTool;

/// Definition sent to the LLM so it knows what tools are available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

/// Outcome of a tool that ran.
///
/// A tool that ran but could not do its job reports `success: false` with
/// an error text; that still goes back to the model as a normal result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(message.into()),
        }
    }

    /// Text fed back to the model: the error text for a failed run when
    /// there is one, the content otherwise.
    pub fn output(&self) -> &str {
        match &self.error {
            Some(err) if !self.success && !err.is_empty() => err,
            _ => &self.content,
        }
    }
}

/// Registry-level failures: the tool could not be run at all.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("{0}")]
    Execution(String),
    #[error("unsupported tool definition format: {0}")]
    UnsupportedFormat(String),
    #[error("tool execution cancelled")]
    Cancelled,
    #[error("no tool registry configured")]
    NoRegistry,
}

/// Every built-in tool implements this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the LLM uses to call this tool.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema describing the tool's input parameters.
    fn schema(&self) -> Value;

    /// Execute the tool with the model-supplied arguments.
    async fn execute(&self, input: &Arguments) -> anyhow::Result<ToolResult>;
}

/// The set of tools a conversation loop may call.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Definitions for every tool, in the dialect named by `format`.
    fn definitions(&self, format: &str) -> Result<Vec<ToolDefinition>, ToolError>;

    /// Runs one tool. Implementations stop early once `cancel` fires.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        name: &str,
        arguments: &Arguments,
    ) -> Result<ToolResult, ToolError>;
}

/// Definition formats [`Registry`] accepts.
///
/// Both yield the same neutral `{name, description, parameters}` shape with a
/// JSON Schema for the parameters. rig's provider clients translate that into
/// each vendor's wire format, so the tag only gates what callers may ask for.
pub const SUPPORTED_FORMATS: &[&str] = &["openai", "anthropic"];

/// Holds the built-in tools and dispatches calls by name.
#[derive(Default)]
pub struct Registry {
    tools: Vec<Arc<dyn Tool>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Lookups return the first tool with a matching name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.push(Arc::new(tool));
    }

    /// Create a registry with all built-in tools rooted at `project_root`.
    pub fn with_builtins(project_root: PathBuf) -> Self {
        let mut registry = Self::new();
        registry.register(ReadFileTool::new(project_root.clone()));
        registry.register(GrepTool::new(project_root.clone()));
        registry.register(WriteFileTool::new(project_root.clone()));
        registry.register(BashTool::new(project_root));
        registry
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }
}

#[async_trait]
impl ToolRegistry for Registry {
    fn definitions(&self, format: &str) -> Result<Vec<ToolDefinition>, ToolError> {
        if !SUPPORTED_FORMATS.contains(&format) {
            return Err(ToolError::UnsupportedFormat(format.to_string()));
        }
        Ok(self
            .tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect())
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        name: &str,
        arguments: &Arguments,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .find(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        tracing::debug!(tool = %name, "executing tool");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            result = tool.execute(arguments) => {
                result.map_err(|err| ToolError::Execution(format!("{err:#}")))
            }
        }
    }
}

/// Deserializes a tool's typed input from its argument map.
pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(
    tool: &str,
    arguments: &Arguments,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments.clone())).map_err(|e| {
        ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: e.to_string(),
        }
    })
}
