//! Runs one requested tool call and folds the outcome into a message.
//!
//! Registry failures never escape from here: they become a `tool` message
//! the model can read, and the call's activity node is marked as failed.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::update::{StreamingUpdate, UpdateSink};
use crate::activity::{ActivityTree, OperationKind};
use crate::message::{Arguments, Message, ToolCall};
use crate::tools::{ToolError, ToolRegistry};

/// Owner name recorded on tool activity nodes.
const TOOL_OWNER: &str = "tool-runner";

/// Argument keys worth showing for tools without a dedicated rule.
const COMMON_KEYS: &[&str] = &[
    "command", "query", "url", "path", "file_path", "search", "text", "input",
];

/// What a tool call left behind.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// The `tool` message to append to the conversation.
    pub message: Message,
    /// True when the registry failed or the tool reported failure.
    pub failed: bool,
}

#[derive(Clone)]
pub struct ToolRunner {
    registry: Option<Arc<dyn ToolRegistry>>,
}

impl ToolRunner {
    pub fn new(registry: Option<Arc<dyn ToolRegistry>>) -> Self {
        Self { registry }
    }

    /// Executes `call`, tracking it as a child of `parent` in `tree`.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        call: &ToolCall,
        tree: &mut ActivityTree,
        parent: Option<&str>,
        sink: &UpdateSink,
    ) -> ToolOutcome {
        let name = call.function_name.as_str();
        let label = format!("{name}({})", summarize(call));
        let node_id = format!("tool-{}", uuid::Uuid::new_v4());
        let tracked = match tree.add_node(&node_id, TOOL_OWNER, &label, OperationKind::Tool, parent) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(tool = %name, error = %err, "not tracking tool activity");
                false
            }
        };
        if tracked {
            refresh(tree, sink).await;
        }

        let result = match &self.registry {
            Some(registry) => registry.execute(cancel, name, &call.arguments).await,
            None => Err(ToolError::NoRegistry),
        };

        let outcome = match result {
            Ok(result) => {
                if tracked {
                    finish(tree, &node_id, None);
                }
                ToolOutcome {
                    message: Message::tool_result(call, result.output()),
                    failed: !result.success,
                }
            }
            Err(err) => {
                tracing::warn!(tool = %name, error = %err, "tool execution failed");
                if tracked {
                    finish(tree, &node_id, Some(err.to_string()));
                }
                ToolOutcome {
                    message: Message::tool_result(call, format!("Tool execution failed: {err}")),
                    failed: true,
                }
            }
        };
        if tracked {
            refresh(tree, sink).await;
        }
        outcome
    }
}

fn finish(tree: &mut ActivityTree, node_id: &str, error: Option<String>) {
    let result = match error {
        Some(err) => tree.fail(node_id, err),
        None => tree.complete(node_id),
    };
    if let Err(err) = result {
        tracing::warn!(node = %node_id, error = %err, "could not finalize tool activity");
    }
}

async fn refresh(tree: &ActivityTree, sink: &UpdateSink) {
    sink.send(StreamingUpdate::ActivityUpdate {
        tree: tree.render(),
    })
    .await;
}

fn string_arg<'a>(args: &'a Arguments, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Short human-readable description of what a call will do.
pub fn summarize(call: &ToolCall) -> String {
    let args = &call.arguments;
    if args.is_empty() {
        return String::new();
    }

    let specific = match call.function_name.as_str() {
        "bash" => string_arg(args, "command").map(str::to_string),
        "file_read" | "write_file" => string_arg(args, "file_path").map(str::to_string),
        "grep" => string_arg(args, "pattern").map(|pattern| match string_arg(args, "path") {
            Some(path) => format!("{pattern} in {path}"),
            None => pattern.to_string(),
        }),
        "web_fetch" => string_arg(args, "url").map(str::to_string),
        _ => COMMON_KEYS
            .iter()
            .find_map(|key| string_arg(args, key))
            .or_else(|| args.values().filter_map(Value::as_str).find(|s| !s.is_empty()))
            .map(str::to_string),
    };
    if let Some(summary) = specific {
        return summary;
    }

    let pairs: Vec<String> = args
        .iter()
        .filter_map(|(key, value)| match value.as_str() {
            Some(s) if !s.is_empty() => Some(format!("{key}={s}")),
            _ => None,
        })
        .collect();
    if pairs.is_empty() {
        "...".to_string()
    } else {
        pairs.join(", ")
    }
}
