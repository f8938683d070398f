//! Bash tool: shell command execution with a timeout and output cap.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

use super::{parse_input, Tool, ToolResult};
use crate::constants::{BASH_DEFAULT_TIMEOUT_SECS, BASH_MAX_OUTPUT_SIZE, BASH_STRIPPED_ENV_VARS};
use crate::message::Arguments;

/// Runs `sh -c <command>` in the project root.
///
/// Provider API keys are stripped from the child's environment. A non-zero
/// exit, a timeout, or a spawn failure is reported as a failed result, not
/// as an error, so the model sees what went wrong.
pub struct BashTool {
    project_root: PathBuf,
}

impl BashTool {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }
}

#[derive(Deserialize)]
struct BashInput {
    command: String,
    timeout: Option<u64>,
}

/// Truncate `output` to at most `BASH_MAX_OUTPUT_SIZE` bytes on a char
/// boundary, appending a notice when truncation occurs.
fn cap_output(output: &str) -> String {
    if output.len() <= BASH_MAX_OUTPUT_SIZE {
        return output.to_string();
    }
    let mut end = BASH_MAX_OUTPUT_SIZE;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n... output truncated at {} bytes",
        &output[..end],
        BASH_MAX_OUTPUT_SIZE
    )
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the project root and return its output."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 30)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: &Arguments) -> Result<ToolResult> {
        let input: BashInput = parse_input(self.name(), input)?;
        let timeout_secs = input.timeout.unwrap_or(BASH_DEFAULT_TIMEOUT_SECS);

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&input.command)
            .current_dir(&self.project_root)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for var in BASH_STRIPPED_ENV_VARS {
            cmd.env_remove(var);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return Ok(ToolResult::error(format!("Failed to execute command: {e}"))),
        };

        let output =
            match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
                .await
            {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Ok(ToolResult::error(format!("Failed to execute command: {e}")))
                }
                Err(_) => {
                    tracing::warn!(command = %input.command, timeout_secs, "bash command timed out");
                    return Ok(ToolResult::error(format!(
                        "Command timed out after {timeout_secs}s"
                    )));
                }
            };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            text.push_str("\n--- stderr ---\n");
            text.push_str(&stderr);
        }
        let text = cap_output(&text);

        match output.status.code().unwrap_or(-1) {
            0 => Ok(ToolResult::success(text.trim())),
            code => Ok(ToolResult {
                success: false,
                content: text.trim().to_string(),
                error: Some(format!("{}\nExit code: {code}", text.trim())),
            }),
        }
    }
}
