//! file_read tool.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::{parse_input, Tool, ToolResult};
use crate::constants::{BINARY_DETECTION_BYTES, READ_FILE_MAX_SIZE};
use crate::message::Arguments;

pub struct ReadFileTool {
    /// Paths are resolved relative to this and may not leave it.
    project_root: PathBuf,
}

impl ReadFileTool {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let resolved = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.project_root.join(path)
        };
        let canonical = resolved
            .canonicalize()
            .map_err(|e| anyhow::anyhow!("Cannot open {path}: {e}"))?;
        let root_canonical = self.project_root.canonicalize()?;
        if !canonical.starts_with(&root_canonical) {
            anyhow::bail!("Path escapes project directory: {}", path);
        }
        Ok(canonical)
    }
}

#[derive(Deserialize)]
struct ReadFileInput {
    file_path: String,
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. Path is relative to the project root."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "File path relative to project root"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, input: &Arguments) -> Result<ToolResult> {
        let input: ReadFileInput = parse_input(self.name(), input)?;
        let path = self.resolve_path(&input.file_path)?;

        let metadata = tokio::fs::metadata(&path).await?;
        if metadata.len() > READ_FILE_MAX_SIZE {
            return Ok(ToolResult::error(format!(
                "File too large: {} bytes (max {})",
                metadata.len(),
                READ_FILE_MAX_SIZE
            )));
        }

        let content = tokio::fs::read(&path).await?;
        let check_len = content.len().min(BINARY_DETECTION_BYTES);
        if content[..check_len].contains(&0) {
            return Ok(ToolResult::error(
                "Binary file detected. Cannot display binary content.",
            ));
        }

        match String::from_utf8(content) {
            Ok(text) => Ok(ToolResult::success(text)),
            Err(_) => Ok(ToolResult::error("File is not valid UTF-8")),
        }
    }
}
