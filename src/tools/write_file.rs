//! write_file tool: writes content to a file, creating parent directories as needed.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};

use super::{parse_input, Tool, ToolResult};
use crate::message::Arguments;

/// Writes string content to a file within the project root.
///
/// # Errors
///
/// Fails if the resolved path escapes the project root or the write fails.
pub struct WriteFileTool {
    project_root: PathBuf,
}

impl WriteFileTool {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }

    /// The target may not exist yet, so the *parent* is canonicalized and
    /// checked against the root. Parents are created first.
    async fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let resolved = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.project_root.join(path)
        };
        let parent = resolved
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Path has no parent directory: {}", path))?;
        let filename = resolved
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Path has no filename: {}", path))?;

        let root_canonical = self.project_root.canonicalize()?;
        let requested = Path::new(path);
        let outside = if requested.is_absolute() {
            !(requested.starts_with(&self.project_root) || requested.starts_with(&root_canonical))
        } else {
            climbs_out(requested)
        };
        if outside {
            anyhow::bail!("Path escapes project directory: {}", path);
        }

        tokio::fs::create_dir_all(parent).await?;
        let parent_canonical = parent.canonicalize()?;
        if !parent_canonical.starts_with(&root_canonical) {
            anyhow::bail!("Path escapes project directory: {}", path);
        }
        Ok(parent_canonical.join(filename))
    }
}

/// True if `..` components take a relative path above its starting point.
/// Checked before any directory is created.
fn climbs_out(path: &Path) -> bool {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::ParentDir if depth == 0 => return true,
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    false
}

#[derive(Deserialize)]
struct WriteFileInput {
    file_path: String,
    content: String,
}

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates parent directories as needed. Path is relative to the project root."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "File path relative to project root"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, input: &Arguments) -> Result<ToolResult> {
        let input: WriteFileInput = parse_input(self.name(), input)?;
        let path = self.resolve_path(&input.file_path).await?;
        tokio::fs::write(&path, &input.content).await?;
        Ok(ToolResult::success(format!(
            "Wrote {} bytes to {}",
            input.content.len(),
            input.file_path
        )))
    }
}
