//! grep tool: regex search over the project tree.

use anyhow::Result;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

use super::{parse_input, Tool, ToolResult};
use crate::constants::{BINARY_DETECTION_BYTES, GREP_MAX_MATCHES};
use crate::message::Arguments;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

pub struct GrepTool {
    project_root: PathBuf,
}

impl GrepTool {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }
}

/// One search run: pattern, optional file-name filter, and collected hits.
struct Search<'a> {
    root: &'a Path,
    regex: &'a Regex,
    include: Option<glob::Pattern>,
    hits: Vec<String>,
}

impl Search<'_> {
    fn full(&self) -> bool {
        self.hits.len() >= GREP_MAX_MATCHES
    }

    /// Walks `dir` depth-first in name order, skipping hidden and build dirs.
    fn walk(&mut self, dir: &Path) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            if self.full() {
                return;
            }
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if path.is_dir() {
                if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) {
                    continue;
                }
                self.walk(&path);
            } else if path.is_file() {
                let included = self
                    .include
                    .as_ref()
                    .map_or(true, |pattern| pattern.matches(&name));
                if included {
                    self.scan(&path);
                }
            }
        }
    }

    /// Appends `path:line:content` for each matching line. Binary and
    /// non-UTF-8 files are skipped.
    fn scan(&mut self, path: &Path) {
        let Ok(bytes) = fs::read(path) else {
            return;
        };
        if bytes[..bytes.len().min(BINARY_DETECTION_BYTES)].contains(&0) {
            return;
        }
        let Ok(text) = String::from_utf8(bytes) else {
            return;
        };

        let relative = path.strip_prefix(self.root).unwrap_or(path);
        for (idx, line) in text.lines().enumerate() {
            if self.full() {
                return;
            }
            if self.regex.is_match(line) {
                self.hits
                    .push(format!("{}:{}:{}", relative.display(), idx + 1, line));
            }
        }
    }
}

#[derive(Deserialize)]
struct GrepInput {
    pattern: String,
    path: Option<String>,
    include: Option<String>,
}

#[async_trait::async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents using a regex pattern. Returns matching lines with file paths and line numbers."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (relative to project root, defaults to '.')"
                },
                "include": {
                    "type": "string",
                    "description": "Glob on file names to filter files (e.g. '*.rs')"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, input: &Arguments) -> Result<ToolResult> {
        let input: GrepInput = parse_input(self.name(), input)?;

        let regex = match Regex::new(&input.pattern) {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::error(format!("Invalid regex: {e}"))),
        };
        let include = match input.include.as_deref().map(glob::Pattern::new) {
            Some(Ok(pattern)) => Some(pattern),
            Some(Err(e)) => return Ok(ToolResult::error(format!("Invalid include glob: {e}"))),
            None => None,
        };

        let root_canonical = self.project_root.canonicalize()?;
        let search_root = match input.path.as_deref() {
            Some(path) => {
                let canonical = self
                    .project_root
                    .join(path)
                    .canonicalize()
                    .map_err(|_| anyhow::anyhow!("Search path does not exist: {}", path))?;
                if !canonical.starts_with(&root_canonical) {
                    return Ok(ToolResult::error("Search path escapes project directory"));
                }
                canonical
            }
            None => root_canonical.clone(),
        };

        let mut search = Search {
            root: &root_canonical,
            regex: &regex,
            include,
            hits: Vec::new(),
        };
        if search_root.is_file() {
            search.scan(&search_root);
        } else {
            search.walk(&search_root);
        }

        if search.hits.is_empty() {
            return Ok(ToolResult::success("No matches found."));
        }
        let mut out = search.hits.join("\n");
        if search.full() {
            out.push_str(&format!("\n... truncated at {} matches", GREP_MAX_MATCHES));
        }
        Ok(ToolResult::success(out))
    }
}
