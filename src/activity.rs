//! Activity tracking for the conversation loop.
//!
//! An [`ActivityTree`] records one node per loop iteration and one child node
//! per tool call. Observers get a rendered copy through activity updates; the
//! tree itself is owned by the task driving the turn.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::constants::{ACTIVITY_MAX_DEPTH, ACTIVITY_MAX_NODES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityStatus {
    Active,
    Complete,
    Error,
}

impl ActivityStatus {
    fn glyph(self) -> &'static str {
        match self {
            ActivityStatus::Active => "●",
            ActivityStatus::Complete => "✓",
            ActivityStatus::Error => "✗",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Tool,
    Analysis,
    Planning,
    Execution,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityNode {
    pub id: String,
    pub owner: String,
    pub label: String,
    pub kind: OperationKind,
    pub status: ActivityStatus,
    /// Advisory completion percentage, 0 to 100.
    pub progress: f64,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    parent: Option<usize>,
    depth: usize,
}

impl ActivityNode {
    pub fn is_finished(&self) -> bool {
        self.status != ActivityStatus::Active
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Errors raised when the tree is used incorrectly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActivityError {
    #[error("activity node '{0}' already exists")]
    DuplicateId(String),
    #[error("no activity node with id '{0}'")]
    UnknownNode(String),
    #[error("activity node '{0}' was already finalized")]
    AlreadyFinalized(String),
    #[error("activity tree is full ({limit} nodes)")]
    TooManyNodes { limit: usize },
    #[error("activity tree is too deep (max depth {limit})")]
    TooDeep { limit: usize },
}

/// Insertion-ordered tree of operation nodes.
#[derive(Debug, Clone, Default)]
pub struct ActivityTree {
    nodes: Vec<ActivityNode>,
}

impl ActivityTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an active node, optionally under `parent`.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate id, an unknown parent, or when the node or depth
    /// limit would be exceeded.
    pub fn add_node(
        &mut self,
        id: impl Into<String>,
        owner: impl Into<String>,
        label: impl Into<String>,
        kind: OperationKind,
        parent: Option<&str>,
    ) -> Result<(), ActivityError> {
        let id = id.into();
        if self.index_of(&id).is_some() {
            return Err(ActivityError::DuplicateId(id));
        }
        if self.nodes.len() >= ACTIVITY_MAX_NODES {
            return Err(ActivityError::TooManyNodes {
                limit: ACTIVITY_MAX_NODES,
            });
        }

        let (parent, depth) = match parent {
            Some(parent_id) => {
                let idx = self
                    .index_of(parent_id)
                    .ok_or_else(|| ActivityError::UnknownNode(parent_id.to_string()))?;
                (Some(idx), self.nodes[idx].depth + 1)
            }
            None => (None, 0),
        };
        if depth >= ACTIVITY_MAX_DEPTH {
            return Err(ActivityError::TooDeep {
                limit: ACTIVITY_MAX_DEPTH,
            });
        }

        self.nodes.push(ActivityNode {
            id,
            owner: owner.into(),
            label: label.into(),
            kind,
            status: ActivityStatus::Active,
            progress: 0.0,
            error: None,
            start_time: Utc::now(),
            end_time: None,
            parent,
            depth,
        });
        Ok(())
    }

    /// Sets the advisory progress of an active node, clamped to 0..=100.
    ///
    /// Finalized nodes are left alone.
    pub fn update_progress(&mut self, id: &str, percent: f64) -> Result<(), ActivityError> {
        let node = self.node_mut(id)?;
        if !node.is_finished() {
            node.progress = percent.clamp(0.0, 100.0);
        }
        Ok(())
    }

    pub fn complete(&mut self, id: &str) -> Result<(), ActivityError> {
        self.finalize(id, ActivityStatus::Complete, None)
    }

    pub fn fail(&mut self, id: &str, error: impl Into<String>) -> Result<(), ActivityError> {
        self.finalize(id, ActivityStatus::Error, Some(error.into()))
    }

    fn finalize(
        &mut self,
        id: &str,
        status: ActivityStatus,
        error: Option<String>,
    ) -> Result<(), ActivityError> {
        let node = self.node_mut(id)?;
        if node.is_finished() {
            return Err(ActivityError::AlreadyFinalized(id.to_string()));
        }
        node.status = status;
        node.error = error;
        node.end_time = Some(Utc::now());
        if status == ActivityStatus::Complete {
            node.progress = 100.0;
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&ActivityNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[ActivityNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_finished()).count()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Renders the tree as indented text with box-drawing connectors.
    ///
    /// Output depends only on node order and state, so repeated calls on an
    /// unchanged tree are identical.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let roots: Vec<usize> = self.children_of(None);
        for (pos, &idx) in roots.iter().enumerate() {
            self.render_node(idx, "", pos + 1 == roots.len(), true, &mut out);
        }
        out
    }

    fn render_node(&self, idx: usize, prefix: &str, last: bool, root: bool, out: &mut String) {
        let node = &self.nodes[idx];
        let connector = match (root, last) {
            (true, _) => "",
            (false, true) => "└─ ",
            (false, false) => "├─ ",
        };
        out.push_str(prefix);
        out.push_str(connector);
        out.push_str(node.status.glyph());
        out.push(' ');
        out.push_str(&node.owner);
        out.push_str(" › ");
        out.push_str(&node.label);
        if node.progress > 0.0 && node.progress < 100.0 {
            out.push_str(&format!(" [{:.0}%]", node.progress));
        }
        if let Some(err) = &node.error {
            out.push_str(": ");
            out.push_str(err);
        }
        out.push('\n');

        let child_prefix = match (root, last) {
            (true, _) => prefix.to_string(),
            (false, true) => format!("{prefix}   "),
            (false, false) => format!("{prefix}│  "),
        };
        let children = self.children_of(Some(idx));
        for (pos, &child) in children.iter().enumerate() {
            self.render_node(child, &child_prefix, pos + 1 == children.len(), false, out);
        }
    }

    fn children_of(&self, parent: Option<usize>) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent == parent)
            .map(|(i, _)| i)
            .collect()
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut ActivityNode, ActivityError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| ActivityError::UnknownNode(id.to_string()))
    }
}

impl std::fmt::Display for ActivityTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}
