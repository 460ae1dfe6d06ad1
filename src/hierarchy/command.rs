//! 层次结构管理命令：作用域、接口映射命令与冲突报告。
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hierarchy::interface::InterfacePlace;

/// Which nodes a command is replayed against, relative to the node it is
/// issued on. Every scope includes that node itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Node,
    Parent,
    Ancestors,
    #[default]
    AncestorsAndSiblings,
    All,
}

/// One advisory problem found while executing a hierarchy command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub message: String,
    /// Id of the offending component, alias or interface entry.
    pub component: String,
}

impl Conflict {
    pub fn new(message: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            component: component.into(),
        }
    }
}

/// Result shape shared by every command that mutates the hierarchy.
///
/// A command either applies completely or reports every conflict it
/// found and leaves the hierarchy untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(message: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            conflicts: vec![Conflict::new(message, component)],
        }
    }

    pub fn push(&mut self, message: impl Into<String>, component: impl Into<String>) {
        self.conflicts.push(Conflict::new(message, component));
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.conflicts.iter().map(|c| c.component.as_str())
    }

    /// `Ok(value)` when nothing was reported.
    pub fn into_result<T>(self, value: T) -> Result<T, ConflictReport> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, conflict) in self.conflicts.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{} ({})", conflict.message, conflict.component)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConflictReport {}

/// Edits of a node's interface-place map.
#[derive(Debug, Clone, PartialEq)]
pub enum MapCommand {
    Add(InterfacePlace),
    Rename { from: String, to: String },
    Update(InterfacePlace),
}

impl MapCommand {
    pub fn key(&self) -> &str {
        match self {
            MapCommand::Add(entry) | MapCommand::Update(entry) => &entry.away_id,
            MapCommand::Rename { from, .. } => from,
        }
    }
}
