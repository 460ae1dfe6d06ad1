use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::arena::Idx;

/// Stable handle of a node in the include hierarchy; never reused after
/// the node is removed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Self {
        NodeId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl Idx for NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }

    fn from_usize(idx: usize) -> Self {
        NodeId(u32::try_from(idx).unwrap_or(u32::MAX))
    }
}

/// 组件种类，用于按 id 查找时区分同名组件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Color,
    Annotation,
    Place,
    RateParameter,
    Transition,
    Arc,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::Color => "color",
            ComponentKind::Annotation => "annotation",
            ComponentKind::Place => "place",
            ComponentKind::RateParameter => "rate parameter",
            ComponentKind::Transition => "transition",
            ComponentKind::Arc => "arc",
        };
        f.write_str(name)
    }
}

/// Joins a qualified prefix and a local id into one flattened id.
///
/// The root node contributes an empty prefix, so its components keep
/// their local ids.
pub fn qualify(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{prefix}.{local}")
    }
}
