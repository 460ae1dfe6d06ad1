//! # 包含层次（组合树）
//!
//! 每个节点以本地别名包装一个网模型。节点名是在祖先与兄弟之间唯一的
//! 最短名字，全限定名由祖先节点名依次拼接而成；根节点的 id 前缀为空。
//! 节点存放在 [`Arena`] 中，删除包含关系后其 [`NodeId`] 不会被复用。
//!
//! 接口库所的生命周期见 [`interface`]，管理命令及其作用域见 [`command`]。

pub mod command;
pub mod interface;

use indexmap::IndexMap;

use crate::config::HpnConfig;
use crate::net::{Arena, MergeInterfaceState, NodeId, PetriNet, qualify};

pub use command::{Conflict, ConflictReport, MapCommand, Scope};
pub use interface::InterfacePlace;

#[derive(Debug, Clone)]
pub struct HierarchyNode {
    alias: String,
    name: String,
    qualified_name: String,
    prefix: String,
    parent: Option<NodeId>,
    children: IndexMap<String, NodeId>,
    net: PetriNet,
    interface: IndexMap<String, InterfacePlace>,
}

impl HierarchyNode {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Shortest name distinct from every ancestor's and sibling's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Prefix of every flattened id this node contributes.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.children.iter().map(|(alias, id)| (alias.as_str(), *id))
    }

    pub fn child(&self, alias: &str) -> Option<NodeId> {
        self.children.get(alias).copied()
    }

    pub fn net(&self) -> &PetriNet {
        &self.net
    }

    pub fn interface_places(&self) -> impl Iterator<Item = &InterfacePlace> {
        self.interface.values()
    }

    pub fn interface_place(&self, away_id: &str) -> Option<&InterfacePlace> {
        self.interface.get(away_id)
    }
}

#[derive(Debug, Clone)]
pub struct IncludeHierarchy {
    nodes: Arena<NodeId, HierarchyNode>,
    root: NodeId,
    access_scope: Scope,
    revision: u64,
}

impl IncludeHierarchy {
    pub fn new(net: PetriNet, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut nodes = Arena::new();
        let root = nodes.alloc(HierarchyNode {
            alias: name.clone(),
            qualified_name: name.clone(),
            name,
            prefix: String::new(),
            parent: None,
            children: IndexMap::new(),
            net,
            interface: IndexMap::new(),
        });
        let mut hierarchy = Self {
            nodes,
            root,
            access_scope: Scope::default(),
            revision: 0,
        };
        hierarchy.register_home_places(root);
        hierarchy
    }

    pub fn with_access_scope(mut self, scope: Scope) -> Self {
        self.access_scope = scope;
        self
    }

    /// A root node whose interface places reach the configured scope.
    pub fn from_config(net: PetriNet, name: impl Into<String>, config: &HpnConfig) -> Self {
        Self::new(net, name).with_access_scope(config.interface_access_scope)
    }

    pub fn access_scope(&self) -> Scope {
        self.access_scope
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Bumped by every structural change of the tree itself.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn node(&self, id: NodeId) -> Option<&HierarchyNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn net(&self, id: NodeId) -> Option<&PetriNet> {
        self.nodes.get(id).map(|node| &node.net)
    }

    pub fn net_mut(&mut self, id: NodeId) -> Option<&mut PetriNet> {
        self.nodes.get_mut(id).map(|node| &mut node.net)
    }

    /// Looks a node up by its fully qualified name.
    pub fn find(&self, qualified_name: &str) -> Option<NodeId> {
        self.iter()
            .find(|(_, node)| node.qualified_name == qualified_name)
            .map(|(id, _)| id)
    }

    /// Depth-first, parents before children, children in inclusion order.
    pub fn iter(&self) -> HierarchyIter<'_> {
        HierarchyIter {
            hierarchy: self,
            stack: vec![self.root],
        }
    }

    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let mut current = self.nodes.get(id).and_then(|node| node.parent);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.nodes.get(parent).and_then(|node| node.parent);
        }
        ancestors
    }

    /// The node and every node below it.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                found.push(current);
                stack.extend(node.children.values().rev().copied());
            }
        }
        found
    }

    pub fn scope_nodes(&self, id: NodeId, scope: Scope) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        let mut found = vec![id];
        match scope {
            Scope::Node => {}
            Scope::Parent => found.extend(node.parent),
            Scope::Ancestors => found.extend(self.ancestors(id)),
            Scope::AncestorsAndSiblings => {
                found.extend(self.ancestors(id));
                if let Some(parent) = node.parent.and_then(|p| self.nodes.get(p)) {
                    found.extend(parent.children.values().copied().filter(|&c| c != id));
                }
            }
            Scope::All => found.extend(self.iter().map(|(other, _)| other).filter(|&o| o != id)),
        }
        found
    }

    /// Attaches `net` below `parent` under `alias`.
    pub fn include(&mut self, parent: NodeId, net: PetriNet, alias: impl Into<String>) -> Result<NodeId, ConflictReport> {
        let alias = alias.into();
        let Some(parent_node) = self.nodes.get(parent) else {
            return Err(ConflictReport::single("unknown parent node", format!("{parent:?}")));
        };
        if alias.is_empty() || alias.contains('.') {
            return Err(ConflictReport::single("include alias must be non-empty and contain no '.'", alias));
        }
        if parent_node.children.contains_key(&alias) {
            return Err(ConflictReport::single(
                format!("`{}` already includes a net under this alias", parent_node.qualified_name),
                alias,
            ));
        }

        let id = self.nodes.alloc(HierarchyNode {
            alias: alias.clone(),
            name: String::new(),
            qualified_name: String::new(),
            prefix: String::new(),
            parent: Some(parent),
            children: IndexMap::new(),
            net,
            interface: IndexMap::new(),
        });
        self.nodes[parent].children.insert(alias.clone(), id);
        self.resolve_names(id);
        self.seed_available(id);
        self.register_home_places(id);
        self.revision += 1;
        log::debug!("included `{alias}` as `{}`", self.nodes[id].qualified_name);
        Ok(id)
    }

    /// Detaches the subtree included under `alias` and hands back its net.
    ///
    /// Refused while a node outside the subtree uses an interface place
    /// defined inside it.
    pub fn remove_include(&mut self, parent: NodeId, alias: &str) -> Result<PetriNet, ConflictReport> {
        let Some(id) = self.nodes.get(parent).and_then(|node| node.child(alias)) else {
            return Err(ConflictReport::single("no net is included under this alias", alias));
        };
        let doomed = self.subtree(id);
        let mut report = ConflictReport::new();
        for (other, node) in self.iter() {
            if doomed.contains(&other) {
                continue;
            }
            for entry in node.interface.values() {
                if entry.state == MergeInterfaceState::InUse && doomed.contains(&entry.home.node) {
                    report.push(
                        format!("interface place is still used by `{}`", node.qualified_name),
                        entry.away_id.as_str(),
                    );
                }
            }
        }
        if !report.is_empty() {
            return Err(report);
        }

        self.nodes[parent].children.shift_remove(alias);
        for node in self.nodes.iter_mut() {
            node.interface.retain(|_, entry| !doomed.contains(&entry.home.node));
        }
        let mut removed = None;
        for node_id in doomed {
            let node = self.nodes.remove(node_id);
            if node_id == id {
                removed = node.map(|n| n.net);
            }
        }
        self.revision += 1;
        removed.ok_or_else(|| ConflictReport::single("included node vanished", alias))
    }

    /// Renames the include alias of `id`; names of the node and of every
    /// descendant are recomputed.
    pub fn rename(&mut self, id: NodeId, alias: impl Into<String>) -> Result<(), ConflictReport> {
        let alias = alias.into();
        let Some(node) = self.nodes.get(id) else {
            return Err(ConflictReport::single("unknown node", format!("{id:?}")));
        };
        if alias.is_empty() || alias.contains('.') {
            return Err(ConflictReport::single("include alias must be non-empty and contain no '.'", alias));
        }
        let old = node.alias.clone();
        let parent = node.parent;
        if let Some(parent) = parent {
            let siblings = &self.nodes[parent].children;
            if alias != old && siblings.contains_key(&alias) {
                return Err(ConflictReport::single("a sibling already uses this alias", alias));
            }
            let children = std::mem::take(&mut self.nodes[parent].children);
            self.nodes[parent].children = children
                .into_iter()
                .map(|(key, child)| if key == old { (alias.clone(), child) } else { (key, child) })
                .collect();
        }
        self.nodes[id].alias = alias;
        for node_id in self.subtree(id) {
            self.resolve_names(node_id);
        }
        self.revision += 1;
        Ok(())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut HierarchyNode> {
        self.nodes.get_mut(id)
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
    }

    fn resolve_names(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let Some(parent) = node.parent else {
            // 根节点名即别名，且不贡献前缀
            let root = &mut self.nodes[id];
            root.name = root.alias.clone();
            root.qualified_name = root.alias.clone();
            return;
        };

        let mut taken: Vec<&str> = self
            .ancestors(id)
            .into_iter()
            .filter_map(|a| self.nodes.get(a))
            .map(|a| a.name.as_str())
            .collect();
        taken.extend(
            self.nodes[parent]
                .children
                .values()
                .filter(|&&c| c != id)
                .filter_map(|&c| self.nodes.get(c))
                .map(|c| c.name.as_str())
                .filter(|name| !name.is_empty()),
        );

        let name = unique_name(&node.alias, &taken);
        let parent_node = &self.nodes[parent];
        let qualified_name = format!("{}.{name}", parent_node.qualified_name);
        let prefix = qualify(&parent_node.prefix, &name);

        let node = &mut self.nodes[id];
        node.name = name;
        node.qualified_name = qualified_name;
        node.prefix = prefix;
    }
}

/// `alias`, or the first of `alias1`, `alias2`, ... not in `taken`.
fn unique_name(alias: &str, taken: &[&str]) -> String {
    if !taken.contains(&alias) {
        return alias.to_string();
    }
    (1..)
        .map(|n| format!("{alias}{n}"))
        .find(|candidate| !taken.contains(&candidate.as_str()))
        .unwrap_or_else(|| alias.to_string())
}

pub struct HierarchyIter<'a> {
    hierarchy: &'a IncludeHierarchy,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for HierarchyIter<'a> {
    type Item = (NodeId, &'a HierarchyNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if let Some(node) = self.hierarchy.nodes.get(id) {
                self.stack.extend(node.children.values().rev().copied());
                return Some((id, node));
            }
        }
        None
    }
}
