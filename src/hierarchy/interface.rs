//! 接口库所注册表与其生命周期。
//!
//! 将库所加入接口时，其所在节点登记为 `Home`，访问作用域内的其它节点
//! 登记为 `Available`；某个节点使用该库所时在本地网中物化一个真实库所，
//! 状态变为 `InUse`。展平时这些物化库所被视作 `Away`，并重定向到 `Home`。
use serde::{Deserialize, Serialize};

use crate::hierarchy::command::{ConflictReport, MapCommand, Scope};
use crate::hierarchy::IncludeHierarchy;
use crate::net::{ComponentKind, HomeRef, MergeInterfaceState, NodeId, Place, PlaceStatus};

/// One entry of a node's interface-place map, keyed by `away_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfacePlace {
    /// Id under which consumers materialize the place; fixed when the
    /// place enters the interface.
    pub away_id: String,
    pub home: HomeRef,
    pub state: MergeInterfaceState,
}

impl IncludeHierarchy {
    /// Publishes `place` of `node`'s net as an interface place and returns
    /// its away id.
    pub fn add_to_interface(&mut self, node: NodeId, place: &str) -> Result<String, ConflictReport> {
        let Some(owner) = self.node(node) else {
            return Err(ConflictReport::single("unknown node", format!("{node:?}")));
        };
        let status = match owner.net().place(place) {
            Ok(found) => found.status.clone(),
            Err(err) => return Err(ConflictReport::single(err.to_string(), place)),
        };
        if status.is_interface() {
            return Err(ConflictReport::single("place is already an interface place", place));
        }
        let away_id = self.publish(node, place)?;
        let status = PlaceStatus {
            merge: MergeInterfaceState::Home,
            ..status
        };
        if let Some(owner) = self.node_mut(node) {
            owner
                .net
                .set_place_status(place, status)
                .map_err(|err| ConflictReport::single(err.to_string(), place))?;
        }
        log::debug!("interface place `{away_id}` published");
        Ok(away_id)
    }

    /// Materializes the interface place `away_id` in `node`'s net.
    pub fn use_interface_place(&mut self, node: NodeId, away_id: &str) -> Result<String, ConflictReport> {
        let Some(consumer) = self.node(node) else {
            return Err(ConflictReport::single("unknown node", format!("{node:?}")));
        };
        let Some(entry) = consumer.interface_place(away_id) else {
            return Err(ConflictReport::single(
                format!("interface place is not visible from `{}`", consumer.qualified_name()),
                away_id,
            ));
        };
        match entry.state {
            MergeInterfaceState::Available => {}
            MergeInterfaceState::InUse => return Ok(away_id.to_string()),
            MergeInterfaceState::Home => {
                return Err(ConflictReport::single(
                    "an interface place cannot be consumed by the net that defines it",
                    away_id,
                ));
            }
            state => {
                return Err(ConflictReport::single(
                    format!("interface entry is in unexpected state {state:?}"),
                    away_id,
                ));
            }
        }
        if consumer.net().get_component(away_id, ComponentKind::Place).is_ok()
            || consumer.net().get_component(away_id, ComponentKind::Transition).is_ok()
        {
            return Err(ConflictReport::single("a component with this id already exists", away_id));
        }
        let home = entry.home.clone();
        let capacity = match self.net(home.node).map(|net| net.place(&home.place)) {
            Some(Ok(place)) => place.capacity,
            _ => return Err(ConflictReport::single("home place no longer exists", away_id)),
        };

        let place = Place::new(away_id).with_capacity(capacity).with_status(PlaceStatus {
            merge: MergeInterfaceState::InUse,
            home: Some(home),
            ..PlaceStatus::default()
        });
        if let Some(consumer) = self.node_mut(node) {
            consumer
                .net
                .add_place(place)
                .map_err(|err| ConflictReport::single(err.to_string(), away_id))?;
            if let Some(entry) = consumer.interface.get_mut(away_id) {
                entry.state = MergeInterfaceState::InUse;
            }
        }
        self.touch();
        Ok(away_id.to_string())
    }

    /// Removes `away_id` from `node`.
    ///
    /// An `InUse` entry is dematerialized back to `Available`, an
    /// `Available` entry disappears. Refused, with every offending
    /// component listed, while anything in the net references the place.
    pub fn remove_interface_place(&mut self, node: NodeId, away_id: &str) -> Result<(), ConflictReport> {
        let Some(owner) = self.node(node) else {
            return Err(ConflictReport::single("unknown node", format!("{node:?}")));
        };
        let Some(entry) = owner.interface_place(away_id) else {
            return Err(ConflictReport::single("no such interface entry", away_id));
        };
        let state = entry.state;
        if !matches!(state, MergeInterfaceState::InUse | MergeInterfaceState::Available) {
            return Err(ConflictReport::single(
                format!("cannot remove an interface entry in state {state:?}"),
                away_id,
            ));
        }
        let mut report = ConflictReport::new();
        for (component, reason) in owner.net().place_references(away_id) {
            report.push(reason, component);
        }
        if !report.is_empty() {
            return Err(report);
        }

        if let Some(owner) = self.node_mut(node) {
            if state == MergeInterfaceState::InUse {
                owner
                    .net
                    .remove_place(away_id)
                    .map_err(|err| ConflictReport::single(err.to_string(), away_id))?;
                if let Some(entry) = owner.interface.get_mut(away_id) {
                    entry.state = MergeInterfaceState::Available;
                }
            } else {
                owner.interface.shift_remove(away_id);
            }
        }
        self.touch();
        Ok(())
    }

    /// Takes a place out of the interface on its home node. Refused while
    /// any node still uses it.
    pub fn withdraw_interface_place(&mut self, home: NodeId, away_id: &str) -> Result<(), ConflictReport> {
        let entry = match self.node(home).and_then(|n| n.interface_place(away_id)) {
            Some(entry) if entry.state == MergeInterfaceState::Home => entry.clone(),
            _ => return Err(ConflictReport::single("not the home of this interface place", away_id)),
        };
        let mut report = ConflictReport::new();
        for user in self.interface_users(away_id) {
            if let Some(node) = self.node(user) {
                report.push(format!("still used by `{}`", node.qualified_name()), away_id);
            }
        }
        if !report.is_empty() {
            return Err(report);
        }

        for node in self.nodes.iter_mut() {
            node.interface.retain(|key, e| !(key == away_id && e.home == entry.home));
        }
        if let Some(owner) = self.node_mut(home) {
            if let Ok(place) = owner.net.place(&entry.home.place) {
                let status = PlaceStatus {
                    merge: MergeInterfaceState::NoOp,
                    ..place.status.clone()
                };
                owner
                    .net
                    .set_place_status(&entry.home.place, status)
                    .map_err(|err| ConflictReport::single(err.to_string(), away_id))?;
            }
        }
        self.touch();
        Ok(())
    }

    /// Nodes in which `away_id` is materialized.
    pub fn interface_users(&self, away_id: &str) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| {
                node.interface_place(away_id)
                    .is_some_and(|e| e.state == MergeInterfaceState::InUse)
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Replays `command` on every node `scope` selects from `node`.
    ///
    /// All targets are checked before any of them is changed.
    pub fn execute(&mut self, node: NodeId, scope: Scope, command: MapCommand) -> Result<(), ConflictReport> {
        let targets = self.scope_nodes(node, scope);
        if targets.is_empty() {
            return Err(ConflictReport::single("unknown node", format!("{node:?}")));
        }

        let mut report = ConflictReport::new();
        for &target in &targets {
            let Some(current) = self.node(target) else {
                continue;
            };
            let name = current.qualified_name();
            match &command {
                MapCommand::Add(entry) if current.interface.contains_key(&entry.away_id) => {
                    report.push(format!("entry already exists in `{name}`"), entry.away_id.as_str());
                }
                MapCommand::Update(entry) if !current.interface.contains_key(&entry.away_id) => {
                    report.push(format!("no entry to update in `{name}`"), entry.away_id.as_str());
                }
                MapCommand::Rename { from, to } => match current.interface.get(from) {
                    None => report.push(format!("no entry to rename in `{name}`"), from.as_str()),
                    Some(_) if current.interface.contains_key(to) => {
                        report.push(format!("entry name collides in `{name}`"), to.as_str());
                    }
                    Some(entry) if entry.state == MergeInterfaceState::InUse => {
                        let net = current.net();
                        if !net.contains_place(from) {
                            report.push(format!("materialized place is missing in `{name}`"), from.as_str());
                        } else if net.get_component(to, ComponentKind::Place).is_ok()
                            || net.get_component(to, ComponentKind::Transition).is_ok()
                        {
                            report.push(format!("component name collides in `{name}`"), to.as_str());
                        }
                    }
                    Some(_) => {}
                },
                _ => {}
            }
        }
        if !report.is_empty() {
            return Err(report);
        }

        for target in targets {
            let Some(current) = self.node_mut(target) else {
                continue;
            };
            match &command {
                MapCommand::Add(entry) | MapCommand::Update(entry) => {
                    current.interface.insert(entry.away_id.clone(), entry.clone());
                }
                MapCommand::Rename { from, to } => {
                    let Some(index) = current.interface.get_index_of(from) else {
                        continue;
                    };
                    if current.interface[index].state == MergeInterfaceState::InUse {
                        current
                            .net
                            .rename_place(from, to)
                            .map_err(|err| ConflictReport::single(err.to_string(), from.as_str()))?;
                    }
                    let Some((_, mut entry)) = current.interface.shift_remove_index(index) else {
                        continue;
                    };
                    entry.away_id = to.clone();
                    current.interface.shift_insert(index, to.clone(), entry);
                }
            }
        }
        self.touch();
        Ok(())
    }

    /// Registers the interface entries of a place and returns its away id.
    fn publish(&mut self, node: NodeId, place: &str) -> Result<String, ConflictReport> {
        let Some(owner) = self.node(node) else {
            return Err(ConflictReport::single("unknown node", format!("{node:?}")));
        };
        let away_id = format!("{}.{place}", owner.qualified_name());
        let home = HomeRef {
            node,
            place: place.to_string(),
        };
        let targets = self.scope_nodes(node, self.access_scope());

        let mut report = ConflictReport::new();
        for &target in &targets {
            if let Some(current) = self.node(target) {
                if current.interface.contains_key(&away_id) {
                    report.push(
                        format!("interface entry already exists in `{}`", current.qualified_name()),
                        away_id.as_str(),
                    );
                }
            }
        }
        if !report.is_empty() {
            return Err(report);
        }

        for target in targets {
            let state = if target == node {
                MergeInterfaceState::Home
            } else {
                MergeInterfaceState::Available
            };
            if let Some(current) = self.node_mut(target) {
                current.interface.insert(
                    away_id.clone(),
                    InterfacePlace {
                        away_id: away_id.clone(),
                        home: home.clone(),
                        state,
                    },
                );
            }
        }
        self.touch();
        Ok(away_id)
    }

    /// Publishes the places a freshly included net already marks as home.
    pub(super) fn register_home_places(&mut self, node: NodeId) {
        let homes: Vec<String> = match self.node(node) {
            Some(owner) => owner
                .net()
                .places()
                .filter(|p| p.status.merge == MergeInterfaceState::Home)
                .filter(|p| owner.interface.values().all(|e| e.home.place != p.id))
                .map(|p| p.id.clone())
                .collect(),
            None => return,
        };
        for place in homes {
            if let Err(report) = self.publish(node, &place) {
                log::warn!("home place `{place}` not published: {report}");
            }
        }
    }

    /// Gives a new node `Available` entries for every home whose access
    /// scope reaches it.
    pub(super) fn seed_available(&mut self, node: NodeId) {
        let scope = self.access_scope();
        let mut visible = Vec::new();
        for (home, owner) in self.iter() {
            if home == node {
                continue;
            }
            for entry in owner.interface_places() {
                if entry.state == MergeInterfaceState::Home && self.scope_nodes(home, scope).contains(&node) {
                    visible.push(entry.clone());
                }
            }
        }
        if let Some(current) = self.node_mut(node) {
            for mut entry in visible {
                entry.state = MergeInterfaceState::Available;
                current.interface.entry(entry.away_id.clone()).or_insert(entry);
            }
        }
    }
}
