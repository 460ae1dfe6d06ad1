use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;

use petgraph::dot::{Config, Dot};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::{EdgeReference, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::Serialize;

use crate::anim::{AnimationError, AnimationLogic, TokenChange};
use crate::exec::ExecutableNet;
use crate::net::State;

/// state 保留完整标识,enabled 记录该标识下的使能迁移(按 id 排序).
#[derive(Debug, Clone)]
pub struct StateNode {
    pub index: usize,
    pub state: State,
    pub enabled: BTreeSet<String>,
}

/// 同一对状态之间的所有迁移合并为一条边.
#[derive(Debug, Clone)]
pub struct StateEdge {
    pub transitions: BTreeSet<String>,
    pub changes: Vec<TokenChange>,
}

/// 构建可达图时记录的失败信息.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionFailure {
    pub state: usize,
    pub transition: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateSpaceStats {
    pub state_count: usize,
    pub edge_count: usize,
    pub deadlock_count: usize,
    pub truncated: bool,
}

#[derive(Serialize)]
struct StateReport<'a> {
    index: usize,
    marking: &'a State,
    enabled: &'a BTreeSet<String>,
    dead: bool,
}

#[derive(Serialize)]
struct EdgeReport<'a> {
    source: usize,
    target: usize,
    transitions: &'a BTreeSet<String>,
}

#[derive(Serialize)]
struct Report<'a> {
    net: &'a str,
    stats: StateSpaceStats,
    states: Vec<StateReport<'a>>,
    edges: Vec<EdgeReport<'a>>,
    failures: &'a [TransitionFailure],
}

/// Reachable markings of an executable net, explored breadth first from
/// its current marking.
///
/// Timed transitions are expanded as soon as they are enabled, so the
/// graph is the untimed over-approximation of what the animator can reach.
#[derive(Debug)]
pub struct StateSpace {
    pub name: String,
    pub graph: StableGraph<StateNode, StateEdge>,
    pub initial: NodeIndex,
    pub dead: HashSet<NodeIndex>,
    pub truncated: bool,
    pub failures: Vec<TransitionFailure>,
    pub states: HashMap<State, NodeIndex>,
}

impl StateSpace {
    /// `max_states` bounds the number of nodes; successors that would
    /// exceed it are dropped and the result is marked truncated.
    pub fn explore(logic: &mut AnimationLogic, net: &ExecutableNet, max_states: usize) -> Self {
        let mut graph = StableGraph::new();
        let mut states: HashMap<State, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::new();
        let mut dead = HashSet::new();
        let mut failures = Vec::new();
        let mut truncated = false;

        let initial_state = net.state().clone();
        let initial = graph.add_node(StateNode {
            index: 0,
            state: initial_state.clone(),
            enabled: BTreeSet::new(),
        });
        states.insert(initial_state, initial);
        queue.push_back(initial);

        while let Some(source) = queue.pop_front() {
            let current = graph[source].state.clone();
            let index = graph[source].index;
            let enabled = match logic.get_enabled_immediate_or_timed_transitions(net, &current) {
                Ok(enabled) => enabled,
                Err(err) => {
                    failures.push(TransitionFailure {
                        state: index,
                        transition: failing_transition(&err),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            graph[source].enabled = enabled.clone();

            if enabled.is_empty() {
                dead.insert(source);
                continue;
            }

            let successors = match logic.get_successors(net, &current, true) {
                Ok(successors) => successors,
                Err(err) => {
                    failures.push(TransitionFailure {
                        state: index,
                        transition: failing_transition(&err),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            for (next, transitions) in successors {
                let target = match states.entry(next.clone()) {
                    Entry::Occupied(entry) => *entry.get(),
                    Entry::Vacant(entry) => {
                        if graph.node_count() >= max_states {
                            truncated = true;
                            continue;
                        }
                        let target = graph.add_node(StateNode {
                            index: graph.node_count(),
                            state: next.clone(),
                            enabled: BTreeSet::new(),
                        });
                        entry.insert(target);
                        queue.push_back(target);
                        target
                    }
                };
                let changes = TokenChange::diff(&current, &next);
                graph.add_edge(source, target, StateEdge { transitions, changes });
            }
        }

        if truncated {
            log::warn!("state space of `{}` truncated at {max_states} states", net.name());
        }
        log::info!(
            "explored {} states and {} edges of `{}`",
            graph.node_count(),
            graph.edge_count(),
            net.name()
        );

        Self {
            name: net.name().to_string(),
            graph,
            initial,
            dead,
            truncated,
            failures,
            states,
        }
    }

    pub fn stats(&self) -> StateSpaceStats {
        StateSpaceStats {
            state_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
            deadlock_count: self.dead.len(),
            truncated: self.truncated,
        }
    }

    pub fn node(&self, index: NodeIndex) -> &StateNode {
        &self.graph[index]
    }

    pub fn contains_state(&self, state: &State) -> bool {
        self.states.contains_key(state)
    }

    pub fn is_dead(&self, state: &State) -> bool {
        self.states.get(state).is_some_and(|index| self.dead.contains(index))
    }

    pub fn to_dot(&self) -> String {
        fn escape(s: &str) -> String {
            s.replace('\\', "\\\\").replace('"', "\\\"")
        }

        let edge_attrs = |_: &StableGraph<StateNode, StateEdge>, edge: EdgeReference<'_, StateEdge>| {
            let names: Vec<&str> = edge.weight().transitions.iter().map(String::as_str).collect();
            format!("label=\"{}\"", escape(&names.join(", ")))
        };
        let node_attrs = |_: &StableGraph<StateNode, StateEdge>, (idx, node): (NodeIndex, &StateNode)| {
            let mut label = format!("s{}\\n{}", node.index, escape(&node.state.to_string()));
            if !node.enabled.is_empty() {
                let enabled: Vec<String> = node.enabled.iter().map(|t| escape(t)).collect();
                label.push_str(&format!("\\nenabled: {}", enabled.join(", ")));
            }
            if self.dead.contains(&idx) {
                format!("label=\"{label}\", shape=doublecircle")
            } else {
                format!("label=\"{label}\"")
            }
        };
        let dot = Dot::with_attr_getters(
            &self.graph,
            &[Config::EdgeNoLabel, Config::NodeNoLabel],
            &edge_attrs,
            &node_attrs,
        );
        format!("{:?}", dot)
    }

    pub fn write_dot<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let dot = self.to_dot();
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, dot)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut states: Vec<StateReport<'_>> = self
            .graph
            .node_indices()
            .map(|idx| {
                let node = &self.graph[idx];
                StateReport {
                    index: node.index,
                    marking: &node.state,
                    enabled: &node.enabled,
                    dead: self.dead.contains(&idx),
                }
            })
            .collect();
        states.sort_by_key(|state| state.index);

        let edges = self
            .graph
            .edge_references()
            .map(|edge| EdgeReport {
                source: self.graph[edge.source()].index,
                target: self.graph[edge.target()].index,
                transitions: &edge.weight().transitions,
            })
            .collect();

        serde_json::to_string_pretty(&Report {
            net: &self.name,
            stats: self.stats(),
            states,
            edges,
            failures: &self.failures,
        })
    }
}

fn failing_transition(err: &AnimationError) -> String {
    match err {
        AnimationError::UnknownTransition(id)
        | AnimationError::NotEnabled(id)
        | AnimationError::NegativeCount { transition: id, .. }
        | AnimationError::Handler { transition: id, .. } => id.clone(),
        AnimationError::Evaluation { component, .. } => component.clone(),
        AnimationError::Worker(_) => String::new(),
    }
}
