//! # 可执行网
//!
//! 展平后的单一命名空间网及其当前标识。所有执行操作（使能判断、发射、
//! 定时调度）都作用在可执行网上；源网与展平库所之间通过[绑定表](binding)
//! 显式同步令牌数。
//!
//! 结构性修改（源层次结构变化、显式标记刷新）会推进 `structure_version`，
//! 依赖它的缓存据此失效。

pub mod binding;

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use crate::anim::timing::TimingQueue;
use crate::anim::{AnimationError, AnimationLogic};
use crate::compile::handler::{ExternalTransition, HandlerRegistry};
use crate::compile::{Compiler, IncludeError};
use crate::hierarchy::IncludeHierarchy;
use crate::net::{
    Annotation, Arc, ComponentKind, Count, EvalContext, Expr, ExprError, NetError, NodeId, Place,
    RateParameter, State, TokenColor, Transition,
};

pub use binding::{Bindings, SourcePlace};

/// Revisions of the hierarchy an executable net was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Fingerprint {
    tree: u64,
    nets: Vec<(NodeId, u64)>,
}

impl Fingerprint {
    pub(crate) fn of(tree: &IncludeHierarchy) -> Self {
        Self {
            tree: tree.revision(),
            nets: tree.iter().map(|(id, node)| (id, node.net().revision())).collect(),
        }
    }
}

pub struct ExecutableNet {
    pub(crate) name: String,
    pub(crate) colors: IndexMap<String, TokenColor>,
    pub(crate) annotations: IndexMap<String, Annotation>,
    pub(crate) places: IndexMap<String, Place>,
    pub(crate) rate_parameters: IndexMap<String, RateParameter>,
    pub(crate) transitions: IndexMap<String, Transition>,
    pub(crate) arcs: IndexMap<String, Arc>,
    pub(crate) weights: HashMap<String, Vec<(String, Expr)>>,
    pub(crate) rates: HashMap<String, Expr>,
    pub(crate) parameters: HashMap<String, Expr>,
    pub(crate) bindings: Bindings,
    pub(crate) handlers: HashMap<String, Box<dyn ExternalTransition>>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) fingerprint: Fingerprint,
    state: State,
    timing: TimingQueue,
    instance: u64,
    structure_version: u64,
    refresh_required: bool,
}

impl ExecutableNet {
    pub(crate) fn empty(name: impl Into<String>, registry: HandlerRegistry) -> Self {
        Self {
            name: name.into(),
            colors: IndexMap::new(),
            annotations: IndexMap::new(),
            places: IndexMap::new(),
            rate_parameters: IndexMap::new(),
            transitions: IndexMap::new(),
            arcs: IndexMap::new(),
            weights: HashMap::new(),
            rates: HashMap::new(),
            parameters: HashMap::new(),
            bindings: Bindings::new(),
            handlers: HashMap::new(),
            registry,
            fingerprint: Fingerprint::default(),
            state: State::new(),
            timing: TimingQueue::new(),
            instance: rand::random(),
            structure_version: 0,
            refresh_required: false,
        }
    }

    /// Flattens `tree` with no external handlers registered.
    pub fn from_hierarchy(tree: &IncludeHierarchy) -> Result<Self, IncludeError> {
        Compiler::new().flatten(tree)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn colors(&self) -> impl Iterator<Item = &TokenColor> {
        self.colors.values()
    }

    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    pub fn places(&self) -> impl Iterator<Item = &Place> {
        self.places.values()
    }

    pub fn rate_parameters(&self) -> impl Iterator<Item = &RateParameter> {
        self.rate_parameters.values()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.values()
    }

    pub fn arcs(&self) -> impl Iterator<Item = &Arc> {
        self.arcs.values()
    }

    pub fn place(&self, id: &str) -> Result<&Place, NetError> {
        self.places
            .get(id)
            .ok_or_else(|| NetError::not_found(id, ComponentKind::Place))
    }

    pub fn transition(&self, id: &str) -> Result<&Transition, NetError> {
        self.transitions
            .get(id)
            .ok_or_else(|| NetError::not_found(id, ComponentKind::Transition))
    }

    pub fn arc(&self, id: &str) -> Result<&Arc, NetError> {
        self.arcs
            .get(id)
            .ok_or_else(|| NetError::not_found(id, ComponentKind::Arc))
    }

    pub fn inbound_arcs<'a>(&'a self, transition: &'a str) -> impl Iterator<Item = &'a Arc> + 'a {
        self.arcs
            .values()
            .filter(move |arc| arc.is_inbound() && arc.transition() == transition)
    }

    pub fn outbound_arcs<'a>(&'a self, transition: &'a str) -> impl Iterator<Item = &'a Arc> + 'a {
        self.arcs
            .values()
            .filter(move |arc| !arc.is_inbound() && arc.transition() == transition)
    }

    /// Parsed weight expressions of an arc, per color.
    pub fn weights(&self, arc: &str) -> &[(String, Expr)] {
        self.weights.get(arc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parsed rate expression of a transition.
    pub fn rate(&self, transition: &str) -> Option<&Expr> {
        self.rates.get(transition)
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn has_handler(&self, transition: &str) -> bool {
        self.handlers.contains_key(transition)
    }

    pub(crate) fn handler_mut(&mut self, transition: &str) -> Option<&mut Box<dyn ExternalTransition>> {
        self.handlers.get_mut(transition)
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    pub fn set_tokens(&mut self, place: &str, color: &str, count: Count) -> Result<(), NetError> {
        if !self.places.contains_key(place) {
            return Err(NetError::not_found(place, ComponentKind::Place));
        }
        if !self.colors.contains_key(color) {
            return Err(NetError::not_found(color, ComponentKind::Color));
        }
        self.state.put(place, color, count);
        Ok(())
    }

    /// The marking the places were flattened with.
    pub fn initial_state(&self) -> State {
        State::from_places(self.places.values().map(|place| {
            let colors: Vec<(String, Count)> = place
                .tokens
                .iter()
                .map(|(color, count)| (color.clone(), *count))
                .collect();
            (place.id.clone(), colors)
        }))
    }

    /// Evaluation context over an arbitrary marking of this net.
    pub fn context<'a>(&'a self, state: &'a State) -> StateContext<'a> {
        StateContext { net: self, state }
    }

    /// Changes the delay property; entries already in the timing queue
    /// keep the fire time they were scheduled with.
    pub fn set_delay(&mut self, transition: &str, delay: u64) -> Result<(), NetError> {
        let entry = self
            .transitions
            .get_mut(transition)
            .ok_or_else(|| NetError::not_found(transition, ComponentKind::Transition))?;
        entry.delay = delay;
        Ok(())
    }

    /// Timed transitions enabled in the current marking, with their delays.
    pub(crate) fn enabled_timed(&self, logic: &AnimationLogic) -> Result<Vec<(String, u64)>, AnimationError> {
        let mut enabled = Vec::new();
        for transition in self.transitions.values().filter(|t| t.kind.is_timed()) {
            if logic.is_enabled(self, &self.state, &transition.id)? {
                enabled.push((transition.id.clone(), transition.delay));
            }
        }
        Ok(enabled)
    }

    /// Clears the timing queue and schedules every timed transition enabled
    /// in the current marking at `time + delay`.
    pub fn reset_timing(&mut self, time: u64) -> Result<(), AnimationError> {
        let enabled = self.enabled_timed(&AnimationLogic::new())?;
        self.timing
            .reset_to(time, enabled.iter().map(|(id, delay)| (id.as_str(), *delay)));
        Ok(())
    }

    pub fn timing(&self) -> &TimingQueue {
        &self.timing
    }

    pub fn timing_mut(&mut self) -> &mut TimingQueue {
        &mut self.timing
    }

    /// Identity of the current structure; caches keyed on a marking of
    /// this net are valid only while it stays the same.
    pub fn stamp(&self) -> (u64, u64) {
        (self.instance, self.structure_version)
    }

    pub fn structure_version(&self) -> u64 {
        self.structure_version
    }

    pub fn mark_refresh_required(&mut self) {
        self.refresh_required = true;
        self.structure_version += 1;
    }

    /// `true` when explicitly marked, or when any net in `tree` changed
    /// structurally since this net was built.
    pub fn needs_refresh(&self, tree: &IncludeHierarchy) -> bool {
        self.refresh_required || self.fingerprint != Fingerprint::of(tree)
    }

    /// Rebuilds this net from `tree` in place. The clock is kept, the
    /// marking restarts from the source nets and the enabled timed
    /// transitions are queued again relative to the kept clock.
    pub fn refresh(&mut self, tree: &IncludeHierarchy) -> Result<(), IncludeError> {
        let mut rebuilt = Compiler::with_handlers(self.registry.clone()).flatten(tree)?;
        rebuilt.instance = self.instance;
        rebuilt.structure_version = self.structure_version + 1;
        rebuilt
            .reset_timing(self.timing.current_time())
            .map_err(IncludeError::Schedule)?;
        *self = rebuilt;
        log::debug!("executable net `{}` refreshed", self.name);
        Ok(())
    }

    /// Writes the current marking back into every bound source place.
    pub fn push_to_sources(&self, tree: &mut IncludeHierarchy) -> Result<(), NetError> {
        for (flat, sources) in self.bindings.iter() {
            for source in sources {
                let net = tree
                    .net_mut(source.node)
                    .ok_or_else(|| NetError::not_found(source.place.as_str(), ComponentKind::Place))?;
                for color in self.colors.keys() {
                    if net.get_component(color, ComponentKind::Color).is_err() {
                        continue;
                    }
                    net.set_tokens(&source.place, color, self.state.tokens(flat, color))?;
                }
            }
        }
        Ok(())
    }

    /// Replaces the current marking with the tokens of each flattened
    /// place's primary source.
    pub fn pull_from_sources(&mut self, tree: &IncludeHierarchy) -> Result<(), NetError> {
        let mut state = self.state.clone();
        for (flat, _) in self.bindings.iter() {
            let Some(source) = self.bindings.primary(flat) else {
                continue;
            };
            let place = tree
                .net(source.node)
                .ok_or_else(|| NetError::not_found(source.place.as_str(), ComponentKind::Place))?
                .place(&source.place)?;
            for color in self.colors.keys() {
                state.put(flat, color, place.count(color));
            }
        }
        self.state = state;
        Ok(())
    }
}

/// [`EvalContext`] binding an executable net to one marking.
#[derive(Clone, Copy)]
pub struct StateContext<'a> {
    net: &'a ExecutableNet,
    state: &'a State,
}

impl StateContext<'_> {
    pub fn state(&self) -> &State {
        self.state
    }
}

impl EvalContext for StateContext<'_> {
    fn tokens(&self, place: &str, color: Option<&str>) -> Option<Count> {
        if !self.net.places.contains_key(place) {
            return None;
        }
        Some(match color {
            Some(color) => self.state.tokens(place, color),
            None => self.state.total(place),
        })
    }

    fn capacity(&self, place: &str) -> Option<u64> {
        self.net.places.get(place).map(|p| p.capacity)
    }

    fn parameter(&self, id: &str) -> Result<f64, ExprError> {
        self.net
            .parameters
            .get(id)
            .ok_or_else(|| ExprError::UnknownParameter(id.to_string()))?
            .evaluate(self)
    }
}

impl EvalContext for ExecutableNet {
    fn tokens(&self, place: &str, color: Option<&str>) -> Option<Count> {
        self.context(&self.state).tokens(place, color)
    }

    fn capacity(&self, place: &str) -> Option<u64> {
        self.context(&self.state).capacity(place)
    }

    fn parameter(&self, id: &str) -> Result<f64, ExprError> {
        self.context(&self.state).parameter(id)
    }
}

/// Structural equality: handlers, clock and caches are not compared.
impl PartialEq for ExecutableNet {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.colors == other.colors
            && self.annotations == other.annotations
            && self.places == other.places
            && self.rate_parameters == other.rate_parameters
            && self.transitions == other.transitions
            && self.arcs == other.arcs
            && self.bindings == other.bindings
            && self.initial_state() == other.initial_state()
    }
}

impl fmt::Debug for ExecutableNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        handlers.sort();
        f.debug_struct("ExecutableNet")
            .field("name", &self.name)
            .field("places", &self.places.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions.keys().collect::<Vec<_>>())
            .field("arcs", &self.arcs.keys().collect::<Vec<_>>())
            .field("state", &self.state)
            .field("handlers", &handlers)
            .field("structure_version", &self.structure_version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{DEFAULT_COLOR, PetriNet};

    fn tree() -> IncludeHierarchy {
        let mut net = PetriNet::new("root");
        net.add_place(Place::new("P0").with_tokens(DEFAULT_COLOR, 2u64).with_capacity(5))
            .unwrap();
        net.add_place(Place::new("P1")).unwrap();
        net.add_rate_parameter(RateParameter::new("half", "#(P0) / 2")).unwrap();
        IncludeHierarchy::new(net, "root")
    }

    #[test]
    fn context_reads_the_given_marking() {
        let tree = tree();
        let net = ExecutableNet::from_hierarchy(&tree).unwrap();
        let state = net.state().with_tokens("P0", DEFAULT_COLOR, 6u64);
        let ctx = net.context(&state);
        assert_eq!(ctx.tokens("P0", None), Some(Count::from(6)));
        assert_eq!(ctx.tokens("P9", None), None);
        assert_eq!(ctx.capacity("P0"), Some(5));
        assert_eq!(ctx.parameter("half"), Ok(3.0));
        assert_eq!(net.parameter("half"), Ok(1.0));
    }

    #[test]
    fn token_edits_travel_both_ways() {
        let mut tree = tree();
        let mut net = ExecutableNet::from_hierarchy(&tree).unwrap();
        net.set_tokens("P1", DEFAULT_COLOR, Count::from(4)).unwrap();
        net.push_to_sources(&mut tree).unwrap();
        assert_eq!(tree.net(tree.root()).unwrap().place("P1").unwrap().count(DEFAULT_COLOR), Count::from(4));
        assert!(!net.needs_refresh(&tree));

        let root = tree.root();
        tree.net_mut(root).unwrap().set_tokens("P0", DEFAULT_COLOR, Count::ZERO).unwrap();
        net.pull_from_sources(&tree).unwrap();
        assert_eq!(net.state().tokens("P0", DEFAULT_COLOR), Count::ZERO);
        assert_eq!(net.state().tokens("P1", DEFAULT_COLOR), Count::from(4));
    }

    #[test]
    fn structural_edits_require_refresh() {
        let mut tree = tree();
        let mut net = ExecutableNet::from_hierarchy(&tree).unwrap();
        let root = tree.root();
        tree.net_mut(root).unwrap().add_place(Place::new("P2")).unwrap();
        assert!(net.needs_refresh(&tree));

        let (instance, version) = net.stamp();
        net.refresh(&tree).unwrap();
        assert_eq!(net.stamp(), (instance, version + 1));
        assert!(net.place("P2").is_ok());
        assert!(!net.needs_refresh(&tree));

        net.mark_refresh_required();
        assert!(net.needs_refresh(&tree));
    }

    #[test]
    fn separately_built_nets_get_their_own_instance() {
        let tree = tree();
        let first = ExecutableNet::from_hierarchy(&tree).unwrap();
        let second = ExecutableNet::from_hierarchy(&tree).unwrap();
        assert_ne!(first.stamp().0, second.stamp().0);
        assert_eq!(first.stamp().1, second.stamp().1);
    }

    #[test]
    fn refresh_requeues_timed_transitions_at_the_kept_clock() {
        let mut tree = tree();
        let root = tree.root();
        {
            let source = tree.net_mut(root).unwrap();
            source.add_transition(Transition::timed("drain", 0)).unwrap();
            source
                .add_arc(Arc::inbound("out", "P0", "drain").with_weight(DEFAULT_COLOR, "1"))
                .unwrap();
        }
        let mut net = ExecutableNet::from_hierarchy(&tree).unwrap();
        assert_eq!(net.timing().fire_time("drain"), Some(0));

        net.timing_mut().dequeue("drain");
        net.timing_mut().advance_to(7);
        tree.net_mut(root).unwrap().add_place(Place::new("P2")).unwrap();
        net.refresh(&tree).unwrap();

        assert_eq!(net.timing().current_time(), 7);
        assert_eq!(net.timing().fire_time("drain"), Some(7));
        assert!(net.timing().is_due("drain"));
    }
}
