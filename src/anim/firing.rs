//! 使能判断与后继状态计算。
//!
//! 使能条件（针对某个标识）：
//! * 每条普通/测试输入弧，对每种颜色，库所中至少有求值后的权重个令牌；
//! * 每条抑制弧的源库所在相关颜色上令牌数恰为零；
//! * 发射后输出库所不能超过容量，同一迁移的自环库所不做容量检查。
//!
//! 立即迁移之间按优先级过滤，只保留当前使能的最高优先级；定时迁移不受
//! 优先级影响。每个标识的使能结果会被缓存，网结构版本变化时缓存失效。
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::anim::AnimationError;
use crate::exec::{ExecutableNet, StateContext};
use crate::net::{ArcKind, Count, Expr, State, TransitionKind};

#[derive(Debug, Default)]
pub struct AnimationLogic {
    stamp: Option<(u64, u64)>,
    cache: HashMap<State, BTreeSet<String>>,
}

impl AnimationLogic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of markings whose enabled set is cached.
    pub fn cached_states(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.stamp = None;
    }

    fn sync(&mut self, net: &ExecutableNet) {
        let stamp = Some(net.stamp());
        if self.stamp != stamp {
            if !self.cache.is_empty() {
                log::debug!("net structure changed, dropping {} cached markings", self.cache.len());
            }
            self.cache.clear();
            self.stamp = stamp;
        }
    }

    /// Enabling predicate, without the priority rule.
    pub fn is_enabled(&self, net: &ExecutableNet, state: &State, transition: &str) -> Result<bool, AnimationError> {
        net.transition(transition)
            .map_err(|_| AnimationError::UnknownTransition(transition.to_string()))?;
        let ctx = net.context(state);

        let mut sources = HashSet::new();
        for arc in net.inbound_arcs(transition) {
            let place = arc.place();
            sources.insert(place);
            let weights = net.weights(&arc.id);
            match arc.kind {
                ArcKind::Inhibitor if weights.is_empty() => {
                    if !state.total(place).is_zero() {
                        return Ok(false);
                    }
                }
                ArcKind::Inhibitor => {
                    if weights.iter().any(|(color, _)| !state.tokens(place, color).is_zero()) {
                        return Ok(false);
                    }
                }
                ArcKind::Normal | ArcKind::Test => {
                    for (color, expr) in weights {
                        let weight = eval_weight(&ctx, &arc.id, expr)?;
                        if !weight.is_zero() && state.tokens(place, color).checked_sub(weight).is_none() {
                            return Ok(false);
                        }
                    }
                }
            }
        }

        let mut incoming: BTreeMap<&str, Count> = BTreeMap::new();
        for arc in net.outbound_arcs(transition) {
            let place = arc.place();
            let capacity = net.place(place).map(|p| p.capacity).unwrap_or(0);
            if capacity == 0 || sources.contains(place) {
                continue;
            }
            let entry = incoming.entry(place).or_insert(Count::ZERO);
            for (_, expr) in net.weights(&arc.id) {
                *entry = entry.add(eval_weight(&ctx, &arc.id, expr)?);
            }
        }
        for (place, added) in incoming {
            let total = state.total(place);
            if total.is_infinite() {
                continue;
            }
            let capacity = net.place(place).map(|p| p.capacity).unwrap_or(0);
            let after = total.add(added);
            if after.is_infinite() || after.value() > capacity {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Enabled transitions after the priority rule: the enabled immediate
    /// transitions of the highest priority present, plus every enabled
    /// timed transition.
    pub fn get_enabled_immediate_or_timed_transitions(
        &mut self,
        net: &ExecutableNet,
        state: &State,
    ) -> Result<BTreeSet<String>, AnimationError> {
        self.sync(net);
        if let Some(hit) = self.cache.get(state) {
            return Ok(hit.clone());
        }

        let mut enabled = BTreeSet::new();
        let mut immediate = Vec::new();
        for transition in net.transitions() {
            if !self.is_enabled(net, state, &transition.id)? {
                continue;
            }
            if transition.kind.is_timed() {
                enabled.insert(transition.id.clone());
            } else {
                immediate.push((transition.priority, transition.id.clone()));
            }
        }
        if let Some(top) = immediate.iter().map(|(priority, _)| *priority).max() {
            enabled.extend(
                immediate
                    .into_iter()
                    .filter(|(priority, _)| *priority == top)
                    .map(|(_, id)| id),
            );
        }
        self.cache.insert(state.clone(), enabled.clone());
        Ok(enabled)
    }

    /// Successor markings, each with the transitions that lead there.
    ///
    /// With `include_not_yet_due` unset, timed transitions count only when
    /// the net's timing queue has them due.
    pub fn get_successors(
        &mut self,
        net: &ExecutableNet,
        state: &State,
        include_not_yet_due: bool,
    ) -> Result<BTreeMap<State, BTreeSet<String>>, AnimationError> {
        let enabled = self.get_enabled_immediate_or_timed_transitions(net, state)?;
        let mut successors: BTreeMap<State, BTreeSet<String>> = BTreeMap::new();
        for id in enabled {
            let timed = net.transition(&id).is_ok_and(|t| t.kind.is_timed());
            if timed && !include_not_yet_due && !net.timing().is_due(&id) {
                continue;
            }
            let next = self.fire(net, state, &id)?;
            successors.entry(next).or_default().insert(id);
        }
        Ok(successors)
    }

    /// Marking after firing `transition` forward from `state`. Weights are
    /// evaluated against `state`; enabledness is not checked here.
    pub fn fire(&self, net: &ExecutableNet, state: &State, transition: &str) -> Result<State, AnimationError> {
        let ctx = net.context(state);
        let mut next = state.clone();
        for arc in net.inbound_arcs(transition).filter(|arc| arc.kind == ArcKind::Normal) {
            for (color, expr) in net.weights(&arc.id) {
                let weight = eval_weight(&ctx, &arc.id, expr)?;
                let after = next
                    .tokens(arc.place(), color)
                    .checked_sub(weight)
                    .ok_or_else(|| AnimationError::NotEnabled(transition.to_string()))?;
                next.put(arc.place(), color, after);
            }
        }
        for arc in net.outbound_arcs(transition) {
            for (color, expr) in net.weights(&arc.id) {
                let weight = eval_weight(&ctx, &arc.id, expr)?;
                let after = next.tokens(arc.place(), color).add(weight);
                next.put(arc.place(), color, after);
            }
        }
        Ok(next)
    }

    /// Inverse of [`fire`](Self::fire): inbound weights are given back,
    /// outbound weights taken away, both evaluated against `state`.
    pub fn fire_backwards(&self, net: &ExecutableNet, state: &State, transition: &str) -> Result<State, AnimationError> {
        let ctx = net.context(state);
        let mut previous = state.clone();
        for arc in net.outbound_arcs(transition) {
            for (color, expr) in net.weights(&arc.id) {
                let weight = eval_weight(&ctx, &arc.id, expr)?;
                let before = previous.tokens(arc.place(), color).checked_sub(weight).ok_or_else(|| {
                    AnimationError::NegativeCount {
                        transition: transition.to_string(),
                        place: arc.place().to_string(),
                    }
                })?;
                previous.put(arc.place(), color, before);
            }
        }
        for arc in net.inbound_arcs(transition).filter(|arc| arc.kind == ArcKind::Normal) {
            for (color, expr) in net.weights(&arc.id) {
                let weight = eval_weight(&ctx, &arc.id, expr)?;
                let before = previous.tokens(arc.place(), color).add(weight);
                previous.put(arc.place(), color, before);
            }
        }
        Ok(previous)
    }

    /// Largest `k` such that `transition` could fire `k` times at once;
    /// 0 when disabled.
    ///
    /// A degree no finite inbound place bounds is reported as 1, so an
    /// infinite-server rate on an unbounded source stays at its base rate.
    pub fn enabling_degree(&self, net: &ExecutableNet, state: &State, transition: &str) -> Result<u64, AnimationError> {
        if !self.is_enabled(net, state, transition)? {
            return Ok(0);
        }
        let ctx = net.context(state);
        let mut degree: Option<u64> = None;
        for arc in net.inbound_arcs(transition).filter(|arc| arc.kind == ArcKind::Normal) {
            for (color, expr) in net.weights(&arc.id) {
                let weight = eval_weight(&ctx, &arc.id, expr)?;
                if let Some(k) = state.tokens(arc.place(), color).multiples_of(weight) {
                    degree = Some(degree.map_or(k, |d| d.min(k)));
                }
            }
        }
        Ok(degree.unwrap_or(1))
    }

    /// Rate of `transition` in `state`; infinite-server transitions scale
    /// it by their enabling degree.
    pub fn actual_rate(&self, net: &ExecutableNet, state: &State, transition: &str) -> Result<f64, AnimationError> {
        let kind = net
            .transition(transition)
            .map_err(|_| AnimationError::UnknownTransition(transition.to_string()))?
            .kind;
        let ctx = net.context(state);
        let base = match net.rate(transition) {
            Some(expr) => expr.evaluate(&ctx).map_err(|source| AnimationError::Evaluation {
                component: transition.to_string(),
                source,
            })?,
            None => 1.0,
        };
        if kind == TransitionKind::TimedInfiniteServer {
            Ok(base * self.enabling_degree(net, state, transition)? as f64)
        } else {
            Ok(base)
        }
    }
}

fn eval_weight(ctx: &StateContext<'_>, arc: &str, expr: &Expr) -> Result<Count, AnimationError> {
    expr.evaluate_weight(ctx).map_err(|source| AnimationError::Evaluation {
        component: arc.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::flatten;
    use crate::hierarchy::IncludeHierarchy;
    use crate::net::{Arc, DEFAULT_COLOR, PetriNet, Place, Rate, Transition};

    fn build(net: PetriNet) -> ExecutableNet {
        flatten(&IncludeHierarchy::new(net, "root")).unwrap()
    }

    fn weighted(arc: Arc, weight: &str) -> Arc {
        arc.with_weight(DEFAULT_COLOR, weight)
    }

    #[test]
    fn priority_hides_lower_immediate_transitions() {
        let mut net = PetriNet::new("root");
        net.add_place(Place::new("P0").with_tokens(DEFAULT_COLOR, 1u64)).unwrap();
        net.add_transition(Transition::new("high").with_priority(5)).unwrap();
        net.add_transition(Transition::new("low").with_priority(1)).unwrap();
        net.add_transition(Transition::timed("slow", 3)).unwrap();
        for t in ["high", "low", "slow"] {
            net.add_arc(weighted(Arc::inbound(format!("P0 TO {t}"), "P0", t), "1")).unwrap();
        }
        let net = build(net);
        let mut logic = AnimationLogic::new();
        let state = net.state().clone();

        let enabled = logic.get_enabled_immediate_or_timed_transitions(&net, &state).unwrap();
        assert_eq!(enabled.into_iter().collect::<Vec<_>>(), vec!["high", "slow"]);
        assert_eq!(logic.cached_states(), 1);

        let successors = logic.get_successors(&net, &state, false).unwrap();
        assert_eq!(successors.len(), 1);
        let all = logic.get_successors(&net, &state, true).unwrap();
        let both: Vec<_> = all.values().flatten().cloned().collect();
        assert_eq!(both, vec!["high", "slow"]);
    }

    #[test]
    fn capacity_blocks_except_for_self_loops() {
        let mut net = PetriNet::new("root");
        net.add_place(Place::new("P0").with_tokens(DEFAULT_COLOR, 1u64)).unwrap();
        net.add_place(Place::new("Full").with_tokens(DEFAULT_COLOR, 2u64).with_capacity(2))
            .unwrap();
        net.add_transition(Transition::new("fill")).unwrap();
        net.add_transition(Transition::new("loop")).unwrap();
        net.add_arc(weighted(Arc::inbound("a0", "P0", "fill"), "1")).unwrap();
        net.add_arc(weighted(Arc::outbound("a1", "fill", "Full"), "1")).unwrap();
        net.add_arc(weighted(Arc::inbound("a2", "Full", "loop"), "1")).unwrap();
        net.add_arc(weighted(Arc::outbound("a3", "loop", "Full"), "2")).unwrap();
        let net = build(net);
        let logic = AnimationLogic::new();
        let state = net.state().clone();

        assert!(!logic.is_enabled(&net, &state, "fill").unwrap());
        assert!(logic.is_enabled(&net, &state, "loop").unwrap());
        assert_eq!(
            logic.fire(&net, &state, "loop").unwrap().tokens("Full", DEFAULT_COLOR),
            Count::from(3)
        );
    }

    #[test]
    fn functional_weights_read_the_pre_fire_marking() {
        let mut net = PetriNet::new("root");
        net.add_place(Place::new("P0").with_tokens(DEFAULT_COLOR, 3u64)).unwrap();
        net.add_place(Place::new("P1")).unwrap();
        net.add_transition(Transition::new("T0")).unwrap();
        net.add_arc(weighted(Arc::inbound("in", "P0", "T0"), "#(P0)")).unwrap();
        net.add_arc(weighted(Arc::outbound("out", "T0", "P1"), "#(P0) * 2")).unwrap();
        let net = build(net);
        let logic = AnimationLogic::new();

        let next = logic.fire(&net, net.state(), "T0").unwrap();
        assert_eq!(next.tokens("P0", DEFAULT_COLOR), Count::ZERO);
        assert_eq!(next.tokens("P1", DEFAULT_COLOR), Count::from(6));
    }

    #[test]
    fn infinite_tokens_absorb_changes() {
        let mut net = PetriNet::new("root");
        net.add_place(Place::new("Src").with_tokens(DEFAULT_COLOR, Count::INFINITE)).unwrap();
        net.add_place(Place::new("Dst")).unwrap();
        net.add_transition(Transition::new("T0")).unwrap();
        net.add_arc(weighted(Arc::inbound("in", "Src", "T0"), "5")).unwrap();
        net.add_arc(weighted(Arc::outbound("out", "T0", "Dst"), "1")).unwrap();
        let net = build(net);
        let logic = AnimationLogic::new();

        let next = logic.fire(&net, net.state(), "T0").unwrap();
        assert!(next.tokens("Src", DEFAULT_COLOR).is_infinite());
        assert_eq!(next.tokens("Dst", DEFAULT_COLOR), Count::from(1));
    }

    #[test]
    fn infinite_server_rate_scales_with_degree() {
        let mut net = PetriNet::new("root");
        net.add_place(Place::new("P0").with_tokens(DEFAULT_COLOR, 7u64)).unwrap();
        net.add_transition(
            Transition::timed("server", 1)
                .with_kind(TransitionKind::TimedInfiniteServer)
                .with_rate(Rate::Expression("0.5".into())),
        )
        .unwrap();
        net.add_transition(Transition::timed("single", 1).with_rate(Rate::Expression("0.5".into())))
            .unwrap();
        net.add_arc(weighted(Arc::inbound("a0", "P0", "server"), "2")).unwrap();
        net.add_arc(weighted(Arc::inbound("a1", "P0", "single"), "2")).unwrap();
        let net = build(net);
        let logic = AnimationLogic::new();

        assert_eq!(logic.enabling_degree(&net, net.state(), "server").unwrap(), 3);
        assert_eq!(logic.actual_rate(&net, net.state(), "server").unwrap(), 1.5);
        assert_eq!(logic.actual_rate(&net, net.state(), "single").unwrap(), 0.5);
    }

    #[test]
    fn unbounded_degree_is_capped_at_one() {
        let mut net = PetriNet::new("root");
        net.add_place(Place::new("Tap").with_tokens(DEFAULT_COLOR, Count::INFINITE)).unwrap();
        net.add_place(Place::new("P0").with_tokens(DEFAULT_COLOR, 9u64)).unwrap();
        net.add_transition(
            Transition::timed("server", 1)
                .with_kind(TransitionKind::TimedInfiniteServer)
                .with_rate(Rate::Expression("2".into())),
        )
        .unwrap();
        net.add_transition(Transition::timed("free", 1)).unwrap();
        net.add_arc(weighted(Arc::inbound("a0", "Tap", "server"), "3")).unwrap();
        net.add_arc(weighted(Arc::inbound("a1", "P0", "free"), "0")).unwrap();
        let net = build(net);
        let logic = AnimationLogic::new();

        assert_eq!(logic.enabling_degree(&net, net.state(), "server").unwrap(), 1);
        assert_eq!(logic.actual_rate(&net, net.state(), "server").unwrap(), 2.0);
        assert_eq!(logic.enabling_degree(&net, net.state(), "free").unwrap(), 1);
    }

    #[test]
    fn cache_is_dropped_when_structure_changes() {
        let mut net = PetriNet::new("root");
        net.add_place(Place::new("P0")).unwrap();
        let mut net = build(net);
        let mut logic = AnimationLogic::new();
        let state = net.state().clone();
        logic.get_enabled_immediate_or_timed_transitions(&net, &state).unwrap();
        assert_eq!(logic.cached_states(), 1);

        net.mark_refresh_required();
        logic.get_enabled_immediate_or_timed_transitions(&net, &state).unwrap();
        assert_eq!(logic.cached_states(), 1);
        assert!(matches!(
            logic.is_enabled(&net, &state, "nope"),
            Err(AnimationError::UnknownTransition(_))
        ));
    }
}
