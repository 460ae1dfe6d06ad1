//! 动画器：检查使能、应用令牌增量、维护定时队列与发射历史。
use std::collections::BTreeSet;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::anim::AnimationError;
use crate::anim::firing::AnimationLogic;
use crate::config::HpnConfig;
use crate::exec::ExecutableNet;
use crate::net::{Count, State};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenChange {
    pub place: String,
    pub color: String,
    pub before: Count,
    pub after: Count,
}

impl TokenChange {
    /// Signed difference, saturating at the `i64` range; 0 when either
    /// side is infinite.
    pub fn delta(&self) -> i64 {
        if self.before.is_infinite() || self.after.is_infinite() {
            return 0;
        }
        let before = i64::try_from(self.before.value()).unwrap_or(i64::MAX);
        let after = i64::try_from(self.after.value()).unwrap_or(i64::MAX);
        after.saturating_sub(before)
    }

    /// Every (place, color) count that differs between two markings.
    pub fn diff(before: &State, after: &State) -> Vec<TokenChange> {
        let places: BTreeSet<&str> = before.places().chain(after.places()).collect();
        let mut changes = Vec::new();
        for place in places {
            let colors: BTreeSet<&str> = before
                .colors(place)
                .chain(after.colors(place))
                .map(|(color, _)| color)
                .collect();
            for color in colors {
                let (old, new) = (before.tokens(place, color), after.tokens(place, color));
                if old != new {
                    changes.push(TokenChange {
                        place: place.to_string(),
                        color: color.to_string(),
                        before: old,
                        after: new,
                    });
                }
            }
        }
        changes
    }
}

/// One firing as it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firing {
    pub transition: String,
    pub time: u64,
    pub changes: Vec<TokenChange>,
}

pub struct Animator {
    net: ExecutableNet,
    logic: AnimationLogic,
    rng: StdRng,
    start_time: u64,
    history: Vec<Firing>,
}

impl Animator {
    /// Takes ownership of `net` and resets it to its initial marking at
    /// time 0.
    pub fn new(net: ExecutableNet) -> Result<Self, AnimationError> {
        Self::build(net, StdRng::from_os_rng(), 0)
    }

    pub fn with_seed(net: ExecutableNet, seed: u64) -> Result<Self, AnimationError> {
        Self::build(net, StdRng::seed_from_u64(seed), 0)
    }

    pub fn from_config(net: ExecutableNet, config: &HpnConfig) -> Result<Self, AnimationError> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::build(net, rng, config.start_time)
    }

    fn build(net: ExecutableNet, rng: StdRng, start_time: u64) -> Result<Self, AnimationError> {
        let mut animator = Self {
            net,
            logic: AnimationLogic::new(),
            rng,
            start_time,
            history: Vec::new(),
        };
        animator.reset()?;
        Ok(animator)
    }

    pub fn net(&self) -> &ExecutableNet {
        &self.net
    }

    /// Direct access to the net; call [`resync`](Self::resync) after
    /// editing its marking so the timing queue follows.
    pub fn net_mut(&mut self) -> &mut ExecutableNet {
        &mut self.net
    }

    pub fn into_net(self) -> ExecutableNet {
        self.net
    }

    pub fn logic_mut(&mut self) -> &mut AnimationLogic {
        &mut self.logic
    }

    pub fn state(&self) -> &State {
        self.net.state()
    }

    pub fn current_time(&self) -> u64 {
        self.net.timing().current_time()
    }

    pub fn next_fire_time(&self) -> Option<u64> {
        self.net.timing().next_fire_time()
    }

    pub fn history(&self) -> &[Firing] {
        &self.history
    }

    /// Transitions that may fire now: the priority-filtered immediate ones
    /// and the timed ones whose fire time has come.
    pub fn get_enabled_transitions(&mut self) -> Result<BTreeSet<String>, AnimationError> {
        let state = self.net.state().clone();
        let mut enabled = self
            .logic
            .get_enabled_immediate_or_timed_transitions(&self.net, &state)?;
        let timing = self.net.timing();
        enabled.retain(|id| {
            let timed = self.net.transition(id).is_ok_and(|t| t.kind.is_timed());
            !timed || timing.is_due(id)
        });
        Ok(enabled)
    }

    pub fn get_random_enabled_transition(&mut self) -> Result<Option<String>, AnimationError> {
        let enabled: Vec<String> = self.get_enabled_transitions()?.into_iter().collect();
        Ok(enabled.choose(&mut self.rng).cloned())
    }

    /// Fires `transition` forward.
    ///
    /// Only transitions [`get_enabled_transitions`](Self::get_enabled_transitions)
    /// reports may fire; anything else is refused with
    /// [`AnimationError::NotEnabled`] and nothing is queued or retried.
    /// An attached handler sees the new marking before it is committed; if
    /// it fails, the net and the history stay as they were.
    pub fn fire_transition(&mut self, transition: &str) -> Result<Firing, AnimationError> {
        let timed = self
            .net
            .transition(transition)
            .map_err(|_| AnimationError::UnknownTransition(transition.to_string()))?
            .kind
            .is_timed();
        if !self.get_enabled_transitions()?.contains(transition) {
            return Err(AnimationError::NotEnabled(transition.to_string()));
        }

        let before = self.net.state().clone();
        let after = self.logic.fire(&self.net, &before, transition)?;
        if let Some(handler) = self.net.handler_mut(transition) {
            handler.fire(transition, &after).map_err(|message| AnimationError::Handler {
                transition: transition.to_string(),
                message,
            })?;
        }

        let timing = self.net.timing().clone();
        self.net.set_state(after.clone());
        if timed {
            self.net.timing_mut().dequeue(transition);
        }
        if let Err(err) = self.resync() {
            self.net.set_state(before);
            *self.net.timing_mut() = timing;
            return Err(err);
        }

        let firing = Firing {
            transition: transition.to_string(),
            time: self.current_time(),
            changes: TokenChange::diff(&before, &after),
        };
        log::debug!(
            "fired `{transition}` at {}: {} token changes",
            firing.time,
            firing.changes.len()
        );
        self.history.push(firing.clone());
        Ok(firing)
    }

    /// Applies the inverse deltas of `transition` to the current marking.
    /// Rewinding the most recent firing also drops it from the history.
    pub fn fire_transition_backwards(&mut self, transition: &str) -> Result<Firing, AnimationError> {
        self.net
            .transition(transition)
            .map_err(|_| AnimationError::UnknownTransition(transition.to_string()))?;
        let before = self.net.state().clone();
        let after = self.logic.fire_backwards(&self.net, &before, transition)?;
        self.net.set_state(after.clone());
        self.resync()?;
        if self.history.last().is_some_and(|last| last.transition == transition) {
            self.history.pop();
        }
        log::debug!("fired `{transition}` backwards");
        Ok(Firing {
            transition: transition.to_string(),
            time: self.current_time(),
            changes: TokenChange::diff(&before, &after),
        })
    }

    /// Restores the counts the most recent forward firing changed.
    pub fn undo_last(&mut self) -> Result<Option<Firing>, AnimationError> {
        let Some(last) = self.history.pop() else {
            return Ok(None);
        };
        let mut state = self.net.state().clone();
        for change in &last.changes {
            state.put(&change.place, &change.color, change.before);
        }
        self.net.set_state(state);
        self.resync()?;
        Ok(Some(last))
    }

    /// Back to the initial marking and the configured start time, with
    /// every enabled timed transition rescheduled.
    pub fn reset(&mut self) -> Result<(), AnimationError> {
        let initial = self.net.initial_state();
        self.net.set_state(initial);
        self.history.clear();
        let start = self.start_time;
        self.net.reset_timing(start)?;
        log::debug!(
            "animator reset to {start} with {} timed transitions queued",
            self.net.timing().len()
        );
        Ok(())
    }

    /// Moves the clock to `time` and reports what is due; nothing fires.
    pub fn advance_net_to_time(&mut self, time: u64) -> BTreeSet<String> {
        self.net.timing_mut().advance_to(time)
    }

    /// Re-aligns the timing queue with the current marking.
    pub fn resync(&mut self) -> Result<(), AnimationError> {
        let enabled = self.net.enabled_timed(&self.logic)?;
        self.net
            .timing_mut()
            .rebuild(enabled.iter().map(|(id, delay)| (id.as_str(), *delay)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{Compiler, ExternalTransition, HandlerRegistry, flatten};
    use crate::hierarchy::IncludeHierarchy;
    use crate::net::{Arc, DEFAULT_COLOR, PetriNet, Place, Transition};

    fn animator() -> Animator {
        let mut net = PetriNet::new("root");
        net.add_place(Place::new("P0").with_tokens(DEFAULT_COLOR, 2u64)).unwrap();
        net.add_place(Place::new("P1")).unwrap();
        net.add_place(Place::new("P2")).unwrap();
        net.add_transition(Transition::new("T0")).unwrap();
        net.add_transition(Transition::timed("T1", 5)).unwrap();
        net.add_arc(Arc::inbound("a0", "P0", "T0").with_weight(DEFAULT_COLOR, "1")).unwrap();
        net.add_arc(Arc::outbound("a1", "T0", "P1").with_weight(DEFAULT_COLOR, "1")).unwrap();
        net.add_arc(Arc::inbound("a2", "P1", "T1").with_weight(DEFAULT_COLOR, "1")).unwrap();
        net.add_arc(Arc::outbound("a3", "T1", "P2").with_weight(DEFAULT_COLOR, "1")).unwrap();
        let net = flatten(&IncludeHierarchy::new(net, "root")).unwrap();
        Animator::with_seed(net, 7).unwrap()
    }

    #[test]
    fn firing_records_changes_and_schedules_timed_transitions() {
        let mut animator = animator();
        assert!(animator.net().timing().is_empty());

        let firing = animator.fire_transition("T0").unwrap();
        assert_eq!(firing.changes.len(), 2);
        assert_eq!(firing.changes[0].place, "P0");
        assert_eq!(firing.changes[0].delta(), -1);
        assert_eq!(animator.net().timing().fire_time("T1"), Some(5));

        assert_eq!(
            animator.fire_transition("T1").unwrap_err(),
            AnimationError::NotEnabled("T1".into())
        );
        assert!(!animator.get_enabled_transitions().unwrap().contains("T1"));
    }

    #[test]
    fn advancing_reports_due_transitions_without_firing() {
        let mut animator = animator();
        animator.fire_transition("T0").unwrap();
        let before = animator.state().clone();

        assert!(animator.advance_net_to_time(4).is_empty());
        let due = animator.advance_net_to_time(5);
        assert!(due.contains("T1"));
        assert_eq!(animator.state(), &before);
        assert!(animator.get_enabled_transitions().unwrap().contains("T1"));

        animator.fire_transition("T1").unwrap();
        assert_eq!(animator.state().tokens("P2", DEFAULT_COLOR), Count::from(1));
        assert!(!animator.net().timing().is_scheduled("T1"));
    }

    #[test]
    fn backwards_and_undo_restore_markings() {
        let mut animator = animator();
        let initial = animator.state().clone();
        animator.fire_transition("T0").unwrap();
        animator.fire_transition_backwards("T0").unwrap();
        assert_eq!(animator.state(), &initial);
        assert!(animator.net().timing().is_empty());

        animator.fire_transition("T0").unwrap();
        let undone = animator.undo_last().unwrap().unwrap();
        assert_eq!(undone.transition, "T0");
        assert_eq!(animator.state(), &initial);
        assert_eq!(animator.undo_last().unwrap(), None);

        assert!(matches!(
            animator.fire_transition_backwards("T1"),
            Err(AnimationError::NegativeCount { .. })
        ));
    }

    #[test]
    fn reset_restores_the_initial_marking() {
        let mut animator = animator();
        animator.fire_transition("T0").unwrap();
        animator.advance_net_to_time(3);
        animator.reset().unwrap();
        assert_eq!(animator.current_time(), 0);
        assert_eq!(animator.state(), &animator.net().initial_state());
        assert!(animator.history().is_empty());
    }

    struct Refuses;

    impl ExternalTransition for Refuses {
        fn set_context(&mut self, _context: &serde_json::Value) {}

        fn set_executable_net(&mut self, _net: &ExecutableNet) {}

        fn fire(&mut self, _transition: &str, _state: &State) -> Result<(), String> {
            Err("refused".to_string())
        }
    }

    #[test]
    fn failing_handler_leaves_everything_in_place() {
        let mut net = PetriNet::new("root");
        net.add_place(Place::new("P0").with_tokens(DEFAULT_COLOR, 1u64)).unwrap();
        net.add_place(Place::new("P1")).unwrap();
        net.add_transition(Transition::new("T0").with_handler("refuses")).unwrap();
        net.add_transition(Transition::timed("T1", 4)).unwrap();
        net.add_arc(Arc::inbound("a0", "P0", "T0").with_weight(DEFAULT_COLOR, "1")).unwrap();
        net.add_arc(Arc::outbound("a1", "T0", "P1").with_weight(DEFAULT_COLOR, "1")).unwrap();
        net.add_arc(Arc::inbound("a2", "P0", "T1").with_weight(DEFAULT_COLOR, "1")).unwrap();
        let mut handlers = HandlerRegistry::new();
        handlers.register("refuses", || Ok(Box::new(Refuses) as Box<dyn ExternalTransition>));
        let net = Compiler::with_handlers(handlers)
            .flatten(&IncludeHierarchy::new(net, "root"))
            .unwrap();
        let mut animator = Animator::with_seed(net, 5).unwrap();
        let before = animator.state().clone();

        let err = animator.fire_transition("T0").unwrap_err();
        assert!(matches!(err, AnimationError::Handler { ref message, .. } if message == "refused"));
        assert_eq!(animator.state(), &before);
        assert_eq!(animator.net().timing().fire_time("T1"), Some(4));
        assert!(animator.history().is_empty());
        assert_eq!(animator.undo_last().unwrap(), None);
        assert_eq!(animator.state(), &before);
    }

    #[test]
    fn huge_counts_saturate_the_delta() {
        let change = TokenChange {
            place: "P0".into(),
            color: DEFAULT_COLOR.into(),
            before: Count::ZERO,
            after: Count::from(u64::MAX - 1),
        };
        assert_eq!(change.delta(), i64::MAX);
        let back = TokenChange {
            before: change.after,
            after: change.before,
            ..change.clone()
        };
        assert_eq!(back.delta(), -i64::MAX);
    }

    #[test]
    fn seeded_choice_is_reproducible() {
        let mut a = animator();
        let mut b = animator();
        for _ in 0..2 {
            let pick = a.get_random_enabled_transition().unwrap();
            assert_eq!(pick, b.get_random_enabled_transition().unwrap());
            if let Some(id) = pick {
                a.fire_transition(&id).unwrap();
                b.fire_transition(&id).unwrap();
            }
        }
        assert_eq!(a.get_random_enabled_transition().unwrap(), None);
    }
}
