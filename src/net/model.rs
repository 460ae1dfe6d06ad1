//! 可编辑的网模型：组件按 id 存放，任何修改都会推进修订号。
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::expr::{Expr, ExprError};
use crate::net::ids::ComponentKind;
use crate::net::structure::{
    Annotation, Arc, ArcKind, ComponentRef, Count, Place, PlaceStatus, Rate, RateParameter,
    TokenColor, Transition,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetError {
    #[error("no {kind} with id `{id}`")]
    NotFound { id: String, kind: ComponentKind },
    #[error("{kind} `{id}` already exists")]
    Duplicate { id: String, kind: ComponentKind },
    #[error("arc `{arc}` must connect a place and a transition, found `{source_id}` -> `{target_id}`")]
    InvalidEndpoint {
        arc: String,
        source_id: String,
        target_id: String,
    },
    #[error("arc `{arc}` violates the status of place `{place}`: {reason}")]
    StatusViolation {
        arc: String,
        place: String,
        reason: &'static str,
    },
    #[error("{kind} `{id}` is still used by `{user}`")]
    InUse {
        id: String,
        kind: ComponentKind,
        user: String,
    },
    #[error("outbound arc `{0}` must be a normal arc")]
    OutboundKind(String),
    #[error("invalid expression on {component}: {source}")]
    InvalidExpression {
        component: String,
        #[source]
        source: ExprError,
    },
}

impl NetError {
    pub fn not_found(id: impl Into<String>, kind: ComponentKind) -> Self {
        NetError::NotFound {
            id: id.into(),
            kind,
        }
    }
}

/// 网模型，层次结构中每个节点包装一个。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetriNet {
    pub name: String,
    colors: IndexMap<String, TokenColor>,
    annotations: IndexMap<String, Annotation>,
    places: IndexMap<String, Place>,
    rate_parameters: IndexMap<String, RateParameter>,
    transitions: IndexMap<String, Transition>,
    arcs: IndexMap<String, Arc>,
    #[serde(skip)]
    revision: u64,
    #[serde(skip)]
    marking_revision: u64,
}

impl PetriNet {
    /// An empty net holding only the default color.
    pub fn new(name: impl Into<String>) -> Self {
        let default = TokenColor::default();
        Self {
            name: name.into(),
            colors: IndexMap::from([(default.id.clone(), default)]),
            annotations: IndexMap::new(),
            places: IndexMap::new(),
            rate_parameters: IndexMap::new(),
            transitions: IndexMap::new(),
            arcs: IndexMap::new(),
            revision: 0,
            marking_revision: 0,
        }
    }

    /// Bumped on every structural mutation; dependants compare it to
    /// decide whether they have to be rebuilt.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Bumped whenever a token count changes.
    pub fn marking_revision(&self) -> u64 {
        self.marking_revision
    }

    fn touch(&mut self) {
        self.revision += 1;
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

    pub fn inbound_arcs(&self) -> impl Iterator<Item = &Arc> {
        self.arcs.values().filter(|arc| arc.is_inbound())
    }

    pub fn outbound_arcs(&self) -> impl Iterator<Item = &Arc> {
        self.arcs.values().filter(|arc| !arc.is_inbound())
    }

    pub fn contains_place(&self, id: &str) -> bool {
        self.places.contains_key(id)
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

    pub fn get_component(&self, id: &str, kind: ComponentKind) -> Result<ComponentRef<'_>, NetError> {
        let found = match kind {
            ComponentKind::Color => self.colors.get(id).map(ComponentRef::Color),
            ComponentKind::Annotation => self.annotations.get(id).map(ComponentRef::Annotation),
            ComponentKind::Place => self.places.get(id).map(ComponentRef::Place),
            ComponentKind::RateParameter => self.rate_parameters.get(id).map(ComponentRef::RateParameter),
            ComponentKind::Transition => self.transitions.get(id).map(ComponentRef::Transition),
            ComponentKind::Arc => self.arcs.get(id).map(ComponentRef::Arc),
        };
        found.ok_or_else(|| NetError::not_found(id, kind))
    }

    pub fn add_color(&mut self, color: TokenColor) -> Result<(), NetError> {
        if self.colors.contains_key(&color.id) {
            return Err(NetError::Duplicate {
                id: color.id,
                kind: ComponentKind::Color,
            });
        }
        self.colors.insert(color.id.clone(), color);
        self.touch();
        Ok(())
    }

    pub fn add_annotation(&mut self, annotation: Annotation) -> Result<(), NetError> {
        if self.annotations.contains_key(&annotation.id) {
            return Err(NetError::Duplicate {
                id: annotation.id,
                kind: ComponentKind::Annotation,
            });
        }
        self.annotations.insert(annotation.id.clone(), annotation);
        self.touch();
        Ok(())
    }

    pub fn add_place(&mut self, place: Place) -> Result<(), NetError> {
        if self.places.contains_key(&place.id) || self.transitions.contains_key(&place.id) {
            return Err(NetError::Duplicate {
                id: place.id,
                kind: ComponentKind::Place,
            });
        }
        self.places.insert(place.id.clone(), place);
        self.touch();
        Ok(())
    }

    pub fn add_rate_parameter(&mut self, parameter: RateParameter) -> Result<(), NetError> {
        if self.rate_parameters.contains_key(&parameter.id) {
            return Err(NetError::Duplicate {
                id: parameter.id,
                kind: ComponentKind::RateParameter,
            });
        }
        Expr::parse(&parameter.expression).map_err(|source| NetError::InvalidExpression {
            component: parameter.id.clone(),
            source,
        })?;
        self.rate_parameters.insert(parameter.id.clone(), parameter);
        self.touch();
        Ok(())
    }

    pub fn add_transition(&mut self, transition: Transition) -> Result<(), NetError> {
        if self.transitions.contains_key(&transition.id) || self.places.contains_key(&transition.id) {
            return Err(NetError::Duplicate {
                id: transition.id,
                kind: ComponentKind::Transition,
            });
        }
        match &transition.rate {
            Rate::Expression(text) => {
                Expr::parse(text).map_err(|source| NetError::InvalidExpression {
                    component: transition.id.clone(),
                    source,
                })?;
            }
            Rate::Parameter(id) if !self.rate_parameters.contains_key(id) => {
                return Err(NetError::not_found(id.as_str(), ComponentKind::RateParameter));
            }
            Rate::Parameter(_) => {}
        }
        self.transitions.insert(transition.id.clone(), transition);
        self.touch();
        Ok(())
    }

    /// Adds an arc after checking both endpoints and the place status.
    pub fn add_arc(&mut self, arc: Arc) -> Result<(), NetError> {
        if self.arcs.contains_key(&arc.id) {
            return Err(NetError::Duplicate {
                id: arc.id,
                kind: ComponentKind::Arc,
            });
        }
        let place = self.places.get(arc.place());
        if place.is_none() || !self.transitions.contains_key(arc.transition()) {
            return Err(NetError::InvalidEndpoint {
                arc: arc.id.clone(),
                source_id: arc.source.clone(),
                target_id: arc.target.clone(),
            });
        }
        if let Some(place) = place {
            check_status(&arc, &place.status)?;
        }
        if !arc.is_inbound() && arc.kind != ArcKind::Normal {
            return Err(NetError::OutboundKind(arc.id));
        }
        for (color, weight) in &arc.weights {
            if !self.colors.contains_key(color) {
                return Err(NetError::not_found(color.as_str(), ComponentKind::Color));
            }
            Expr::parse(weight).map_err(|source| NetError::InvalidExpression {
                component: arc.id.clone(),
                source,
            })?;
        }
        self.arcs.insert(arc.id.clone(), arc);
        self.touch();
        Ok(())
    }

    /// Removes a place together with every arc attached to it.
    pub fn remove_place(&mut self, id: &str) -> Result<Place, NetError> {
        let place = self
            .places
            .shift_remove(id)
            .ok_or_else(|| NetError::not_found(id, ComponentKind::Place))?;
        self.arcs.retain(|_, arc| arc.place() != id);
        self.touch();
        Ok(place)
    }

    pub fn remove_transition(&mut self, id: &str) -> Result<Transition, NetError> {
        let transition = self
            .transitions
            .shift_remove(id)
            .ok_or_else(|| NetError::not_found(id, ComponentKind::Transition))?;
        self.arcs.retain(|_, arc| arc.transition() != id);
        self.touch();
        Ok(transition)
    }

    pub fn remove_arc(&mut self, id: &str) -> Result<Arc, NetError> {
        let arc = self
            .arcs
            .shift_remove(id)
            .ok_or_else(|| NetError::not_found(id, ComponentKind::Arc))?;
        self.touch();
        Ok(arc)
    }

    pub fn remove_rate_parameter(&mut self, id: &str) -> Result<RateParameter, NetError> {
        if let Some(user) = self
            .transitions
            .values()
            .find(|t| t.rate == Rate::Parameter(id.to_string()))
        {
            return Err(NetError::InUse {
                id: id.to_string(),
                kind: ComponentKind::RateParameter,
                user: user.id.clone(),
            });
        }
        let parameter = self
            .rate_parameters
            .shift_remove(id)
            .ok_or_else(|| NetError::not_found(id, ComponentKind::RateParameter))?;
        self.touch();
        Ok(parameter)
    }

    pub fn set_tokens(&mut self, place: &str, color: &str, count: Count) -> Result<(), NetError> {
        if !self.colors.contains_key(color) {
            return Err(NetError::not_found(color, ComponentKind::Color));
        }
        let entry = self
            .places
            .get_mut(place)
            .ok_or_else(|| NetError::not_found(place, ComponentKind::Place))?;
        entry.tokens.insert(color.to_string(), count);
        self.marking_revision += 1;
        Ok(())
    }

    pub fn set_capacity(&mut self, place: &str, capacity: u64) -> Result<(), NetError> {
        let entry = self
            .places
            .get_mut(place)
            .ok_or_else(|| NetError::not_found(place, ComponentKind::Place))?;
        entry.capacity = capacity;
        self.touch();
        Ok(())
    }

    pub fn set_place_status(&mut self, place: &str, status: PlaceStatus) -> Result<(), NetError> {
        let entry = self
            .places
            .get_mut(place)
            .ok_or_else(|| NetError::not_found(place, ComponentKind::Place))?;
        entry.status = status;
        self.touch();
        Ok(())
    }

    pub fn set_arc_weight(&mut self, arc: &str, color: &str, expression: &str) -> Result<(), NetError> {
        Expr::parse(expression).map_err(|source| NetError::InvalidExpression {
            component: arc.to_string(),
            source,
        })?;
        if !self.colors.contains_key(color) {
            return Err(NetError::not_found(color, ComponentKind::Color));
        }
        let entry = self
            .arcs
            .get_mut(arc)
            .ok_or_else(|| NetError::not_found(arc, ComponentKind::Arc))?;
        entry.weights.insert(color.to_string(), expression.to_string());
        self.touch();
        Ok(())
    }

    pub fn set_transition_rate(&mut self, transition: &str, rate: Rate) -> Result<(), NetError> {
        if let Rate::Expression(text) = &rate {
            Expr::parse(text).map_err(|source| NetError::InvalidExpression {
                component: transition.to_string(),
                source,
            })?;
        }
        let entry = self
            .transitions
            .get_mut(transition)
            .ok_or_else(|| NetError::not_found(transition, ComponentKind::Transition))?;
        entry.rate = rate;
        self.touch();
        Ok(())
    }

    pub fn set_transition_delay(&mut self, transition: &str, delay: u64) -> Result<(), NetError> {
        let entry = self
            .transitions
            .get_mut(transition)
            .ok_or_else(|| NetError::not_found(transition, ComponentKind::Transition))?;
        entry.delay = delay;
        self.touch();
        Ok(())
    }

    /// Renames a place and rewrites every arc and expression that uses it.
    pub fn rename_place(&mut self, from: &str, to: &str) -> Result<(), NetError> {
        if self.places.contains_key(to) || self.transitions.contains_key(to) {
            return Err(NetError::Duplicate {
                id: to.to_string(),
                kind: ComponentKind::Place,
            });
        }
        let index = self
            .places
            .get_index_of(from)
            .ok_or_else(|| NetError::not_found(from, ComponentKind::Place))?;
        let mut rename = |id: &str| (id == from).then(|| to.to_string());
        let rewrite = |text: &mut String, rename: &mut dyn FnMut(&str) -> Option<String>| {
            if let Ok(mut expr) = Expr::parse(text) {
                if expr.places().contains(from) {
                    expr.rewrite_places(&mut |id| rename(id));
                    *text = expr.to_string();
                }
            }
        };

        for arc in self.arcs.values_mut() {
            if arc.place() == from {
                *arc.place_mut() = to.to_string();
            }
            for weight in arc.weights.values_mut() {
                rewrite(weight, &mut rename);
            }
        }
        for parameter in self.rate_parameters.values_mut() {
            rewrite(&mut parameter.expression, &mut rename);
        }
        for transition in self.transitions.values_mut() {
            if let Rate::Expression(text) = &mut transition.rate {
                rewrite(text, &mut rename);
            }
        }

        if let Some((_, mut place)) = self.places.swap_remove_index(index) {
            place.id = to.to_string();
            let (last, _) = self.places.insert_full(to.to_string(), place);
            self.places.swap_indices(index, last);
        }
        self.touch();
        Ok(())
    }

    /// Components whose arcs or expressions mention `place`, each with a
    /// human readable reason.
    pub fn place_references(&self, place: &str) -> Vec<(String, String)> {
        let mut found = Vec::new();
        for arc in self.arcs.values() {
            if arc.place() == place {
                found.push((arc.id.clone(), format!("arc `{}` is connected to `{place}`", arc.id)));
                continue;
            }
            let uses = arc
                .weights
                .values()
                .filter_map(|text| Expr::parse(text).ok())
                .any(|expr| expr.references_place(place));
            if uses {
                found.push((arc.id.clone(), format!("weight of arc `{}` references `{place}`", arc.id)));
            }
        }
        for parameter in self.rate_parameters.values() {
            if Expr::parse(&parameter.expression).is_ok_and(|expr| expr.references_place(place)) {
                found.push((
                    parameter.id.clone(),
                    format!("rate parameter `{}` references `{place}`", parameter.id),
                ));
            }
        }
        for transition in self.transitions.values() {
            if let Rate::Expression(text) = &transition.rate {
                if Expr::parse(text).is_ok_and(|expr| expr.references_place(place)) {
                    found.push((
                        transition.id.clone(),
                        format!("rate of transition `{}` references `{place}`", transition.id),
                    ));
                }
            }
        }
        found
    }
}

fn check_status(arc: &Arc, status: &PlaceStatus) -> Result<(), NetError> {
    let place = arc.place().to_string();
    if status.input_only && arc.is_inbound() {
        return Err(NetError::StatusViolation {
            arc: arc.id.clone(),
            place,
            reason: "an input-only place cannot feed a transition",
        });
    }
    if status.output_only && !arc.is_inbound() {
        return Err(NetError::StatusViolation {
            arc: arc.id.clone(),
            place,
            reason: "an output-only place cannot receive tokens",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::structure::DEFAULT_COLOR;

    fn simple() -> PetriNet {
        let mut net = PetriNet::new("simple");
        net.add_place(Place::new("P0").with_tokens(DEFAULT_COLOR, 2u64)).unwrap();
        net.add_place(Place::new("P1")).unwrap();
        net.add_transition(Transition::new("T0")).unwrap();
        net.add_arc(Arc::inbound("P0 TO T0", "P0", "T0").with_weight(DEFAULT_COLOR, "1"))
            .unwrap();
        net.add_arc(Arc::outbound("T0 TO P1", "T0", "P1").with_weight(DEFAULT_COLOR, "#(P0)"))
            .unwrap();
        net
    }

    #[test]
    fn component_lookup_by_kind() {
        let net = simple();
        let place = net.get_component("P0", ComponentKind::Place).unwrap();
        assert_eq!(place.kind(), ComponentKind::Place);
        assert_eq!(place.id(), "P0");
        assert_eq!(
            net.get_component("P0", ComponentKind::Transition).unwrap_err(),
            NetError::not_found("P0", ComponentKind::Transition)
        );
    }

    #[test]
    fn mutations_bump_revision() {
        let mut net = simple();
        let before = net.revision();
        net.set_tokens("P1", DEFAULT_COLOR, Count::from(4)).unwrap();
        assert_eq!(net.revision(), before);
        assert_eq!(net.marking_revision(), 1);
        net.set_capacity("P1", 3).unwrap();
        assert!(net.revision() > before);
        assert!(net.set_tokens("P9", DEFAULT_COLOR, Count::ZERO).is_err());
    }

    #[test]
    fn rename_place_rewrites_references() {
        let mut net = simple();
        net.rename_place("P0", "Q0").unwrap();
        assert!(net.place("P0").is_err());
        assert_eq!(net.places().next().map(|p| p.id.as_str()), Some("Q0"));
        assert_eq!(net.arc("P0 TO T0").unwrap().source, "Q0");
        assert_eq!(net.arc("T0 TO P1").unwrap().weights[DEFAULT_COLOR], "#(Q0)");
        assert!(net.rename_place("Q0", "T0").is_err());
    }

    #[test]
    fn arcs_are_validated() {
        let mut net = simple();
        assert!(matches!(
            net.add_arc(Arc::inbound("bad", "P0", "P1")),
            Err(NetError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            net.add_arc(Arc::outbound("bad", "T0", "P0").with_weight(DEFAULT_COLOR, "#(")),
            Err(NetError::InvalidExpression { .. })
        ));
        assert!(matches!(
            net.add_arc(Arc::outbound("bad", "T0", "P0").with_kind(ArcKind::Inhibitor)),
            Err(NetError::OutboundKind(_))
        ));

        let status = PlaceStatus {
            input_only: true,
            ..PlaceStatus::default()
        };
        net.add_place(Place::new("In").with_status(status)).unwrap();
        assert!(matches!(
            net.add_arc(Arc::inbound("in", "In", "T0")),
            Err(NetError::StatusViolation { .. })
        ));
        net.add_arc(Arc::outbound("out", "T0", "In")).unwrap();
    }

    #[test]
    fn removing_a_place_drops_its_arcs() {
        let mut net = simple();
        net.remove_place("P1").unwrap();
        assert_eq!(net.arcs().count(), 1);
        assert!(net.arc("T0 TO P1").is_err());
    }

    #[test]
    fn place_references_cover_arcs_and_expressions() {
        let mut net = simple();
        net.add_rate_parameter(RateParameter::new("r", "#(P0) * 2")).unwrap();
        let refs: Vec<_> = net.place_references("P0").into_iter().map(|(id, _)| id).collect();
        assert_eq!(refs, vec!["P0 TO T0".to_string(), "T0 TO P1".to_string(), "r".to_string()]);
    }
}
