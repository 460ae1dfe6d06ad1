//! 网模型静态结构元素：颜色、库所、迁移、弧、速率参数与注释。
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::net::ids::{ComponentKind, NodeId};

/// Id of the color every net starts with.
pub const DEFAULT_COLOR: &str = "Default";

/// Token count of one color in one place.
///
/// Valid counts are nonnegative integers or the infinite sentinel, which
/// absorbs both increments and decrements.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Count(u64);

impl Count {
    pub const ZERO: Count = Count(0);
    pub const INFINITE: Count = Count(u64::MAX);

    /// Finite count; `u64::MAX` is reserved for the sentinel and is
    /// clamped one below it.
    pub const fn finite(value: u64) -> Self {
        if value == u64::MAX { Count(u64::MAX - 1) } else { Count(value) }
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == u64::MAX
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn add(self, other: Count) -> Count {
        if self.is_infinite() || other.is_infinite() {
            Count::INFINITE
        } else {
            Count::finite(self.0.saturating_add(other.0))
        }
    }

    /// `None` when a finite count would drop below zero.
    pub fn checked_sub(self, other: Count) -> Option<Count> {
        if self.is_infinite() {
            Some(self)
        } else if other.is_infinite() {
            None
        } else {
            self.0.checked_sub(other.0).map(Count)
        }
    }

    /// Largest `k` with `k * weight <= self`; `None` when unbounded.
    pub fn multiples_of(self, weight: Count) -> Option<u64> {
        if self.is_infinite() || weight.is_zero() {
            None
        } else if weight.is_infinite() {
            Some(0)
        } else {
            Some(self.0 / weight.0)
        }
    }

    pub fn as_f64(self) -> f64 {
        if self.is_infinite() { f64::INFINITY } else { self.0 as f64 }
    }
}

impl From<u64> for Count {
    fn from(value: u64) -> Self {
        Count::finite(value)
    }
}

impl fmt::Debug for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Count({self})")
    }
}

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() { f.write_str("∞") } else { self.0.fmt(f) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenColor {
    pub id: String,
    pub rgb: (u8, u8, u8),
}

impl TokenColor {
    pub fn new(id: impl Into<String>, rgb: (u8, u8, u8)) -> Self {
        Self { id: id.into(), rgb }
    }
}

impl Default for TokenColor {
    fn default() -> Self {
        Self::new(DEFAULT_COLOR, (0, 0, 0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub text: String,
    pub x: f64,
    pub y: f64,
}

impl Annotation {
    pub fn new(id: impl Into<String>, text: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            x,
            y,
        }
    }
}

/// 接口库所在某个层次节点中的合并状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MergeInterfaceState {
    /// Not an interface place.
    #[default]
    NoOp,
    /// Defined by this node.
    Home,
    /// Visible from this node but not materialized.
    Available,
    /// Materialized here as a real place.
    InUse,
    /// Materialized here but standing for a foreign home place.
    Away,
}

/// Where an interface place is defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HomeRef {
    pub node: NodeId,
    pub place: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PlaceStatus {
    pub merge: MergeInterfaceState,
    /// Set on materialized interface places that stand for a foreign home.
    pub home: Option<HomeRef>,
    pub external: bool,
    pub input_only: bool,
    pub output_only: bool,
}

impl PlaceStatus {
    pub fn is_interface(&self) -> bool {
        self.merge != MergeInterfaceState::NoOp
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub tokens: IndexMap<String, Count>,
    /// 0 表示无界
    pub capacity: u64,
    pub status: PlaceStatus,
}

impl Place {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tokens: IndexMap::new(),
            capacity: 0,
            status: PlaceStatus::default(),
        }
    }

    pub fn with_tokens(mut self, color: impl Into<String>, count: impl Into<Count>) -> Self {
        self.tokens.insert(color.into(), count.into());
        self
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_status(mut self, status: PlaceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn count(&self, color: &str) -> Count {
        self.tokens.get(color).copied().unwrap_or_default()
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    Immediate,
    Timed,
    /// Timed transition whose rate scales with its enabling degree.
    TimedInfiniteServer,
}

impl TransitionKind {
    pub fn is_timed(self) -> bool {
        !matches!(self, TransitionKind::Immediate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rate {
    Expression(String),
    /// Id of a rate parameter in the same net.
    Parameter(String),
}

impl Default for Rate {
    fn default() -> Self {
        Rate::Expression("1".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    pub priority: i32,
    pub kind: TransitionKind,
    pub rate: Rate,
    /// Firing delay of timed transitions, in clock units.
    pub delay: u64,
    /// Name of an [`ExternalTransition`](crate::compile::ExternalTransition)
    /// handler resolved when the hierarchy is flattened.
    pub handler: Option<String>,
}

impl Transition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: 1,
            kind: TransitionKind::Immediate,
            rate: Rate::default(),
            delay: 0,
            handler: None,
        }
    }

    pub fn timed(id: impl Into<String>, delay: u64) -> Self {
        Self {
            kind: TransitionKind::Timed,
            delay,
            ..Self::new(id)
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: TransitionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_rate(mut self, rate: Rate) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArcDirection {
    PlaceToTransition,
    TransitionToPlace,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArcKind {
    Normal,
    Inhibitor,
    /// Requires the tokens without consuming them.
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArcPoint {
    pub x: f64,
    pub y: f64,
    pub curved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    pub id: String,
    pub source: String,
    pub target: String,
    pub direction: ArcDirection,
    pub kind: ArcKind,
    /// color -> weight expression
    pub weights: IndexMap<String, String>,
    pub points: Vec<ArcPoint>,
}

impl Arc {
    pub fn inbound(id: impl Into<String>, place: impl Into<String>, transition: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: place.into(),
            target: transition.into(),
            direction: ArcDirection::PlaceToTransition,
            kind: ArcKind::Normal,
            weights: IndexMap::new(),
            points: Vec::new(),
        }
    }

    pub fn outbound(id: impl Into<String>, transition: impl Into<String>, place: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: transition.into(),
            target: place.into(),
            direction: ArcDirection::TransitionToPlace,
            kind: ArcKind::Normal,
            weights: IndexMap::new(),
            points: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: ArcKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_weight(mut self, color: impl Into<String>, expression: impl Into<String>) -> Self {
        self.weights.insert(color.into(), expression.into());
        self
    }

    pub fn with_point(mut self, x: f64, y: f64, curved: bool) -> Self {
        self.points.push(ArcPoint { x, y, curved });
        self
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == ArcDirection::PlaceToTransition
    }

    pub fn place(&self) -> &str {
        match self.direction {
            ArcDirection::PlaceToTransition => &self.source,
            ArcDirection::TransitionToPlace => &self.target,
        }
    }

    pub fn transition(&self) -> &str {
        match self.direction {
            ArcDirection::PlaceToTransition => &self.target,
            ArcDirection::TransitionToPlace => &self.source,
        }
    }

    pub fn place_mut(&mut self) -> &mut String {
        match self.direction {
            ArcDirection::PlaceToTransition => &mut self.source,
            ArcDirection::TransitionToPlace => &mut self.target,
        }
    }

    pub fn transition_mut(&mut self) -> &mut String {
        match self.direction {
            ArcDirection::PlaceToTransition => &mut self.target,
            ArcDirection::TransitionToPlace => &mut self.source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateParameter {
    pub id: String,
    pub expression: String,
}

impl RateParameter {
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            expression: expression.into(),
        }
    }
}

/// Borrowed view of any component of a net, one variant per kind.
#[derive(Debug, Clone, Copy)]
pub enum ComponentRef<'a> {
    Color(&'a TokenColor),
    Annotation(&'a Annotation),
    Place(&'a Place),
    RateParameter(&'a RateParameter),
    Transition(&'a Transition),
    Arc(&'a Arc),
}

impl ComponentRef<'_> {
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentRef::Color(_) => ComponentKind::Color,
            ComponentRef::Annotation(_) => ComponentKind::Annotation,
            ComponentRef::Place(_) => ComponentKind::Place,
            ComponentRef::RateParameter(_) => ComponentKind::RateParameter,
            ComponentRef::Transition(_) => ComponentKind::Transition,
            ComponentRef::Arc(_) => ComponentKind::Arc,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ComponentRef::Color(c) => &c.id,
            ComponentRef::Annotation(a) => &a.id,
            ComponentRef::Place(p) => &p.id,
            ComponentRef::RateParameter(r) => &r.id,
            ComponentRef::Transition(t) => &t.id,
            ComponentRef::Arc(a) => &a.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_count_absorbs_arithmetic() {
        let inf = Count::INFINITE;
        assert_eq!(inf.add(Count::from(3)), Count::INFINITE);
        assert_eq!(inf.checked_sub(Count::from(3)), Some(Count::INFINITE));
        assert_eq!(Count::from(2).checked_sub(Count::from(3)), None);
        assert_eq!(Count::from(2).checked_sub(inf), None);
        assert_eq!(inf.to_string(), "∞");
    }

    #[test]
    fn multiples_of_weight() {
        assert_eq!(Count::from(7).multiples_of(Count::from(2)), Some(3));
        assert_eq!(Count::INFINITE.multiples_of(Count::from(2)), None);
        assert_eq!(Count::from(7).multiples_of(Count::ZERO), None);
    }

    #[test]
    fn arc_endpoints_follow_direction() {
        let inbound = Arc::inbound("a0", "P0", "T0");
        let outbound = Arc::outbound("a1", "T0", "P1");
        assert_eq!((inbound.place(), inbound.transition()), ("P0", "T0"));
        assert_eq!((outbound.place(), outbound.transition()), ("P1", "T0"));
    }
}
