//! # 着色 Petri 网模型
//!
//! 网模型由库所、迁移、弧、令牌颜色、速率参数与注释构成，组件以字符串
//! id 标识，且在同一个网内唯一。每个库所对每种颜色保存一个令牌数，
//! 令牌数可以取无穷哨兵值 `∞`，该值不受加减影响。
//!
//! * 输入弧（库所 -> 迁移）分为普通弧、抑制弧与测试弧；
//! * 输出弧（迁移 -> 库所）只能是普通弧；
//! * 弧权重与迁移速率都是[函数表达式](expr)，可以引用其它库所的当前令牌数。
//!
//! ## 示例
//!
//! ```rust
//! use hpn::net::*;
//!
//! let mut net = PetriNet::new("simple");
//! net.add_place(Place::new("P0").with_tokens(DEFAULT_COLOR, 2u64)).unwrap();
//! net.add_place(Place::new("P1")).unwrap();
//! net.add_transition(Transition::new("T0")).unwrap();
//! net.add_arc(Arc::inbound("P0 TO T0", "P0", "T0").with_weight(DEFAULT_COLOR, "1")).unwrap();
//! net.add_arc(Arc::outbound("T0 TO P1", "T0", "P1").with_weight(DEFAULT_COLOR, "1")).unwrap();
//!
//! let place = net.get_component("P0", ComponentKind::Place).unwrap();
//! assert_eq!(place.id(), "P0");
//! ```

pub mod arena;
pub mod expr;
pub mod ids;
pub mod model;
pub mod state;
pub mod structure;

pub use arena::{Arena, Idx};
pub use expr::{EvalContext, Expr, ExprError};
pub use ids::{ComponentKind, NodeId, qualify};
pub use model::{NetError, PetriNet};
pub use state::State;
pub use structure::{
    Annotation, Arc, ArcDirection, ArcKind, ArcPoint, ComponentRef, Count, DEFAULT_COLOR, HomeRef,
    MergeInterfaceState, Place, PlaceStatus, Rate, RateParameter, TokenColor, Transition,
    TransitionKind,
};
