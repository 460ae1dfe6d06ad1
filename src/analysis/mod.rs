//! 状态空间分析：从可执行网的当前标识出发构建可达图。
pub mod reachability;

pub use reachability::{StateEdge, StateNode, StateSpace, StateSpaceStats, TransitionFailure};
