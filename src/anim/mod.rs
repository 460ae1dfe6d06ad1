//! # 执行：使能逻辑、定时队列与动画器
//!
//! [`AnimationLogic`] 只依赖传入的可执行网与标识，自身不持有网；
//! [`Animator`] 编排单次发射、反向发射与时钟推进；[`Playback`] 在一个
//! 独立线程中按墙钟节奏反复调用动画器。

pub mod animator;
pub mod firing;
pub mod playback;
pub mod timing;

use thiserror::Error;

use crate::net::ExprError;

pub use animator::{Animator, Firing, TokenChange};
pub use firing::AnimationLogic;
pub use playback::{Playback, PlaybackOptions};
pub use timing::TimingQueue;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnimationError {
    #[error("unknown transition `{0}`")]
    UnknownTransition(String),
    #[error("transition `{0}` is not enabled")]
    NotEnabled(String),
    #[error("cannot evaluate `{component}`: {source}")]
    Evaluation {
        component: String,
        #[source]
        source: ExprError,
    },
    #[error("firing `{transition}` backwards would leave `{place}` with a negative count")]
    NegativeCount { transition: String, place: String },
    #[error("handler of `{transition}` failed: {message}")]
    Handler { transition: String, message: String },
    #[error("playback worker failed: {0}")]
    Worker(String),
}
