//! # hpn: 层次化着色 Petri 网
//!
//! 以包含层次组织多个网模型，经展平编译为单一的可执行网，再由动画器
//! 逐步发射迁移并推进离散时钟。
//!
//! * [`net`]: 网模型、标识与函数表达式；
//! * [`hierarchy`]: 包含层次与接口库所；
//! * [`compile`]: 展平编译器与外部迁移处理器；
//! * [`exec`]: 可执行网与源库所绑定；
//! * [`anim`]: 使能逻辑、定时队列、动画器与后台回放；
//! * [`analysis`]: 可达状态空间。

pub mod analysis;
pub mod anim;
pub mod compile;
pub mod config;
pub mod exec;
pub mod hierarchy;
pub mod net;

pub use anim::{AnimationError, Animator};
pub use compile::{Compiler, IncludeError, flatten};
pub use config::HpnConfig;
pub use exec::ExecutableNet;
pub use hierarchy::IncludeHierarchy;

/// Installs an `env_logger` filtered by `HPN_LOG` (styled by
/// `HPN_LOG_STYLE`). Calling it more than once is harmless.
pub fn init_logger() {
    let env = env_logger::Env::new()
        .filter("HPN_LOG")
        .write_style("HPN_LOG_STYLE");
    let _ = env_logger::Builder::from_env(env).try_init();
}
