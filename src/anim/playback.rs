//! 后台定时回放：单个工作线程按墙钟节奏推进时钟并随机发射。
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::anim::AnimationError;
use crate::anim::animator::Animator;
use crate::config::HpnConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOptions {
    /// Wall-clock pause between two steps.
    pub tick: Duration,
    /// Net time added to the clock on every step.
    pub step: u64,
    /// Stop after this many firings.
    pub max_firings: Option<usize>,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self::from(&HpnConfig::default())
    }
}

impl From<&HpnConfig> for PlaybackOptions {
    fn from(config: &HpnConfig) -> Self {
        Self {
            tick: Duration::from_millis(config.playback_tick_ms),
            step: config.playback_step_ms,
            max_firings: None,
        }
    }
}

/// Handle of a running playback worker.
///
/// Stopping is cooperative: the worker checks the flag between steps.
pub struct Playback {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<usize, AnimationError>>,
}

impl Playback {
    pub fn spawn(animator: Arc<Mutex<Animator>>, options: PlaybackOptions) -> Result<Self, AnimationError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("hpn-playback".into())
            .spawn(move || run(&animator, &flag, options))
            .map_err(|err| AnimationError::Worker(err.to_string()))?;
        log::info!("playback started (step {}, tick {:?})", options.step, options.tick);
        Ok(Self { stop, handle })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker and returns how many transitions it fired.
    pub fn join(self) -> Result<usize, AnimationError> {
        self.handle
            .join()
            .map_err(|_| AnimationError::Worker("playback thread panicked".into()))?
    }
}

fn run(animator: &Mutex<Animator>, stop: &AtomicBool, options: PlaybackOptions) -> Result<usize, AnimationError> {
    let mut fired = 0;
    while !stop.load(Ordering::Acquire) {
        if options.max_firings.is_some_and(|max| fired >= max) {
            break;
        }
        {
            let mut animator = lock(animator);
            let now = animator.current_time();
            animator.advance_net_to_time(now.saturating_add(options.step));
            match animator.get_random_enabled_transition()? {
                Some(transition) => {
                    animator.fire_transition(&transition)?;
                    fired += 1;
                }
                None if animator.next_fire_time().is_none() => {
                    log::info!("playback finished: nothing enabled and nothing scheduled");
                    break;
                }
                None => {}
            }
        }
        thread::sleep(options.tick);
    }
    log::info!("playback stopped after {fired} firings");
    Ok(fired)
}

fn lock(animator: &Mutex<Animator>) -> MutexGuard<'_, Animator> {
    match animator.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
