//! 定时迁移调度队列：绝对发射时间 -> 该时刻到期的迁移集合。
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Timed transitions ordered by absolute fire time.
///
/// The fire time is `now + delay` with the delay captured when the entry
/// is enqueued; changing a transition's delay afterwards does not move it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingQueue {
    current_time: u64,
    schedule: BTreeMap<u64, BTreeSet<String>>,
    scheduled: HashMap<String, u64>,
}

impl TimingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(time: u64) -> Self {
        Self {
            current_time: time,
            ..Self::default()
        }
    }

    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    /// Clears the schedule and enqueues `enabled` relative to `time`.
    pub fn reset_to<'a>(&mut self, time: u64, enabled: impl IntoIterator<Item = (&'a str, u64)>) {
        self.current_time = time;
        self.schedule.clear();
        self.scheduled.clear();
        for (transition, delay) in enabled {
            self.enqueue(transition, delay);
        }
    }

    /// Schedules `transition` at `now + delay` unless it is already
    /// queued; returns the fire time it ends up with.
    pub fn enqueue(&mut self, transition: &str, delay: u64) -> u64 {
        if let Some(&time) = self.scheduled.get(transition) {
            return time;
        }
        let time = self.current_time.saturating_add(delay);
        self.schedule.entry(time).or_default().insert(transition.to_string());
        self.scheduled.insert(transition.to_string(), time);
        time
    }

    /// Removes `transition`; `false` when it was not queued.
    pub fn dequeue(&mut self, transition: &str) -> bool {
        let Some(time) = self.scheduled.remove(transition) else {
            return false;
        };
        if let Some(bucket) = self.schedule.get_mut(&time) {
            bucket.remove(transition);
            if bucket.is_empty() {
                self.schedule.remove(&time);
            }
        }
        true
    }

    pub fn is_scheduled(&self, transition: &str) -> bool {
        self.scheduled.contains_key(transition)
    }

    pub fn fire_time(&self, transition: &str) -> Option<u64> {
        self.scheduled.get(transition).copied()
    }

    /// Transitions whose fire time has been reached.
    pub fn due_now(&self) -> BTreeSet<String> {
        self.schedule
            .range(..=self.current_time)
            .flat_map(|(_, bucket)| bucket.iter().cloned())
            .collect()
    }

    pub fn is_due(&self, transition: &str) -> bool {
        self.fire_time(transition)
            .is_some_and(|time| time <= self.current_time)
    }

    /// First fire time strictly after the current time.
    pub fn next_fire_time(&self) -> Option<u64> {
        self.schedule
            .range(self.current_time.saturating_add(1)..)
            .next()
            .map(|(time, _)| *time)
    }

    /// Every distinct pending fire time, ascending.
    pub fn pending_times(&self) -> Vec<u64> {
        self.schedule.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Brings the schedule in line with the timed transitions enabled in
    /// the current marking.
    ///
    /// Entries of transitions no longer enabled are dropped, newly enabled
    /// ones are queued at `now + delay`, entries of transitions that stay
    /// enabled are left alone.
    pub fn rebuild<'a>(&mut self, enabled: impl IntoIterator<Item = (&'a str, u64)>) {
        let enabled: Vec<(&str, u64)> = enabled.into_iter().collect();
        let stale: Vec<String> = self
            .scheduled
            .keys()
            .filter(|queued| !enabled.iter().any(|(id, _)| *id == queued.as_str()))
            .cloned()
            .collect();
        for transition in &stale {
            self.dequeue(transition);
        }
        for (transition, delay) in enabled {
            self.enqueue(transition, delay);
        }
        log::trace!(
            "timing queue rebuilt at {}: {} pending, {} dropped",
            self.current_time,
            self.scheduled.len(),
            stale.len()
        );
    }

    /// Moves the clock forward to `time` and returns what is due then.
    /// The clock never moves backwards.
    pub fn advance_to(&mut self, time: u64) -> BTreeSet<String> {
        if time < self.current_time {
            log::warn!("ignoring request to move the clock back from {} to {time}", self.current_time);
        } else {
            self.current_time = time;
        }
        self.due_now()
    }
}
