//! Rest timer between sets of the same exercise.
//!
//! Separate from the phase timers: it may run while the work timer runs, its
//! total can be changed live, and the engine clears it whenever the phase,
//! exercise, or round changes.

use crate::scheduler::{Scheduler, Task, TaskHandle};
use crate::timer::TICK_INTERVAL_MS;

/// Result of a live adjustment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdjustOutcome {
    /// Still resting, this many whole seconds left
    Adjusted { remaining_secs: u64 },
    /// The adjustment used up the rest; the timer was cleared
    Cleared,
    /// No rest was running
    Inactive,
}

#[derive(Debug, Default)]
pub struct SetRestTimer {
    total_ms: u64,
    started_at_ms: Option<u64>,
    completed: bool,
    poll: Option<TaskHandle>,
}

impl SetRestTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.started_at_ms.is_some()
    }

    pub fn total_secs(&self) -> u64 {
        self.total_ms / 1000
    }

    /// Whole seconds left, rounded up; `None` when idle
    pub fn remaining_secs(&self, now_ms: u64) -> Option<u64> {
        self.remaining_ms(now_ms).map(|ms| ms.div_ceil(1000))
    }

    fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        let started = self.started_at_ms?;
        let elapsed = now_ms.saturating_sub(started);
        Some(self.total_ms.saturating_sub(elapsed))
    }

    pub fn start(&mut self, total_secs: u64, scheduler: &mut dyn Scheduler, now_ms: u64) {
        self.clear(scheduler);
        self.total_ms = total_secs.saturating_mul(1000);
        self.started_at_ms = Some(now_ms);
        self.completed = false;
        self.poll = Some(scheduler.schedule_repeating(
            now_ms,
            if total_secs == 0 { 0 } else { TICK_INTERVAL_MS },
            TICK_INTERVAL_MS,
            Task::SetRestPoll,
        ));
        tracing::debug!("Set rest started: {}s", total_secs);
    }

    /// Change the total by `delta_secs`, keeping elapsed time
    pub fn adjust(
        &mut self,
        delta_secs: i64,
        scheduler: &mut dyn Scheduler,
        now_ms: u64,
    ) -> AdjustOutcome {
        let Some(started) = self.started_at_ms else {
            return AdjustOutcome::Inactive;
        };

        let delta_ms = delta_secs.saturating_mul(1000);
        self.total_ms = if delta_ms >= 0 {
            self.total_ms.saturating_add(delta_ms as u64)
        } else {
            self.total_ms.saturating_sub(delta_ms.unsigned_abs())
        };

        let elapsed = now_ms.saturating_sub(started);
        if self.total_ms <= elapsed {
            tracing::debug!("Set rest adjusted to nothing; skipping rest");
            self.clear(scheduler);
            return AdjustOutcome::Cleared;
        }

        AdjustOutcome::Adjusted {
            remaining_secs: (self.total_ms - elapsed).div_ceil(1000),
        }
    }

    /// Check the clock; returns true exactly once when the rest runs out
    pub fn poll(&mut self, scheduler: &mut dyn Scheduler, now_ms: u64) -> bool {
        match self.remaining_ms(now_ms) {
            Some(0) if !self.completed => {
                self.completed = true;
                self.started_at_ms = None;
                self.cancel_poll(scheduler);
                tracing::debug!("Set rest finished");
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self, scheduler: &mut dyn Scheduler) {
        self.cancel_poll(scheduler);
        self.total_ms = 0;
        self.started_at_ms = None;
        self.completed = false;
    }

    fn cancel_poll(&mut self, scheduler: &mut dyn Scheduler) {
        if let Some(handle) = self.poll.take() {
            scheduler.cancel(handle);
        }
    }
}
