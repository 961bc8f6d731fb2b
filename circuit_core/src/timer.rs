//! Wall-clock countdown/stopwatch primitive.
//!
//! The timer keeps `accumulated_ms` plus the instant it was last started and
//! derives elapsed time from the clock on every tick:
//!
//! ```text
//! elapsed = accumulated + (now - started_at)
//! ```
//!
//! Late or skipped ticks therefore never lose time; the next tick catches up.
//! The interval itself lives in the [`Scheduler`] and is owned by the timer
//! through its handle.

use crate::scheduler::{Scheduler, Task, TaskHandle};
use serde::{Deserialize, Serialize};

/// Cadence of timer ticks
pub const TICK_INTERVAL_MS: u64 = 250;

/// Which phase timer an instance serves. One instance per slot, never shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerSlot {
    GetReady,
    Work,
    Rest,
    RoundRest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    #[default]
    Countdown,
    Stopwatch,
}

/// Read-only view of a timer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub seconds: u64,
    pub is_running: bool,
    pub mode: TimerMode,
    /// Countdown target in seconds (0 for stopwatches)
    pub target: u64,
    pub elapsed_ms: u64,
}

/// What a tick (or a start that completes instantly) observed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub seconds_changed: bool,
    pub completed: bool,
}

#[derive(Debug)]
pub struct WallClockTimer {
    slot: TimerSlot,
    mode: TimerMode,
    target_ms: u64,
    accumulated_ms: u64,
    started_at_ms: Option<u64>,
    /// Holds a target that can be resumed by `toggle`
    armed: bool,
    /// Flips to true at most once per activation
    completed: bool,
    seconds: u64,
    interval: Option<TaskHandle>,
}

impl WallClockTimer {
    pub fn new(slot: TimerSlot) -> Self {
        Self {
            slot,
            mode: TimerMode::Countdown,
            target_ms: 0,
            accumulated_ms: 0,
            started_at_ms: None,
            armed: false,
            completed: false,
            seconds: 0,
            interval: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn slot(&self) -> TimerSlot {
        self.slot
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.started_at_ms.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Target in whole seconds
    pub fn target_secs(&self) -> u64 {
        self.target_ms / 1000
    }

    /// Seconds as of the last tick
    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        match self.started_at_ms {
            Some(started) => self
                .accumulated_ms
                .saturating_add(now_ms.saturating_sub(started)),
            None => self.accumulated_ms,
        }
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.target_ms.saturating_sub(self.elapsed_ms(now_ms))
    }

    /// Live reading at `now_ms`, independent of tick cadence
    pub fn snapshot(&self, now_ms: u64) -> TimerState {
        let elapsed_ms = self.elapsed_ms(now_ms);
        let seconds = if self.completed {
            0
        } else {
            self.display_seconds(elapsed_ms)
        };
        TimerState {
            seconds,
            is_running: self.is_running(),
            mode: self.mode,
            target: self.target_secs(),
            elapsed_ms,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin a fresh activation
    ///
    /// A countdown with a zero target completes before returning.
    pub fn start(
        &mut self,
        target_secs: u64,
        mode: TimerMode,
        scheduler: &mut dyn Scheduler,
        now_ms: u64,
    ) -> TickOutcome {
        self.cancel_interval(scheduler);
        self.mode = mode;
        self.target_ms = match mode {
            TimerMode::Countdown => target_secs.saturating_mul(1000),
            TimerMode::Stopwatch => 0,
        };
        self.accumulated_ms = 0;
        self.completed = false;
        self.armed = true;
        self.started_at_ms = Some(now_ms);
        self.seconds = self.display_seconds(0);

        tracing::debug!(
            "Timer {:?} started: {:?} target={}s",
            self.slot,
            mode,
            target_secs
        );

        if mode == TimerMode::Countdown && self.target_ms == 0 {
            return self.tick(scheduler, now_ms);
        }

        self.interval = Some(scheduler.schedule_repeating(
            now_ms,
            TICK_INTERVAL_MS,
            TICK_INTERVAL_MS,
            Task::Tick(self.slot),
        ));
        TickOutcome::default()
    }

    /// Load a countdown target without running it; `toggle` starts it
    pub fn arm(&mut self, target_secs: u64, scheduler: &mut dyn Scheduler) {
        self.cancel_interval(scheduler);
        self.mode = TimerMode::Countdown;
        self.target_ms = target_secs.saturating_mul(1000);
        self.accumulated_ms = 0;
        self.started_at_ms = None;
        self.completed = false;
        self.armed = true;
        self.seconds = self.display_seconds(0);
    }

    /// Fold elapsed time into the accumulator and halt the interval
    pub fn stop(&mut self, scheduler: &mut dyn Scheduler, now_ms: u64) {
        if let Some(started) = self.started_at_ms.take() {
            self.accumulated_ms = self
                .accumulated_ms
                .saturating_add(now_ms.saturating_sub(started));
            if !self.completed {
                self.seconds = self.display_seconds(self.accumulated_ms);
            }
        }
        self.cancel_interval(scheduler);
    }

    pub fn reset(&mut self, scheduler: &mut dyn Scheduler) {
        self.cancel_interval(scheduler);
        self.target_ms = 0;
        self.accumulated_ms = 0;
        self.started_at_ms = None;
        self.armed = false;
        self.completed = false;
        self.seconds = 0;
    }

    /// Pause a running timer, resume a stopped one, restart a completed one
    ///
    /// A timer that was never started or armed stays idle.
    pub fn toggle(&mut self, scheduler: &mut dyn Scheduler, now_ms: u64) -> TickOutcome {
        if self.is_running() {
            self.stop(scheduler, now_ms);
            return TickOutcome::default();
        }
        if self.completed {
            return self.start(self.target_secs(), self.mode, scheduler, now_ms);
        }
        if !self.armed {
            return TickOutcome::default();
        }

        self.started_at_ms = Some(now_ms);
        if self.mode == TimerMode::Countdown && self.remaining_ms(now_ms) == 0 {
            return self.tick(scheduler, now_ms);
        }
        self.interval = Some(scheduler.schedule_repeating(
            now_ms,
            TICK_INTERVAL_MS,
            TICK_INTERVAL_MS,
            Task::Tick(self.slot),
        ));
        TickOutcome::default()
    }

    /// Recompute from the clock; completes a countdown at most once
    pub fn tick(&mut self, scheduler: &mut dyn Scheduler, now_ms: u64) -> TickOutcome {
        if !self.is_running() || self.completed {
            return TickOutcome::default();
        }

        let elapsed_ms = self.elapsed_ms(now_ms);
        let previous = self.seconds;

        if self.mode == TimerMode::Countdown && elapsed_ms >= self.target_ms {
            self.accumulated_ms = elapsed_ms;
            self.started_at_ms = None;
            self.completed = true;
            self.seconds = 0;
            self.cancel_interval(scheduler);
            tracing::debug!("Timer {:?} completed", self.slot);
            return TickOutcome {
                seconds_changed: previous != 0,
                completed: true,
            };
        }

        self.seconds = self.display_seconds(elapsed_ms);
        TickOutcome {
            seconds_changed: self.seconds != previous,
            completed: false,
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn display_seconds(&self, elapsed_ms: u64) -> u64 {
        match self.mode {
            TimerMode::Countdown => self.target_ms.saturating_sub(elapsed_ms).div_ceil(1000),
            TimerMode::Stopwatch => elapsed_ms / 1000,
        }
    }

    fn cancel_interval(&mut self, scheduler: &mut dyn Scheduler) {
        if let Some(handle) = self.interval.take() {
            scheduler.cancel(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskQueue;

    /// Fire every due tick for this timer up to `now`
    fn drive(timer: &mut WallClockTimer, queue: &mut TaskQueue, now: u64) -> usize {
        let mut completions = 0;
        while let Some((_, task)) = queue.pop_due(now) {
            assert_eq!(task, Task::Tick(timer.slot()));
            if timer.tick(queue, now).completed {
                completions += 1;
            }
        }
        completions
    }

    #[test]
    fn test_countdown_rounds_up_and_completes_once() {
        let mut queue = TaskQueue::new();
        let mut timer = WallClockTimer::new(TimerSlot::Rest);

        timer.start(3, TimerMode::Countdown, &mut queue, 0);
        assert_eq!(timer.seconds(), 3);

        drive(&mut timer, &mut queue, 250);
        assert_eq!(timer.seconds(), 3);

        drive(&mut timer, &mut queue, 1_000);
        assert_eq!(timer.seconds(), 2);

        assert_eq!(drive(&mut timer, &mut queue, 3_000), 1);
        assert_eq!(timer.seconds(), 0);
        assert!(timer.is_completed());
        assert!(!timer.is_running());

        // Interval is gone; a stray tick is absorbed
        assert_eq!(queue.pending(), 0);
        assert!(!timer.tick(&mut queue, 4_000).completed);
    }

    #[test]
    fn test_late_tick_catches_up() {
        let mut queue = TaskQueue::new();
        let mut timer = WallClockTimer::new(TimerSlot::Work);
        timer.start(60, TimerMode::Countdown, &mut queue, 0);

        // Host suspended for 45 s; a single tick fires on wake
        drive(&mut timer, &mut queue, 45_000);
        assert_eq!(timer.seconds(), 15);

        assert_eq!(drive(&mut timer, &mut queue, 90_000), 1);
        assert_eq!(timer.snapshot(90_000).seconds, 0);
    }

    #[test]
    fn test_stopwatch_floors_and_never_completes() {
        let mut queue = TaskQueue::new();
        let mut timer = WallClockTimer::new(TimerSlot::Work);
        timer.start(0, TimerMode::Stopwatch, &mut queue, 10_000);

        assert_eq!(drive(&mut timer, &mut queue, 11_999), 0);
        assert_eq!(timer.seconds(), 1);

        assert_eq!(drive(&mut timer, &mut queue, 600_000), 0);
        assert_eq!(timer.seconds(), 590);
        assert!(timer.is_running());
    }

    #[test]
    fn test_zero_target_completes_immediately() {
        let mut queue = TaskQueue::new();
        let mut timer = WallClockTimer::new(TimerSlot::GetReady);

        let outcome = timer.start(0, TimerMode::Countdown, &mut queue, 500);
        assert!(outcome.completed);
        assert_eq!(timer.seconds(), 0);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_pause_resume_preserves_remaining() {
        let mut queue = TaskQueue::new();
        let mut timer = WallClockTimer::new(TimerSlot::Rest);
        timer.start(30, TimerMode::Countdown, &mut queue, 0);

        drive(&mut timer, &mut queue, 10_000);
        timer.stop(&mut queue, 10_000);
        assert_eq!(timer.remaining_ms(10_000), 20_000);
        assert_eq!(queue.pending(), 0);

        // Long pause does not eat into the countdown
        assert_eq!(timer.remaining_ms(500_000), 20_000);
        timer.toggle(&mut queue, 500_000);
        assert!(timer.is_running());

        drive(&mut timer, &mut queue, 505_000);
        assert_eq!(timer.seconds(), 15);
    }

    #[test]
    fn test_stopwatch_pause_preserves_elapsed() {
        let mut queue = TaskQueue::new();
        let mut timer = WallClockTimer::new(TimerSlot::Work);
        timer.start(0, TimerMode::Stopwatch, &mut queue, 0);

        timer.stop(&mut queue, 7_400);
        timer.toggle(&mut queue, 100_000);
        assert_eq!(timer.elapsed_ms(100_600), 8_000);
    }

    #[test]
    fn test_toggle_after_completion_restarts() {
        let mut queue = TaskQueue::new();
        let mut timer = WallClockTimer::new(TimerSlot::Work);
        timer.start(2, TimerMode::Countdown, &mut queue, 0);
        assert_eq!(drive(&mut timer, &mut queue, 2_000), 1);

        timer.toggle(&mut queue, 5_000);
        assert!(timer.is_running());
        assert!(!timer.is_completed());
        assert_eq!(timer.seconds(), 2);
        assert_eq!(drive(&mut timer, &mut queue, 7_000), 1);
    }

    #[test]
    fn test_toggle_idle_timer_is_noop() {
        let mut queue = TaskQueue::new();
        let mut timer = WallClockTimer::new(TimerSlot::Work);
        let outcome = timer.toggle(&mut queue, 1_000);
        assert_eq!(outcome, TickOutcome::default());
        assert!(!timer.is_running());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_armed_timer_starts_on_toggle() {
        let mut queue = TaskQueue::new();
        let mut timer = WallClockTimer::new(TimerSlot::Work);
        timer.arm(45, &mut queue);
        assert!(!timer.is_running());
        assert_eq!(timer.seconds(), 45);

        timer.toggle(&mut queue, 1_000);
        drive(&mut timer, &mut queue, 11_000);
        assert_eq!(timer.seconds(), 35);
    }

    #[test]
    fn test_snapshot_never_negative() {
        let mut queue = TaskQueue::new();
        let mut timer = WallClockTimer::new(TimerSlot::Rest);
        timer.start(1, TimerMode::Countdown, &mut queue, 0);

        for now in [0, 999, 1_000, 1_001, 50_000] {
            let state = timer.snapshot(now);
            assert!(state.seconds <= 1);
        }
        assert_eq!(timer.snapshot(50_000).seconds, 0);
    }
}
