//! Cancellable task scheduling.
//!
//! The engine never sleeps or spawns threads. Interval ticks and delayed
//! dispatches are entries in a [`Scheduler`], each identified by a
//! [`TaskHandle`] that must be cancelled when its context goes away. The host
//! calls `pop_due` (through the engine's `pump`) whenever it wakes up.

use crate::timer::TimerSlot;
use std::collections::{BTreeMap, HashMap};

/// Handle returned for every scheduled task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

/// Work the engine can schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    /// Interval tick of one phase timer
    Tick(TimerSlot),
    /// Poll of the between-sets rest timer
    SetRestPoll,
    /// Delayed DONE_SET after the final set of an exercise
    AutoAdvance,
}

pub trait Scheduler {
    /// Run `task` once, `delay_ms` after `now_ms`
    fn schedule_once(&mut self, now_ms: u64, delay_ms: u64, task: Task) -> TaskHandle;

    /// Run `task` every `interval_ms`, first after `first_delay_ms`
    fn schedule_repeating(
        &mut self,
        now_ms: u64,
        first_delay_ms: u64,
        interval_ms: u64,
        task: Task,
    ) -> TaskHandle;

    /// Returns false when the handle was already fired or cancelled
    fn cancel(&mut self, handle: TaskHandle) -> bool;

    fn cancel_all(&mut self);

    /// Remove and return the earliest task due at `now_ms`
    ///
    /// Repeating tasks are re-armed before being returned.
    fn pop_due(&mut self, now_ms: u64) -> Option<(TaskHandle, Task)>;

    fn next_due(&self) -> Option<u64>;

    fn pending(&self) -> usize;
}

#[derive(Clone, Debug)]
struct Entry {
    task: Task,
    interval_ms: Option<u64>,
}

/// Ordered in-memory task queue
///
/// Entries are keyed by `(due, handle)` so tasks due at the same instant fire
/// in the order they were scheduled.
#[derive(Debug, Default)]
pub struct TaskQueue {
    next_id: u64,
    entries: BTreeMap<(u64, TaskHandle), Entry>,
    due_by_handle: HashMap<TaskHandle, u64>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, due: u64, task: Task, interval_ms: Option<u64>) -> TaskHandle {
        self.next_id += 1;
        let handle = TaskHandle(self.next_id);
        self.entries.insert((due, handle), Entry { task, interval_ms });
        self.due_by_handle.insert(handle, due);
        handle
    }
}

impl Scheduler for TaskQueue {
    fn schedule_once(&mut self, now_ms: u64, delay_ms: u64, task: Task) -> TaskHandle {
        self.insert(now_ms.saturating_add(delay_ms), task, None)
    }

    fn schedule_repeating(
        &mut self,
        now_ms: u64,
        first_delay_ms: u64,
        interval_ms: u64,
        task: Task,
    ) -> TaskHandle {
        // A zero interval would re-arm at the same instant forever
        let interval_ms = interval_ms.max(1);
        self.insert(now_ms.saturating_add(first_delay_ms), task, Some(interval_ms))
    }

    fn cancel(&mut self, handle: TaskHandle) -> bool {
        match self.due_by_handle.remove(&handle) {
            Some(due) => self.entries.remove(&(due, handle)).is_some(),
            None => false,
        }
    }

    fn cancel_all(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!("Cancelling {} scheduled tasks", self.entries.len());
        }
        self.entries.clear();
        self.due_by_handle.clear();
    }

    fn pop_due(&mut self, now_ms: u64) -> Option<(TaskHandle, Task)> {
        let (&(due, handle), _) = self.entries.iter().next()?;
        if due > now_ms {
            return None;
        }

        let entry = self.entries.remove(&(due, handle))?;
        self.due_by_handle.remove(&handle);

        if let Some(interval) = entry.interval_ms {
            // Re-arm from now after a stall instead of replaying every missed tick
            let mut next = due.saturating_add(interval);
            if next <= now_ms {
                next = now_ms.saturating_add(interval);
            }
            self.entries.insert((next, handle), entry.clone());
            self.due_by_handle.insert(handle, next);
        }

        Some((handle, entry.task))
    }

    fn next_due(&self) -> Option<u64> {
        self.entries.keys().next().map(|(due, _)| *due)
    }

    fn pending(&self) -> usize {
        self.entries.len()
    }
}
