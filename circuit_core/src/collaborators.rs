//! Interfaces the engine consumes from the host application.
//!
//! History lookups, set logging, config persistence and device feedback are
//! all owned outside the engine. Calls into them are fire-and-forget: none of
//! these traits return errors to the engine.

use crate::{CircuitConfig, Log, SetEntry};
use serde::{Deserialize, Serialize};

/// Read access to logged sets
pub trait History {
    /// Most recent log for this exercise from an earlier day
    fn find_prior(&self, exercise_id: &str) -> Option<Log>;

    /// Today's log for this exercise
    fn today(&self, exercise_id: &str) -> Option<Log>;
}

/// Sink for set completions
pub trait SetLogger {
    fn complete_set(&mut self, exercise_id: &str, set_index: usize, entry: SetEntry, workout_id: &str);
    fn uncomplete_set(&mut self, exercise_id: &str, set_index: usize);
}

/// Load/save of the circuit defaults
pub trait ConfigStore {
    fn load_config(&self) -> CircuitConfig;
    fn save_config(&mut self, config: CircuitConfig);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundKind {
    /// Final seconds of a countdown
    Countdown,
    /// Work begins
    Go,
    SetComplete,
    RestOver,
    CircuitComplete,
}

/// Best-effort device feedback
pub trait Feedback {
    fn play_sound(&mut self, kind: SoundKind);
    fn vibrate(&mut self, pattern: &[u32]);
}

// ============================================================================
// Defaults
// ============================================================================

/// History with nothing in it
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHistory;

impl History for NoHistory {
    fn find_prior(&self, _exercise_id: &str) -> Option<Log> {
        None
    }

    fn today(&self, _exercise_id: &str) -> Option<Log> {
        None
    }
}

/// Logger that only traces
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardLogger;

impl SetLogger for DiscardLogger {
    fn complete_set(&mut self, exercise_id: &str, set_index: usize, entry: SetEntry, _workout_id: &str) {
        tracing::debug!("Discarding set {} of '{}': {:?}", set_index, exercise_id, entry);
    }

    fn uncomplete_set(&mut self, exercise_id: &str, set_index: usize) {
        tracing::debug!("Discarding uncomplete of set {} of '{}'", set_index, exercise_id);
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SilentFeedback;

impl Feedback for SilentFeedback {
    fn play_sound(&mut self, _kind: SoundKind) {}
    fn vibrate(&mut self, _pattern: &[u32]) {}
}

/// Config kept only for the life of the process
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryConfigStore {
    config: CircuitConfig,
}

impl MemoryConfigStore {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config: config.clamped(),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_config(&self) -> CircuitConfig {
        self.config
    }

    fn save_config(&mut self, config: CircuitConfig) {
        self.config = config.clamped();
    }
}
