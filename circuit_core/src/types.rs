//! Core domain types for the circuit engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Exercises and workouts (read-only inputs)
//! - Logged history as seen by the planner
//! - Circuit configuration and session state
//! - Per-exercise plans produced by the set planner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Workout Types
// ============================================================================

/// How an exercise's sets are measured
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseUnit {
    #[default]
    Reps,
    #[serde(alias = "sec", alias = "secs", alias = "time", alias = "duration")]
    Seconds,
}

/// A single exercise within a workout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub unit: ExerciseUnit,
    /// Rep scheme such as `3x10` or `3x30s`
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub bodyweight: bool,
}

/// A workout: an ordered list of exercises run as a circuit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workout {
    pub id: String,
    pub name: String,
    /// Fallback scheme for exercises that carry none
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub exercises: Vec<Exercise>,
}

impl Workout {
    /// Parse a workout from its TOML form
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let workout: Workout = toml::from_str(contents)?;
        let mut seen = std::collections::HashSet::new();
        for exercise in &workout.exercises {
            if !seen.insert(exercise.id.as_str()) {
                return Err(crate::Error::Workout(format!(
                    "duplicate exercise id '{}' in workout '{}'",
                    exercise.id, workout.id
                )));
            }
        }
        Ok(workout)
    }

    /// Load a workout definition from a TOML file
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let workout = Self::from_toml(&contents)?;
        tracing::info!(
            "Loaded workout '{}' with {} exercises from {:?}",
            workout.name,
            workout.exercises.len(),
            path
        );
        Ok(workout)
    }

    /// Scheme that applies to an exercise: its own, else the workout's
    pub fn scheme_for<'a>(&'a self, exercise: &'a Exercise) -> Option<&'a str> {
        exercise.scheme.as_deref().or(self.scheme.as_deref())
    }
}

// ============================================================================
// History Types
// ============================================================================

/// Values entered for one set
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SetEntry {
    /// Reps, or seconds for timed exercises
    pub reps: u32,
    pub weight: Option<f64>,
}

/// One set inside a history log
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggedSet {
    #[serde(default)]
    pub reps: Option<u32>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub completed: Option<bool>,
}

impl LoggedSet {
    pub fn is_completed(&self) -> bool {
        self.completed.unwrap_or(false)
    }
}

/// An exercise's logged sets for one day
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Log {
    pub sets: Vec<LoggedSet>,
}

impl Log {
    pub fn completed_count(&self) -> usize {
        self.sets.iter().filter(|s| s.is_completed()).count()
    }
}

// ============================================================================
// Circuit Configuration
// ============================================================================

pub const MIN_ROUNDS: u32 = 1;
pub const MAX_ROUNDS: u32 = 5;
pub const MAX_EXERCISE_REST_SECS: u32 = 120;
pub const MAX_ROUND_REST_SECS: u32 = 180;

/// User-editable circuit settings, persisted as the next session's default
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CircuitConfig {
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_rest_between_exercises")]
    pub rest_between_exercises: u32,
    #[serde(default = "default_rest_between_rounds")]
    pub rest_between_rounds: u32,
}

fn default_rounds() -> u32 {
    3
}

fn default_rest_between_exercises() -> u32 {
    20
}

fn default_rest_between_rounds() -> u32 {
    60
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            rest_between_exercises: default_rest_between_exercises(),
            rest_between_rounds: default_rest_between_rounds(),
        }
    }
}

impl CircuitConfig {
    /// Build a config from raw user input, clamping every field into range
    pub fn from_raw(rounds: i64, rest_between_exercises: i64, rest_between_rounds: i64) -> Self {
        Self {
            rounds: rounds.clamp(MIN_ROUNDS as i64, MAX_ROUNDS as i64) as u32,
            rest_between_exercises: rest_between_exercises.clamp(0, MAX_EXERCISE_REST_SECS as i64)
                as u32,
            rest_between_rounds: rest_between_rounds.clamp(0, MAX_ROUND_REST_SECS as i64) as u32,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            rounds: self.rounds.clamp(MIN_ROUNDS, MAX_ROUNDS),
            rest_between_exercises: self.rest_between_exercises.min(MAX_EXERCISE_REST_SECS),
            rest_between_rounds: self.rest_between_rounds.min(MAX_ROUND_REST_SECS),
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Phase of a circuit session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Config,
    GetReady,
    Work,
    Rest,
    RoundRest,
    Complete,
}

impl Phase {
    /// Phases in which timers run and the planner is live
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Phase::GetReady | Phase::Work | Phase::Rest | Phase::RoundRest
        )
    }
}

/// Live state of a circuit run, mutated only by the engine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CircuitSessionState {
    pub phase: Phase,
    pub current_exercise_index: usize,
    pub current_round: u32,
    pub total_rounds: u32,
    pub paused: bool,
    pub total_start_time: Option<DateTime<Utc>>,
    pub total_end_time: Option<DateTime<Utc>>,
}

// ============================================================================
// Plans
// ============================================================================

/// Editable values for one planned set
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SetInput {
    pub reps: Option<u32>,
    pub weight: Option<f64>,
}

impl SetInput {
    /// A set is loggable only with a positive rep count
    pub fn to_entry(self) -> Option<SetEntry> {
        match self.reps {
            Some(reps) if reps > 0 => Some(SetEntry {
                reps,
                weight: self.weight,
            }),
            _ => None,
        }
    }
}

/// Planner output for the active exercise
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExercisePlan {
    pub exercise_id: String,
    pub num_sets: usize,
    pub sets: Vec<SetInput>,
    pub is_time_based: bool,
    /// Pre-filled duration for timed exercises
    pub display_duration: Option<u32>,
    /// Set when the planner wants the work countdown armed immediately
    pub auto_start_duration_sec: Option<u32>,
    /// Sets already completed today when this plan was built
    pub set_offset: usize,
}
