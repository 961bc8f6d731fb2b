#![forbid(unsafe_code)]

//! Core domain model and business logic for the circuit timer.
//!
//! This crate provides:
//! - Domain types (workouts, logs, circuit settings, session state)
//! - Wall-clock timers driven by an injected clock and scheduler
//! - The per-exercise set planner and its persistent run cache
//! - The circuit phase state machine
//! - Persistence (JSONL log book, CSV export, config)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod scheme;
pub mod clock;
pub mod scheduler;
pub mod timer;
pub mod run_cache;
pub mod collaborators;
pub mod logbook;
pub mod planner;
pub mod set_rest;
pub mod engine;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::{Config, FileConfigStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{ConfigStore, Feedback, History, SetLogger, SoundKind};
pub use engine::{CircuitEngine, CircuitView, EngineBuilder};
pub use export::export_log_to_csv;
pub use logbook::LogBook;
pub use run_cache::{FileStore, KeyValueStore, MemoryStore};
pub use set_rest::AdjustOutcome;
pub use timer::{TimerMode, TimerState};
