//! Append-only log of completed sets.
//!
//! Every completion or un-completion is a [`SetRecord`] appended to a JSON
//! Lines file under an exclusive lock. Views are rebuilt from the records:
//! the latest record for a `(date, exercise, set_index)` wins. The log book
//! is the history and logging collaborator the CLI hands to the engine.

use crate::collaborators::{History, SetLogger};
use crate::{Log, LoggedSet, Result, SetEntry};
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use uuid::Uuid;

/// One line of the log file
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SetRecord {
    pub id: Uuid,
    pub date: NaiveDate,
    #[serde(default)]
    pub workout_id: Option<String>,
    pub exercise_id: String,
    pub set_index: usize,
    pub reps: u32,
    #[serde(default)]
    pub weight: Option<f64>,
    pub completed: bool,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    path: Option<PathBuf>,
    today: NaiveDate,
    records: Vec<SetRecord>,
}

/// Shared handle; clones see the same records
#[derive(Clone, Debug)]
pub struct LogBook {
    inner: Rc<RefCell<Inner>>,
}

impl LogBook {
    /// A log book that is never written to disk
    pub fn in_memory(today: NaiveDate) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                path: None,
                today,
                records: Vec::new(),
            })),
        }
    }

    /// Open (or lazily create) a JSONL log book
    pub fn open(path: impl Into<PathBuf>, today: NaiveDate) -> Result<Self> {
        let path = path.into();
        let records = read_records(&path)?;
        Ok(Self {
            inner: Rc::new(RefCell::new(Inner {
                path: Some(path),
                today,
                records,
            })),
        })
    }

    pub fn today_date(&self) -> NaiveDate {
        self.inner.borrow().today
    }

    pub fn records(&self) -> Vec<SetRecord> {
        self.inner.borrow().records.clone()
    }

    /// Record finished sets for a past day, e.g. when importing history
    pub fn import_sets(&self, date: NaiveDate, workout_id: &str, exercise_id: &str, sets: &[SetEntry]) {
        for (index, entry) in sets.iter().enumerate() {
            self.append(SetRecord {
                id: Uuid::new_v4(),
                date,
                workout_id: Some(workout_id.to_string()),
                exercise_id: exercise_id.to_string(),
                set_index: index,
                reps: entry.reps,
                weight: entry.weight,
                completed: true,
                logged_at: Utc::now(),
            });
        }
    }

    /// Sets for one exercise on one day, latest record per index
    pub fn log_for(&self, exercise_id: &str, date: NaiveDate) -> Option<Log> {
        let inner = self.inner.borrow();
        let mut by_index: BTreeMap<usize, &SetRecord> = BTreeMap::new();
        for record in inner
            .records
            .iter()
            .filter(|r| r.exercise_id == exercise_id && r.date == date)
        {
            by_index.insert(record.set_index, record);
        }

        let last = *by_index.keys().next_back()?;
        let mut sets = vec![LoggedSet::default(); last + 1];
        for (index, record) in by_index {
            sets[index] = LoggedSet {
                reps: Some(record.reps).filter(|_| record.completed),
                weight: record.weight.filter(|_| record.completed),
                completed: Some(record.completed),
            };
        }
        Some(Log { sets })
    }

    fn append(&self, record: SetRecord) {
        let path = self.inner.borrow().path.clone();
        if let Some(path) = path {
            if let Err(e) = append_record(&path, &record) {
                tracing::warn!(
                    "Failed to persist set {} of '{}' to {:?}: {}",
                    record.set_index,
                    record.exercise_id,
                    path,
                    e
                );
            }
        }
        self.inner.borrow_mut().records.push(record);
    }
}

impl History for LogBook {
    fn find_prior(&self, exercise_id: &str) -> Option<Log> {
        let today = self.today_date();
        let prior_date = self
            .inner
            .borrow()
            .records
            .iter()
            .filter(|r| r.exercise_id == exercise_id && r.date < today && r.completed)
            .map(|r| r.date)
            .max()?;

        // Prior logs only carry the sets that stayed completed
        let log = self.log_for(exercise_id, prior_date)?;
        let sets: Vec<LoggedSet> = log.sets.into_iter().filter(|s| s.is_completed()).collect();
        if sets.is_empty() {
            None
        } else {
            Some(Log { sets })
        }
    }

    fn today(&self, exercise_id: &str) -> Option<Log> {
        self.log_for(exercise_id, self.today_date())
    }
}

impl SetLogger for LogBook {
    fn complete_set(&mut self, exercise_id: &str, set_index: usize, entry: SetEntry, workout_id: &str) {
        let date = self.today_date();
        self.append(SetRecord {
            id: Uuid::new_v4(),
            date,
            workout_id: Some(workout_id.to_string()),
            exercise_id: exercise_id.to_string(),
            set_index,
            reps: entry.reps,
            weight: entry.weight,
            completed: true,
            logged_at: Utc::now(),
        });
        tracing::info!(
            "Logged '{}' set {}: {} reps{}",
            exercise_id,
            set_index + 1,
            entry.reps,
            entry.weight.map(|w| format!(" @ {}", w)).unwrap_or_default()
        );
    }

    fn uncomplete_set(&mut self, exercise_id: &str, set_index: usize) {
        let date = self.today_date();
        self.append(SetRecord {
            id: Uuid::new_v4(),
            date,
            workout_id: None,
            exercise_id: exercise_id.to_string(),
            set_index,
            reps: 0,
            weight: None,
            completed: false,
            logged_at: Utc::now(),
        });
        tracing::info!("Un-logged '{}' set {}", exercise_id, set_index + 1);
    }
}

fn append_record(path: &Path, record: &SetRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;

    let mut writer = std::io::BufWriter::new(&file);
    let line = serde_json::to_string(record)?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    drop(writer);

    file.unlock()?;
    tracing::debug!("Appended set record {} to log", record.id);
    Ok(())
}

/// Read all records from a log file, skipping lines that do not parse
pub fn read_records(path: &Path) -> Result<Vec<SetRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = match line_result {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Stopped reading log at line {}: {}", line_num + 1, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<SetRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Failed to parse set record at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} set records from {:?}", records.len(), path);
    Ok(records)
}
