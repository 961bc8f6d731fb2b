//! CSV export of the log book.
//!
//! Exports the effective view of the log: for each `(date, exercise, set)` only
//! the latest record is written, and sets that were un-completed are dropped.

use crate::logbook::{read_records, SetRecord};
use crate::Result;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    date: String,
    workout_id: String,
    exercise_id: String,
    set_number: usize,
    reps: u32,
    weight: Option<f64>,
    logged_at: String,
}

impl From<&SetRecord> for CsvRow {
    fn from(record: &SetRecord) -> Self {
        CsvRow {
            date: record.date.to_string(),
            workout_id: record.workout_id.clone().unwrap_or_default(),
            exercise_id: record.exercise_id.clone(),
            set_number: record.set_index + 1,
            reps: record.reps,
            weight: record.weight,
            logged_at: record.logged_at.to_rfc3339(),
        }
    }
}

/// Latest record per set, completed sets only, in date/exercise/set order
pub fn effective_sets(records: &[SetRecord]) -> Vec<&SetRecord> {
    let mut latest: BTreeMap<(chrono::NaiveDate, &str, usize), &SetRecord> = BTreeMap::new();
    for record in records {
        latest.insert(
            (record.date, record.exercise_id.as_str(), record.set_index),
            record,
        );
    }
    latest.into_values().filter(|r| r.completed).collect()
}

/// Write every completed set in the log at `log_path` to a CSV file
///
/// The CSV is fully rewritten and fsynced; returns the number of rows.
pub fn export_log_to_csv(log_path: &Path, csv_path: &Path) -> Result<usize> {
    let records = read_records(log_path)?;
    let rows = effective_sets(&records);

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(csv_path)?;
    let mut writer = csv::Writer::from_writer(file);
    for record in &rows {
        writer.serialize(CsvRow::from(*record))?;
    }

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    tracing::info!("Exported {} sets to {:?}", rows.len(), csv_path);
    Ok(rows.len())
}
