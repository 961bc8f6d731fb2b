//! Corruption recovery tests for the circuit binary.
//!
//! These tests verify the system can handle:
//! - Corrupted run cache files
//! - Corrupted or partially written set logs
//! - Invalid workout and config files

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const WORKOUT: &str = r#"
id = "w1"
name = "Recovery"

[[exercises]]
id = "row"
name = "Ring Row"
scheme = "2x8"
"#;

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("circuit"))
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn cli_in(dir: &Path) -> Command {
    let mut cmd = cli();
    cmd.arg("--data-dir")
        .arg(dir.join("data"))
        .arg("--config")
        .arg(dir.join("config.toml"));
    cmd
}

fn write_file(path: &Path, contents: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).expect("Failed to write file");
    path.to_path_buf()
}

fn simulate(dir: &Path, workout: &Path) -> assert_cmd::assert::Assert {
    fs::write(dir.join("config.toml"), "[circuit]\nrounds = 1\n").unwrap();
    cli_in(dir)
        .args(["simulate", "--date", "2026-02-07", "--workout"])
        .arg(workout)
        .assert()
}

#[test]
fn test_corrupted_run_cache_is_discarded() {
    let temp_dir = setup_test_dir();
    let workout = write_file(&temp_dir.path().join("workout.toml"), WORKOUT);
    let cache_path = write_file(
        &temp_dir.path().join("data/cache/circuit_run_cache.json"),
        "{ invalid json }}}}",
    );

    simulate(temp_dir.path(), &workout)
        .success()
        .stdout(predicate::str::contains("Work: Ring Row (2 sets)"))
        .stdout(predicate::str::contains("Logged 2 sets"));

    // Rewritten with a valid entry for today
    let cache = fs::read_to_string(&cache_path).unwrap();
    assert!(cache.contains("\"date\":\"2026-02-07\""));
}

#[test]
fn test_stale_run_cache_is_not_reused() {
    let temp_dir = setup_test_dir();
    let workout = write_file(&temp_dir.path().join("workout.toml"), WORKOUT);
    write_file(
        &temp_dir.path().join("data/cache/circuit_run_cache.json"),
        r#"{"date":"2026-02-06","workout_id":"w1","sets_by_exercise_id":{"row":7},"durations_by_exercise_id":{}}"#,
    );

    simulate(temp_dir.path(), &workout)
        .success()
        .stdout(predicate::str::contains("Work: Ring Row (2 sets)"));
}

#[test]
fn test_corrupted_log_lines_are_skipped() {
    let temp_dir = setup_test_dir();
    let workout = write_file(&temp_dir.path().join("workout.toml"), WORKOUT);
    let log_path = write_file(
        &temp_dir.path().join("data/log/sets.jsonl"),
        "{ invalid json }\n{ more invalid }\n",
    );

    simulate(temp_dir.path(), &workout)
        .success()
        .stdout(predicate::str::contains("Logged 2 sets"));

    cli_in(temp_dir.path())
        .arg("export")
        .arg("--output")
        .arg(temp_dir.path().join("sets.csv"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 2 sets"));

    // Bad lines stay in place; new records follow them
    let content = fs::read_to_string(&log_path).unwrap();
    assert_eq!(content.lines().count(), 4);
}

#[test]
fn test_partial_log_line() {
    let temp_dir = setup_test_dir();
    let workout = write_file(&temp_dir.path().join("workout.toml"), WORKOUT);
    let log_path = temp_dir.path().join("data/log/sets.jsonl");
    fs::create_dir_all(log_path.parent().unwrap()).unwrap();

    let mut file = fs::File::create(&log_path).unwrap();
    // Valid record from an earlier day
    writeln!(
        file,
        r#"{{"id":"00000000-0000-0000-0000-000000000000","date":"2026-02-01","workout_id":"w1","exercise_id":"row","set_index":0,"reps":6,"weight":20.0,"completed":true,"logged_at":"2026-02-01T10:00:00Z"}}"#
    )
    .unwrap();
    // Partial line (simulating crash during write)
    write!(file, r#"{{"id":"00000000-0000-0000-0000-00000000"#).unwrap();
    drop(file);

    // Scheme still decides the set count even with prior history present
    simulate(temp_dir.path(), &workout)
        .success()
        .stdout(predicate::str::contains("Work: Ring Row (2 sets)"));
}

#[test]
fn test_invalid_workout_file_fails() {
    let temp_dir = setup_test_dir();
    let workout = write_file(
        &temp_dir.path().join("workout.toml"),
        "id = \"w1\"\nname = \n[[exercises]",
    );

    simulate(temp_dir.path(), &workout)
        .failure()
        .stderr(predicate::str::contains("Toml"));
}

#[test]
fn test_duplicate_exercise_ids_fail() {
    let temp_dir = setup_test_dir();
    let workout = write_file(
        &temp_dir.path().join("workout.toml"),
        r#"
id = "w1"
name = "Dupes"

[[exercises]]
id = "row"
name = "Row"

[[exercises]]
id = "row"
name = "Row again"
"#,
    );

    simulate(temp_dir.path(), &workout)
        .failure()
        .stderr(predicate::str::contains("duplicate exercise id"));
}

#[test]
fn test_empty_workout_refuses_to_start() {
    let temp_dir = setup_test_dir();
    let workout = write_file(
        &temp_dir.path().join("workout.toml"),
        "id = \"empty\"\nname = \"Empty\"\n",
    );

    simulate(temp_dir.path(), &workout)
        .failure()
        .stderr(predicate::str::contains("has no exercises"));
    assert!(!temp_dir.path().join("data/log/sets.jsonl").exists());
}

#[test]
fn test_missing_workout_file_fails() {
    let temp_dir = setup_test_dir();

    cli_in(temp_dir.path())
        .args(["simulate", "--workout"])
        .arg(temp_dir.path().join("nope.toml"))
        .assert()
        .failure();
}

#[test]
fn test_corrupted_config_fails() {
    let temp_dir = setup_test_dir();
    write_file(&temp_dir.path().join("config.toml"), "[circuit\nrounds = ");

    cli_in(temp_dir.path())
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Toml"));
}
