//! Integration tests for the circuit binary.
//!
//! These tests verify end-to-end behavior including:
//! - Config show/set with clamping
//! - Full circuits on the virtual clock
//! - Interactive runs driven through stdin
//! - CSV export of the log

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const WORKOUT: &str = r#"
id = "w1"
name = "Test Circuit"

[[exercises]]
id = "squat"
name = "Goblet Squat"
scheme = "3x5"

[[exercises]]
id = "plank"
name = "Plank"
unit = "seconds"
scheme = "2x20s"
"#;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the path to the CLI binary
fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("circuit"))
}

/// Command with data and config isolated inside `dir`
fn cli_in(dir: &Path) -> Command {
    let mut cmd = cli();
    cmd.arg("--data-dir")
        .arg(dir.join("data"))
        .arg("--config")
        .arg(dir.join("config.toml"));
    cmd
}

fn write_workout(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("workout.toml");
    fs::write(&path, contents).expect("Failed to write workout");
    path
}

fn set_rounds(dir: &Path, rounds: u32) {
    cli_in(dir)
        .args(["config", "set", "--rounds", &rounds.to_string()])
        .assert()
        .success();
}

fn log_lines(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("data/log/sets.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Circuit interval timer for strength workouts",
        ));
}

#[test]
fn test_config_show_defaults() {
    let temp_dir = setup_test_dir();

    cli_in(temp_dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rounds = 3"))
        .stdout(predicate::str::contains("rest_between_exercises = 20"))
        .stdout(predicate::str::contains("default_seconds = 60"));

    // Showing never writes a file
    assert!(!temp_dir.path().join("config.toml").exists());
}

#[test]
fn test_config_set_clamps_and_persists() {
    let temp_dir = setup_test_dir();

    cli_in(temp_dir.path())
        .args([
            "config",
            "set",
            "--rounds",
            "9",
            "--exercise-rest",
            "-5",
            "--round-rest",
            "45",
            "--set-rest",
            "9000",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("rounds = 5"));

    cli_in(temp_dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rounds = 5"))
        .stdout(predicate::str::contains("rest_between_exercises = 0"))
        .stdout(predicate::str::contains("rest_between_rounds = 45"))
        .stdout(predicate::str::contains("default_seconds = 600"));
}

#[test]
fn test_simulate_runs_full_circuit() {
    let temp_dir = setup_test_dir();
    let workout = write_workout(temp_dir.path(), WORKOUT);
    set_rounds(temp_dir.path(), 2);

    cli_in(temp_dir.path())
        .args(["simulate", "--date", "2026-02-07", "--workout"])
        .arg(&workout)
        .assert()
        .success()
        .stdout(predicate::str::contains("Get ready (10s), up next: Goblet Squat"))
        .stdout(predicate::str::contains("Round 1/2 | Work: Goblet Squat (3 sets)"))
        .stdout(predicate::str::contains("Rest 20s, up next: Plank"))
        .stdout(predicate::str::contains("Round rest 60s, up next: Goblet Squat"))
        .stdout(predicate::str::contains("Round 2/2 | Work: Plank (2 sets)"))
        .stdout(predicate::str::contains("Circuit complete: 2 rounds"))
        .stdout(predicate::str::contains("Logged 10 sets"));

    let lines = log_lines(temp_dir.path());
    assert_eq!(lines.len(), 10);
    assert!(lines.iter().all(|l| l.contains("\"date\":\"2026-02-07\"")));
    let plank_sets = lines.iter().filter(|l| l.contains("\"plank\"")).count();
    assert_eq!(plank_sets, 4);
    assert!(lines
        .iter()
        .filter(|l| l.contains("\"plank\""))
        .all(|l| l.contains("\"reps\":20")));

    // Run cache for this date and workout was written
    let cache = fs::read_to_string(temp_dir.path().join("data/cache/circuit_run_cache.json"))
        .expect("run cache written");
    assert!(cache.contains("\"workout_id\":\"w1\""));
}

#[test]
fn test_second_run_same_day_appends_sets() {
    let temp_dir = setup_test_dir();
    let workout = write_workout(temp_dir.path(), WORKOUT);
    set_rounds(temp_dir.path(), 1);

    for _ in 0..2 {
        cli_in(temp_dir.path())
            .args(["simulate", "--date", "2026-02-07", "--workout"])
            .arg(&workout)
            .assert()
            .success()
            .stdout(predicate::str::contains("Logged 5 sets"));
    }

    let lines = log_lines(temp_dir.path());
    assert_eq!(lines.len(), 10);
    // Second pass continues the set numbering instead of overwriting
    assert!(lines.iter().any(|l| l.contains("\"set_index\":5")));
}

#[test]
fn test_run_driven_by_stdin() {
    let temp_dir = setup_test_dir();
    let workout = write_workout(
        temp_dir.path(),
        r#"
id = "quick"
name = "Quick"

[[exercises]]
id = "pushup"
name = "Push-up"
scheme = "1x12"
"#,
    );
    set_rounds(temp_dir.path(), 1);

    cli_in(temp_dir.path())
        .arg("run")
        .arg("--workout")
        .arg(&workout)
        .write_stdin("s\n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Work: Push-up (1 sets)"))
        .stdout(predicate::str::contains("Circuit complete"))
        .stdout(predicate::str::contains("Session closed."));

    let lines = log_lines(temp_dir.path());
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("\"reps\":12"));
}

#[test]
fn test_run_quit_logs_nothing() {
    let temp_dir = setup_test_dir();
    let workout = write_workout(temp_dir.path(), WORKOUT);

    cli_in(temp_dir.path())
        .arg("run")
        .arg("--workout")
        .arg(&workout)
        .write_stdin("d\nq\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("ignored"))
        .stdout(predicate::str::contains("Session closed."));

    assert!(log_lines(temp_dir.path()).is_empty());
}

#[test]
fn test_export_creates_csv() {
    let temp_dir = setup_test_dir();
    let workout = write_workout(temp_dir.path(), WORKOUT);
    set_rounds(temp_dir.path(), 1);

    cli_in(temp_dir.path())
        .args(["simulate", "--date", "2026-02-07", "--workout"])
        .arg(&workout)
        .assert()
        .success();

    let csv_path = temp_dir.path().join("export").join("sets.csv");
    cli_in(temp_dir.path())
        .arg("export")
        .arg("--output")
        .arg(&csv_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 5 sets"));

    let csv_content = fs::read_to_string(&csv_path).expect("Failed to read CSV");
    assert!(csv_content.starts_with("date,workout_id,exercise_id,set_number,reps,weight,logged_at"));
    assert_eq!(csv_content.lines().count(), 6);
    assert!(csv_content.contains("2026-02-07,w1,squat,3,5,"));
}

#[test]
fn test_export_without_log() {
    let temp_dir = setup_test_dir();

    cli_in(temp_dir.path())
        .arg("export")
        .arg("--output")
        .arg(temp_dir.path().join("sets.csv"))
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to export"));
}
