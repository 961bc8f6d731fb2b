use chrono::NaiveDate;
use circuit_core::config::{DataConfig, FeedbackConfig};
use circuit_core::timer::TICK_INTERVAL_MS;
use circuit_core::*;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

/// Reps entered for a set that has no pre-filled value during `simulate`
const SIMULATED_REPS: u32 = 10;

/// Duration picked for timed exercises without one during `simulate`
const SIMULATED_DURATION_SECS: u32 = 30;

/// Upper bound on virtual ticks before a simulation is abandoned
const MAX_SIMULATION_STEPS: u64 = 1_000_000;

#[derive(Parser)]
#[command(name = "circuit")]
#[command(about = "Circuit interval timer for strength workouts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use a config file other than the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a circuit interactively on the real clock
    Run {
        /// Workout definition (TOML)
        #[arg(long)]
        workout: PathBuf,

        /// Session date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Run a whole circuit on a virtual clock, completing every set
    Simulate {
        /// Workout definition (TOML)
        #[arg(long)]
        workout: PathBuf,

        /// Session date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show or change circuit settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Export logged sets to CSV
    Export {
        /// Destination CSV file
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Change settings; values are clamped to their allowed ranges
    Set {
        #[arg(long, allow_negative_numbers = true)]
        rounds: Option<i64>,

        /// Seconds of rest between exercises
        #[arg(long, allow_negative_numbers = true)]
        exercise_rest: Option<i64>,

        /// Seconds of rest between rounds
        #[arg(long, allow_negative_numbers = true)]
        round_rest: Option<i64>,

        /// Default seconds of rest between sets
        #[arg(long)]
        set_rest: Option<u64>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    circuit_core::logging::init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let store = FileConfigStore::open(&config_path)?;
    let mut data = store.config().data.clone();
    if let Some(dir) = cli.data_dir {
        data.data_dir = dir;
    }

    match cli.command {
        Commands::Run { workout, date } => cmd_run(&data, store, &workout, session_date(date)),
        Commands::Simulate { workout, date } => {
            cmd_simulate(&data, store, &workout, session_date(date))
        }
        Commands::Config { action } => cmd_config(store, action),
        Commands::Export { output } => cmd_export(&data, &output),
    }
}

fn session_date(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| chrono::Local::now().date_naive())
}

// ============================================================================
// run
// ============================================================================

fn cmd_run(data: &DataConfig, store: FileConfigStore, workout_path: &Path, date: NaiveDate) -> Result<()> {
    let workout = Workout::load(workout_path)?;
    let settings = store.config().clone();
    let book = LogBook::open(data.log_path(), date)?;

    let mut engine = CircuitEngine::builder(workout, date)
        .history(book.clone())
        .logger(book)
        .store(FileStore::new(data.cache_dir()))
        .feedback(TerminalFeedback::new(settings.feedback))
        .config_store(store)
        .on_close(|| println!("Session closed."))
        .build();

    display_header(&engine);
    engine.start()?;
    display_help();

    let input = spawn_stdin_reader();
    let mut display = Display::new();
    display.render(&engine);

    loop {
        match input.recv_timeout(Duration::from_millis(TICK_INTERVAL_MS)) {
            Ok(line) => {
                if handle_command(&mut engine, &line, settings.set_rest.default_seconds) == Flow::Quit {
                    break;
                }
                display.render_sets = true;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        engine.pump();
        display.render(&engine);
        if engine.phase() == Phase::Complete {
            break;
        }
    }

    engine.stop();
    Ok(())
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn handle_command(engine: &mut CircuitEngine, line: &str, set_rest_default: u64) -> Flow {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();
    let set_number = |i: usize| {
        args.get(i)
            .and_then(|s| s.parse::<usize>().ok())
            .and_then(|n| n.checked_sub(1))
    };

    let accepted = match command {
        "" => {
            if engine.phase() == Phase::Work {
                engine.done_set()
            } else {
                engine.skip()
            }
        }
        "d" | "done" => engine.done_set(),
        "s" | "skip" => engine.skip(),
        "p" | "pause" => engine.toggle_pause(),
        "c" => set_number(0).map(|i| engine.complete_set(i)).unwrap_or(false),
        "u" => set_number(0).map(|i| engine.uncomplete_set(i)).unwrap_or(false),
        "r" => match (set_number(0), args.get(1).and_then(|s| s.parse::<u32>().ok())) {
            (Some(i), Some(reps)) => {
                let weight = args.get(2).and_then(|s| s.parse::<f64>().ok());
                engine.update_set(
                    i,
                    SetInput {
                        reps: Some(reps),
                        weight,
                    },
                )
            }
            _ => false,
        },
        "t" => args
            .first()
            .and_then(|s| s.parse::<u32>().ok())
            .map(|secs| engine.choose_duration(secs))
            .unwrap_or(false),
        "g" | "go" => engine.start_timed_set(),
        "rest" => {
            let secs = args
                .first()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(set_rest_default);
            engine.start_set_rest(secs)
        }
        "x" => {
            engine.skip_set_rest();
            true
        }
        "q" | "quit" => return Flow::Quit,
        "?" | "h" | "help" => {
            display_help();
            true
        }
        other => match other.parse::<i64>() {
            Ok(delta) if other.starts_with('+') || other.starts_with('-') => {
                match engine.adjust_set_rest(delta) {
                    AdjustOutcome::Adjusted { remaining_secs } => {
                        println!("  Set rest: {}s left", remaining_secs);
                        true
                    }
                    AdjustOutcome::Cleared => {
                        println!("  Set rest skipped");
                        true
                    }
                    AdjustOutcome::Inactive => false,
                }
            }
            _ => false,
        },
    };

    if !accepted {
        println!("  (ignored: '{}' in {:?})", line.trim(), engine.phase());
    }
    Flow::Continue
}

/// Terminal renderer for the interactive session
struct Display {
    last_position: Option<(Phase, usize, u32)>,
    last_seconds: Option<u64>,
    last_paused: bool,
    render_sets: bool,
    tty: bool,
}

impl Display {
    fn new() -> Self {
        Self {
            last_position: None,
            last_seconds: None,
            last_paused: false,
            render_sets: false,
            tty: io::stdout().is_terminal(),
        }
    }

    fn render(&mut self, engine: &CircuitEngine) {
        let state = engine.state();
        let position = (state.phase, state.current_exercise_index, state.current_round);

        if self.last_position != Some(position) {
            self.last_position = Some(position);
            self.last_seconds = None;
            if self.tty {
                println!();
            }
            display_transition(engine, None);
            self.render_sets = state.phase == Phase::Work;
        }

        if state.paused != self.last_paused {
            self.last_paused = state.paused;
            println!("{}", if state.paused { "  ⏸ Paused" } else { "  ▶ Resumed" });
        }

        if self.render_sets && state.phase == Phase::Work {
            display_sets(engine);
        }
        self.render_sets = false;

        if !self.tty {
            return;
        }
        let seconds = engine.timer_state().map(|t| t.seconds);
        if seconds != self.last_seconds {
            self.last_seconds = seconds;
            let rest = engine
                .set_rest_remaining()
                .map(|s| format!("  set rest {}", format_clock(s)))
                .unwrap_or_default();
            print!(
                "\r  {}{}          ",
                seconds.map(format_clock).unwrap_or_default(),
                rest
            );
            let _ = io::stdout().flush();
        }
    }
}

fn display_header(engine: &CircuitEngine) {
    let config = engine.config();
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  CIRCUIT: {}", engine.workout().name);
    println!("╰─────────────────────────────────────────╯");
    println!(
        "  {} exercises × {} rounds, rest {}s, round rest {}s",
        engine.workout().exercises.len(),
        config.rounds,
        config.rest_between_exercises,
        config.rest_between_rounds
    );
}

fn display_help() {
    println!("─────────────────────────────────────────");
    println!("  Enter   done set (work) / skip (rest)");
    println!("  p       pause / resume");
    println!("  c N     complete set N      u N   undo set N");
    println!("  r N R [W]  edit set N to R reps (weight W)");
    println!("  t S     choose S seconds    g     start timed set");
    println!("  rest [S]  rest between sets  +N/-N adjust   x skip rest");
    println!("  q       quit");
    println!("─────────────────────────────────────────");
}

/// One line describing the phase just entered
fn display_transition(engine: &CircuitEngine, elapsed_ms: Option<u64>) {
    let state = engine.state();
    let stamp = elapsed_ms
        .map(|ms| format!("[{}] ", format_clock(ms / 1000)))
        .unwrap_or_default();
    let target = engine.timer_state().map(|t| t.target).unwrap_or(0);
    let up_next = engine
        .up_next()
        .map(|e| format!(", up next: {}", e.name))
        .unwrap_or_default();

    match state.phase {
        Phase::Config => {}
        Phase::GetReady => println!("{}Get ready ({}s){}", stamp, target, up_next),
        Phase::Work => {
            let name = engine.current_exercise().map(|e| e.name.as_str()).unwrap_or("?");
            let sets = engine.plan().map(|p| p.num_sets).unwrap_or(0);
            println!(
                "{}Round {}/{} | Work: {} ({} sets)",
                stamp, state.current_round, state.total_rounds, name, sets
            );
        }
        Phase::Rest => println!("{}Rest {}s{}", stamp, target, up_next),
        Phase::RoundRest => println!("{}Round rest {}s{}", stamp, target, up_next),
        Phase::Complete => {
            let total = match (state.total_start_time, state.total_end_time) {
                (Some(start), Some(end)) => (end - start).num_seconds().max(0) as u64,
                _ => 0,
            };
            println!(
                "{}✓ Circuit complete: {} rounds in {}",
                stamp,
                state.total_rounds,
                format_clock(total)
            );
        }
    }
}

fn display_sets(engine: &CircuitEngine) {
    let unit = match engine.plan() {
        Some(plan) if plan.is_time_based => "s",
        _ => " reps",
    };
    for (i, (input, done)) in engine
        .set_inputs()
        .iter()
        .zip(engine.completed_sets())
        .enumerate()
    {
        let reps = input
            .reps
            .map(|r| format!("{}{}", r, unit))
            .unwrap_or_else(|| "-".into());
        let weight = input.weight.map(|w| format!(" @ {}", w)).unwrap_or_default();
        println!("  {}. {}{}{}", i + 1, reps, weight, if *done { "  ✓" } else { "" });
    }
}

fn format_clock(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Bell on the terminal; vibration has no terminal equivalent
struct TerminalFeedback {
    settings: FeedbackConfig,
}

impl TerminalFeedback {
    fn new(settings: FeedbackConfig) -> Self {
        Self { settings }
    }
}

impl Feedback for TerminalFeedback {
    fn play_sound(&mut self, kind: SoundKind) {
        if !self.settings.sound {
            return;
        }
        tracing::debug!("Cue {:?}", kind);
        let mut err = io::stderr();
        let _ = err.write_all(b"\x07");
        let _ = err.flush();
    }

    fn vibrate(&mut self, pattern: &[u32]) {
        if self.settings.vibrate {
            tracing::debug!("Vibrate {:?} requested; no haptics on a terminal", pattern);
        }
    }
}

// ============================================================================
// simulate
// ============================================================================

fn cmd_simulate(
    data: &DataConfig,
    store: FileConfigStore,
    workout_path: &Path,
    date: NaiveDate,
) -> Result<()> {
    let workout = Workout::load(workout_path)?;
    let book = LogBook::open(data.log_path(), date)?;
    let logged_before = completed_on(&book, date);

    let start_ms = date
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
        .max(0) as u64;
    let clock = ManualClock::new(start_ms);

    let mut engine = CircuitEngine::builder(workout, date)
        .clock(clock.clone())
        .history(book.clone())
        .logger(book.clone())
        .store(FileStore::new(data.cache_dir()))
        .config_store(store)
        .build();

    display_header(&engine);
    engine.start()?;

    let mut last_position = None;
    let mut steps = 0u64;
    loop {
        let state = engine.state();
        let position = (state.phase, state.current_exercise_index, state.current_round);
        if last_position != Some(position) {
            last_position = Some(position);
            display_transition(&engine, Some(clock.now_ms() - start_ms));
        }

        match engine.phase() {
            Phase::Complete => break,
            Phase::Work => perform_work(&mut engine),
            _ => {}
        }

        clock.advance(TICK_INTERVAL_MS);
        engine.pump();

        steps += 1;
        if steps > MAX_SIMULATION_STEPS {
            engine.stop();
            return Err(Error::Circuit("simulation did not finish".into()));
        }
    }

    engine.stop();
    println!(
        "✓ Logged {} sets to {}",
        completed_on(&book, date).saturating_sub(logged_before),
        data.log_path().display()
    );
    Ok(())
}

/// Complete whatever the current Work phase needs, as a user would
fn perform_work(engine: &mut CircuitEngine) {
    let Some(plan) = engine.plan().cloned() else {
        return;
    };

    if plan.is_time_based {
        let running = engine.timer_state().map(|t| t.is_running).unwrap_or(false);
        if !running && !engine.start_timed_set() && plan.display_duration.is_none() {
            engine.choose_duration(SIMULATED_DURATION_SECS);
        }
        return;
    }

    let pending: Vec<usize> = engine
        .completed_sets()
        .iter()
        .enumerate()
        .filter(|(_, done)| !**done)
        .map(|(i, _)| i)
        .collect();
    for i in pending {
        let input = engine.set_inputs()[i];
        if input.to_entry().is_none() {
            engine.update_set(
                i,
                SetInput {
                    reps: Some(SIMULATED_REPS),
                    ..input
                },
            );
        }
        engine.complete_set(i);
    }
}

fn completed_on(book: &LogBook, date: NaiveDate) -> usize {
    let records = book.records();
    circuit_core::export::effective_sets(&records)
        .into_iter()
        .filter(|r| r.date == date)
        .count()
}

// ============================================================================
// config / export
// ============================================================================

fn cmd_config(mut store: FileConfigStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("# {}", store.path().display());
            print_config(store.config())
        }
        ConfigAction::Set {
            rounds,
            exercise_rest,
            round_rest,
            set_rest,
        } => {
            let current = store.config().circuit;
            let circuit = CircuitConfig::from_raw(
                rounds.unwrap_or(current.rounds as i64),
                exercise_rest.unwrap_or(current.rest_between_exercises as i64),
                round_rest.unwrap_or(current.rest_between_rounds as i64),
            );
            let path = store.path().to_path_buf();
            let saved = store.update(|config| {
                config.circuit = circuit;
                if let Some(secs) = set_rest {
                    config.set_rest.default_seconds = secs;
                }
            })?;
            println!("✓ Saved {}", path.display());
            print_config(saved)
        }
    }
}

fn print_config(config: &Config) -> Result<()> {
    let contents = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    print!("{}", contents);
    Ok(())
}

fn cmd_export(data: &DataConfig, output: &Path) -> Result<()> {
    let log_path = data.log_path();
    if !log_path.exists() {
        println!("No sets logged yet - nothing to export.");
        return Ok(());
    }

    let count = export_log_to_csv(&log_path, output)?;
    println!("✓ Exported {} sets to CSV", count);
    println!("  CSV: {}", output.display());
    Ok(())
}
