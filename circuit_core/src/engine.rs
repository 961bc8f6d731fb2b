//! Circuit phase state machine.
//!
//! The engine owns the session state and every timer of a circuit run. It is
//! single-threaded and never blocks: the host calls [`CircuitEngine::pump`]
//! whenever it wakes (the CLI every 250 ms, tests after moving a virtual
//! clock), and each due task is handled in order.
//!
//! ## Phases
//!
//! ```text
//! Config -> GetReady -> Work -> (Rest | RoundRest) -> Work ... -> Complete
//! ```
//!
//! Rest and RoundRest return straight to Work. Every transition cancels the
//! auto-advance dispatch, the set rest timer, and all phase timers before the
//! next phase arms its own.

use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    ConfigStore, DiscardLogger, Feedback, History, MemoryConfigStore, NoHistory, SetLogger,
    SilentFeedback, SoundKind,
};
use crate::planner::{is_time_based, PlanContext, SetPlanner};
use crate::run_cache::{KeyValueStore, MemoryStore, RunCache};
use crate::scheduler::{Scheduler, Task, TaskHandle, TaskQueue};
use crate::set_rest::{AdjustOutcome, SetRestTimer};
use crate::timer::{TickOutcome, TimerMode, TimerSlot, TimerState, WallClockTimer};
use crate::{
    CircuitConfig, CircuitSessionState, Error, Exercise, ExercisePlan, Phase, Result, SetEntry,
    SetInput, Workout,
};
use chrono::NaiveDate;
use serde::Serialize;

/// Get-ready countdown, independent of user config
pub const GET_READY_SECS: u64 = 10;

/// Floor for rest and round-rest so "up next" always has time on screen
pub const MIN_TRANSITION_SECS: u64 = 5;

/// Delay between the final set of an exercise and the automatic DONE_SET
pub const AUTO_ADVANCE_DELAY_MS: u64 = 800;

const SET_COMPLETE_VIBRATION: &[u32] = &[200];
const REST_OVER_VIBRATION: &[u32] = &[100, 50, 100];
const CIRCUIT_COMPLETE_VIBRATION: &[u32] = &[200, 100, 200, 100, 400];

fn slot_for(phase: Phase) -> Option<TimerSlot> {
    match phase {
        Phase::GetReady => Some(TimerSlot::GetReady),
        Phase::Work => Some(TimerSlot::Work),
        Phase::Rest => Some(TimerSlot::Rest),
        Phase::RoundRest => Some(TimerSlot::RoundRest),
        Phase::Config | Phase::Complete => None,
    }
}

#[derive(Debug)]
struct PhaseTimers {
    get_ready: WallClockTimer,
    work: WallClockTimer,
    rest: WallClockTimer,
    round_rest: WallClockTimer,
}

impl PhaseTimers {
    fn new() -> Self {
        Self {
            get_ready: WallClockTimer::new(TimerSlot::GetReady),
            work: WallClockTimer::new(TimerSlot::Work),
            rest: WallClockTimer::new(TimerSlot::Rest),
            round_rest: WallClockTimer::new(TimerSlot::RoundRest),
        }
    }

    fn get(&self, slot: TimerSlot) -> &WallClockTimer {
        match slot {
            TimerSlot::GetReady => &self.get_ready,
            TimerSlot::Work => &self.work,
            TimerSlot::Rest => &self.rest,
            TimerSlot::RoundRest => &self.round_rest,
        }
    }

    fn get_mut(&mut self, slot: TimerSlot) -> &mut WallClockTimer {
        match slot {
            TimerSlot::GetReady => &mut self.get_ready,
            TimerSlot::Work => &mut self.work,
            TimerSlot::Rest => &mut self.rest,
            TimerSlot::RoundRest => &mut self.round_rest,
        }
    }

    fn reset_all(&mut self, scheduler: &mut dyn Scheduler) {
        for timer in [
            &mut self.get_ready,
            &mut self.work,
            &mut self.rest,
            &mut self.round_rest,
        ] {
            timer.reset(scheduler);
        }
    }
}

/// Plan plus live set progress for one `(exercise, round)` activation
#[derive(Debug)]
struct ActiveExercise {
    index: usize,
    round: u32,
    plan: ExercisePlan,
    inputs: Vec<SetInput>,
    logged: Vec<bool>,
}

impl ActiveExercise {
    fn new(index: usize, round: u32, plan: ExercisePlan) -> Self {
        let inputs = plan.sets.clone();
        let logged = vec![false; plan.num_sets];
        Self {
            index,
            round,
            plan,
            inputs,
            logged,
        }
    }

    fn next_unlogged(&self) -> Option<usize> {
        self.logged.iter().position(|logged| !logged)
    }

    fn all_logged(&self) -> bool {
        !self.logged.is_empty() && self.logged.iter().all(|logged| *logged)
    }
}

/// Everything a display needs about the current instant
#[derive(Clone, Debug, Serialize)]
pub struct CircuitView {
    pub state: CircuitSessionState,
    pub exercise: Option<String>,
    pub up_next: Option<String>,
    pub timer: Option<TimerState>,
    pub set_rest_remaining: Option<u64>,
    pub plan: Option<ExercisePlan>,
    pub inputs: Vec<SetInput>,
    pub completed: Vec<bool>,
}

// ============================================================================
// Builder
// ============================================================================

/// Wires collaborators into an engine; unset ones get inert defaults
pub struct EngineBuilder {
    workout: Workout,
    date: NaiveDate,
    clock: Box<dyn Clock>,
    scheduler: Box<dyn Scheduler>,
    history: Box<dyn History>,
    logger: Box<dyn SetLogger>,
    store: Box<dyn KeyValueStore>,
    feedback: Box<dyn Feedback>,
    config_store: Box<dyn ConfigStore>,
    on_close: Option<Box<dyn FnOnce()>>,
}

impl EngineBuilder {
    pub fn new(workout: Workout, date: NaiveDate) -> Self {
        Self {
            workout,
            date,
            clock: Box::new(SystemClock),
            scheduler: Box::new(TaskQueue::new()),
            history: Box::new(NoHistory),
            logger: Box::new(DiscardLogger),
            store: Box::new(MemoryStore::new()),
            feedback: Box::new(SilentFeedback),
            config_store: Box::new(MemoryConfigStore::default()),
            on_close: None,
        }
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    pub fn history(mut self, history: impl History + 'static) -> Self {
        self.history = Box::new(history);
        self
    }

    pub fn logger(mut self, logger: impl SetLogger + 'static) -> Self {
        self.logger = Box::new(logger);
        self
    }

    pub fn store(mut self, store: impl KeyValueStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    pub fn feedback(mut self, feedback: impl Feedback + 'static) -> Self {
        self.feedback = Box::new(feedback);
        self
    }

    pub fn config_store(mut self, config_store: impl ConfigStore + 'static) -> Self {
        self.config_store = Box::new(config_store);
        self
    }

    pub fn on_close(mut self, on_close: impl FnOnce() + 'static) -> Self {
        self.on_close = Some(Box::new(on_close));
        self
    }

    pub fn build(self) -> CircuitEngine {
        let config = self.config_store.load_config().clamped();
        CircuitEngine {
            workout: self.workout,
            date: self.date,
            config,
            state: CircuitSessionState {
                phase: Phase::Config,
                current_exercise_index: 0,
                current_round: 0,
                total_rounds: config.rounds,
                paused: false,
                total_start_time: None,
                total_end_time: None,
            },
            timers: PhaseTimers::new(),
            set_rest: SetRestTimer::new(),
            planner: SetPlanner::new(),
            run_cache: RunCache::new(self.store),
            active: None,
            auto_advance: None,
            resume_on_unpause: false,
            work_activations: 0,
            closed: false,
            clock: self.clock,
            scheduler: self.scheduler,
            history: self.history,
            logger: self.logger,
            feedback: self.feedback,
            config_store: self.config_store,
            on_close: self.on_close,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct CircuitEngine {
    workout: Workout,
    date: NaiveDate,
    config: CircuitConfig,
    state: CircuitSessionState,
    timers: PhaseTimers,
    set_rest: SetRestTimer,
    planner: SetPlanner,
    run_cache: RunCache,
    active: Option<ActiveExercise>,
    auto_advance: Option<TaskHandle>,
    /// Whether un-pausing should restart the phase timer
    resume_on_unpause: bool,
    work_activations: usize,
    closed: bool,
    clock: Box<dyn Clock>,
    scheduler: Box<dyn Scheduler>,
    history: Box<dyn History>,
    logger: Box<dyn SetLogger>,
    feedback: Box<dyn Feedback>,
    config_store: Box<dyn ConfigStore>,
    on_close: Option<Box<dyn FnOnce()>>,
}

impl CircuitEngine {
    pub fn builder(workout: Workout, date: NaiveDate) -> EngineBuilder {
        EngineBuilder::new(workout, date)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &CircuitSessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn config(&self) -> CircuitConfig {
        self.config
    }

    pub fn workout(&self) -> &Workout {
        &self.workout
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of times the Work phase has been entered this run
    pub fn work_activations(&self) -> usize {
        self.work_activations
    }

    pub fn plan(&self) -> Option<&ExercisePlan> {
        self.active.as_ref().map(|a| &a.plan)
    }

    pub fn set_inputs(&self) -> &[SetInput] {
        self.active.as_ref().map(|a| a.inputs.as_slice()).unwrap_or(&[])
    }

    pub fn completed_sets(&self) -> &[bool] {
        self.active.as_ref().map(|a| a.logged.as_slice()).unwrap_or(&[])
    }

    pub fn current_exercise(&self) -> Option<&Exercise> {
        if !self.state.phase.is_active() {
            return None;
        }
        self.workout.exercises.get(self.state.current_exercise_index)
    }

    /// The exercise the next Work phase will show
    pub fn up_next(&self) -> Option<&Exercise> {
        let index = match self.state.phase {
            Phase::GetReady => self.state.current_exercise_index,
            Phase::Rest => self.state.current_exercise_index + 1,
            Phase::RoundRest => 0,
            _ => return None,
        };
        self.workout.exercises.get(index)
    }

    /// Reading of the current phase's timer
    pub fn timer_state(&self) -> Option<TimerState> {
        let slot = slot_for(self.state.phase)?;
        Some(self.timers.get(slot).snapshot(self.clock.now_ms()))
    }

    pub fn set_rest_remaining(&self) -> Option<u64> {
        self.set_rest.remaining_secs(self.clock.now_ms())
    }

    /// Instant (ms) of the next scheduled task, for hosts that sleep
    pub fn next_wakeup(&self) -> Option<u64> {
        self.scheduler.next_due()
    }

    pub fn view(&self) -> CircuitView {
        CircuitView {
            state: self.state.clone(),
            exercise: self.current_exercise().map(|e| e.name.clone()),
            up_next: self.up_next().map(|e| e.name.clone()),
            timer: self.timer_state(),
            set_rest_remaining: self.set_rest_remaining(),
            plan: self.plan().cloned(),
            inputs: self.set_inputs().to_vec(),
            completed: self.completed_sets().to_vec(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Change the circuit settings; only allowed before START
    pub fn set_config(&mut self, config: CircuitConfig) -> Result<CircuitConfig> {
        if self.state.phase != Phase::Config || self.closed {
            return Err(Error::Circuit(
                "circuit settings can only change before the session starts".into(),
            ));
        }
        let config = config.clamped();
        self.config = config;
        self.state.total_rounds = config.rounds;
        self.config_store.save_config(config);
        Ok(config)
    }

    /// START: enter get-ready at round 1, first exercise
    pub fn start(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Circuit("engine has been stopped".into()));
        }
        if self.state.phase != Phase::Config {
            return Err(Error::Circuit("circuit already started".into()));
        }
        if self.workout.exercises.is_empty() {
            return Err(Error::Circuit(format!(
                "workout '{}' has no exercises",
                self.workout.id
            )));
        }

        self.state = CircuitSessionState {
            phase: Phase::Config,
            current_exercise_index: 0,
            current_round: 1,
            total_rounds: self.config.rounds,
            paused: false,
            total_start_time: Some(self.clock.now()),
            total_end_time: None,
        };
        tracing::info!(
            "Starting circuit '{}': {} exercises x {} rounds",
            self.workout.name,
            self.workout.exercises.len(),
            self.config.rounds
        );
        self.enter_phase(Phase::GetReady);
        Ok(())
    }

    /// Fire every task due at the clock's current instant
    pub fn pump(&mut self) -> usize {
        let mut fired = 0;
        while !self.closed {
            let now = self.clock.now_ms();
            let Some((_, task)) = self.scheduler.pop_due(now) else {
                break;
            };
            fired += 1;
            self.handle_task(task);
        }
        fired
    }

    /// DONE_SET: commit pending work and leave the Work phase
    pub fn done_set(&mut self) -> bool {
        if self.closed || self.state.phase != Phase::Work {
            tracing::debug!("Ignoring DONE_SET in {:?}", self.state.phase);
            return false;
        }
        self.cancel_auto_advance();

        if self.active_is_timed() {
            if self.timers.work.is_running() {
                let now = self.clock.now_ms();
                let elapsed = self.work_countdown_elapsed(now);
                self.timers.work.stop(self.scheduler.as_mut(), now);
                if elapsed > 0 {
                    self.commit_timed_set(elapsed);
                }
            }
        } else {
            self.commit_pending_sets();
        }

        self.transition_after_work();
        true
    }

    /// Leave get-ready, rest, or round-rest without waiting for the timer
    pub fn skip(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match self.state.phase {
            Phase::GetReady => self.enter_phase(Phase::Work),
            Phase::Rest => self.advance_exercise(),
            Phase::RoundRest => self.advance_round(),
            _ => return false,
        }
        true
    }

    /// TOGGLE_PAUSE for the active phase
    pub fn toggle_pause(&mut self) -> bool {
        if self.closed || !self.state.phase.is_active() {
            return false;
        }
        let now = self.clock.now_ms();
        let slot = slot_for(self.state.phase);

        if !self.state.paused {
            self.state.paused = true;
            self.resume_on_unpause = false;
            if let Some(slot) = slot {
                let timer = self.timers.get_mut(slot);
                self.resume_on_unpause = timer.is_running();
                timer.stop(self.scheduler.as_mut(), now);
            }
            self.cancel_auto_advance();
            tracing::info!("Paused in {:?}", self.state.phase);
        } else {
            self.state.paused = false;
            tracing::info!("Resumed in {:?}", self.state.phase);
            if std::mem::take(&mut self.resume_on_unpause) {
                if let Some(slot) = slot {
                    let outcome = self
                        .timers
                        .get_mut(slot)
                        .toggle(self.scheduler.as_mut(), now);
                    self.on_timer_outcome(slot, outcome);
                }
            }
            self.schedule_auto_advance_if_finished();
        }
        true
    }

    /// Mark set `index` of the active exercise done using its inputs
    pub fn complete_set(&mut self, index: usize) -> bool {
        if self.closed || self.state.phase != Phase::Work {
            return false;
        }
        let Some(active) = self.active.as_ref() else {
            return false;
        };
        if active.logged.get(index) != Some(&false) {
            return false;
        }
        let mut input = active.inputs[index];

        // A running countdown belongs to this set; log the time actually worked
        let countdown = self.active_is_timed() && self.timers.work.is_running();
        let now = self.clock.now_ms();
        if countdown {
            let elapsed = self.work_countdown_elapsed(now);
            if elapsed > 0 {
                input.reps = Some(elapsed);
            }
        }
        let Some(entry) = input.to_entry() else {
            tracing::debug!("Set {} has no valid reps; not logging", index + 1);
            return false;
        };

        if countdown {
            self.timers.work.stop(self.scheduler.as_mut(), now);
            if let Some(active) = self.active.as_mut() {
                active.inputs[index].reps = Some(entry.reps);
            }
        }
        self.commit_set(index, entry);
        self.schedule_auto_advance_if_finished();
        true
    }

    pub fn uncomplete_set(&mut self, index: usize) -> bool {
        if self.closed || self.state.phase != Phase::Work {
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.logged.get(index) != Some(&true) {
            return false;
        }

        active.logged[index] = false;
        let set_index = index + active.plan.set_offset;
        self.logger.uncomplete_set(&active.plan.exercise_id, set_index);
        self.cancel_auto_advance();
        true
    }

    /// Edit the reps/weight of a planned set
    pub fn update_set(&mut self, index: usize, input: SetInput) -> bool {
        if self.closed {
            return false;
        }
        match self.active.as_mut().and_then(|a| a.inputs.get_mut(index)) {
            Some(slot) => {
                *slot = input;
                true
            }
            None => false,
        }
    }

    /// Pick the duration for a timed exercise and start its countdown
    pub fn choose_duration(&mut self, seconds: u32) -> bool {
        if self.closed || self.state.phase != Phase::Work || seconds == 0 {
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if !active.plan.is_time_based {
            return false;
        }

        for (input, logged) in active.inputs.iter_mut().zip(&active.logged) {
            if !logged {
                input.reps = Some(seconds);
            }
        }
        active.plan.display_duration = Some(seconds);
        let exercise_id = active.plan.exercise_id.clone();

        self.planner.record_duration(
            self.date,
            &self.workout.id,
            &exercise_id,
            self.state.current_round,
            seconds,
            &mut self.run_cache,
        );
        self.arm_work_countdown(seconds as u64);
        true
    }

    /// Start the countdown for the next timed set with its pre-filled duration
    pub fn start_timed_set(&mut self) -> bool {
        if self.closed || self.state.phase != Phase::Work || self.timers.work.is_running() {
            return false;
        }
        let Some(active) = self.active.as_ref() else {
            return false;
        };
        if !active.plan.is_time_based {
            return false;
        }
        let seconds = active
            .next_unlogged()
            .and_then(|i| active.inputs[i].reps)
            .filter(|secs| *secs > 0);

        match seconds {
            Some(seconds) => {
                self.arm_work_countdown(seconds as u64);
                true
            }
            None => false,
        }
    }

    /// Begin resting between sets of the current exercise
    pub fn start_set_rest(&mut self, total_secs: u64) -> bool {
        if self.closed || self.state.phase != Phase::Work {
            return false;
        }
        let now = self.clock.now_ms();
        self.set_rest.start(total_secs, self.scheduler.as_mut(), now);
        true
    }

    pub fn adjust_set_rest(&mut self, delta_secs: i64) -> AdjustOutcome {
        let now = self.clock.now_ms();
        self.set_rest
            .adjust(delta_secs, self.scheduler.as_mut(), now)
    }

    pub fn skip_set_rest(&mut self) {
        self.set_rest.clear(self.scheduler.as_mut());
    }

    /// Stop the circuit: cancel everything, then run the close callback once
    pub fn stop(&mut self) {
        if self.closed {
            return;
        }
        self.cancel_auto_advance();
        self.set_rest.clear(self.scheduler.as_mut());
        self.timers.reset_all(self.scheduler.as_mut());
        self.scheduler.cancel_all();
        self.closed = true;
        tracing::info!(
            "Circuit stopped in {:?} (round {}, exercise {})",
            self.state.phase,
            self.state.current_round,
            self.state.current_exercise_index + 1
        );

        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn handle_task(&mut self, task: Task) {
        let now = self.clock.now_ms();
        match task {
            Task::Tick(slot) => {
                if slot_for(self.state.phase) != Some(slot) {
                    tracing::debug!("Dropping stale tick for {:?}", slot);
                    self.timers
                        .get_mut(slot)
                        .reset(self.scheduler.as_mut());
                    return;
                }
                let outcome = self
                    .timers
                    .get_mut(slot)
                    .tick(self.scheduler.as_mut(), now);
                self.on_timer_outcome(slot, outcome);
            }
            Task::SetRestPoll => {
                if self.set_rest.poll(self.scheduler.as_mut(), now) {
                    self.feedback.play_sound(SoundKind::RestOver);
                    self.feedback.vibrate(REST_OVER_VIBRATION);
                }
            }
            Task::AutoAdvance => {
                self.auto_advance = None;
                tracing::debug!("Auto-advancing after final set");
                self.done_set();
            }
        }
    }

    fn on_timer_outcome(&mut self, slot: TimerSlot, outcome: TickOutcome) {
        if outcome.completed {
            self.on_timer_complete(slot);
            return;
        }
        let timer = self.timers.get(slot);
        if outcome.seconds_changed
            && timer.mode() == TimerMode::Countdown
            && (1..=3).contains(&timer.seconds())
        {
            self.feedback.play_sound(SoundKind::Countdown);
        }
    }

    fn on_timer_complete(&mut self, slot: TimerSlot) {
        match slot {
            TimerSlot::GetReady => self.enter_phase(Phase::Work),
            TimerSlot::Rest => self.advance_exercise(),
            TimerSlot::RoundRest => self.advance_round(),
            TimerSlot::Work => {
                let seconds = self.timers.work.target_secs() as u32;
                self.commit_timed_set(seconds);
                self.feedback.play_sound(SoundKind::SetComplete);
                self.feedback.vibrate(SET_COMPLETE_VIBRATION);
                self.schedule_auto_advance_if_finished();
            }
        }
    }

    fn enter_phase(&mut self, phase: Phase) {
        self.cancel_auto_advance();
        self.set_rest.clear(self.scheduler.as_mut());
        self.timers.reset_all(self.scheduler.as_mut());

        self.state.phase = phase;
        self.state.paused = false;
        self.resume_on_unpause = false;
        tracing::info!(
            "Phase {:?}: round {}/{}, exercise {}/{}",
            phase,
            self.state.current_round,
            self.state.total_rounds,
            self.state.current_exercise_index + 1,
            self.workout.exercises.len()
        );

        match phase {
            Phase::GetReady => {
                self.start_phase_timer(TimerSlot::GetReady, GET_READY_SECS, TimerMode::Countdown)
            }
            Phase::Rest => {
                let secs = (self.config.rest_between_exercises as u64).max(MIN_TRANSITION_SECS);
                self.start_phase_timer(TimerSlot::Rest, secs, TimerMode::Countdown);
            }
            Phase::RoundRest => {
                let secs = (self.config.rest_between_rounds as u64).max(MIN_TRANSITION_SECS);
                self.start_phase_timer(TimerSlot::RoundRest, secs, TimerMode::Countdown);
            }
            Phase::Work => {
                self.work_activations += 1;
                self.feedback.play_sound(SoundKind::Go);
                let timed = self
                    .workout
                    .exercises
                    .get(self.state.current_exercise_index)
                    .map(|e| is_time_based(&self.workout, e))
                    .unwrap_or(false);
                if !timed {
                    self.start_phase_timer(TimerSlot::Work, 0, TimerMode::Stopwatch);
                }
            }
            Phase::Config | Phase::Complete => {}
        }

        // A zero-length timer may already have moved us on
        if self.state.phase == phase {
            self.refresh_plan();
        }
    }

    fn start_phase_timer(&mut self, slot: TimerSlot, secs: u64, mode: TimerMode) {
        let now = self.clock.now_ms();
        let outcome = self
            .timers
            .get_mut(slot)
            .start(secs, mode, self.scheduler.as_mut(), now);
        self.on_timer_outcome(slot, outcome);
    }

    fn arm_work_countdown(&mut self, secs: u64) {
        if self.state.paused {
            self.timers.work.arm(secs, self.scheduler.as_mut());
            self.resume_on_unpause = true;
        } else {
            self.start_phase_timer(TimerSlot::Work, secs, TimerMode::Countdown);
        }
    }

    fn refresh_plan(&mut self) {
        if !self.state.phase.is_active() {
            return;
        }
        let index = self.state.current_exercise_index;
        let round = self.state.current_round;
        let Some(exercise) = self.workout.exercises.get(index) else {
            return;
        };

        let ctx = PlanContext {
            workout: &self.workout,
            exercise,
            round,
            phase: self.state.phase,
            date: self.date,
        };
        let plan = self
            .planner
            .plan(&ctx, self.history.as_ref(), &mut self.run_cache);
        let auto_start = plan.auto_start_duration_sec;

        match self.active.as_mut() {
            Some(active) if active.index == index && active.round == round => active.plan = plan,
            _ => self.active = Some(ActiveExercise::new(index, round, plan)),
        }

        if let Some(secs) = auto_start {
            self.arm_work_countdown(secs as u64);
        }
    }

    /// Whole seconds the work countdown has covered at `now`
    fn work_countdown_elapsed(&self, now: u64) -> u32 {
        let remaining = self.timers.work.remaining_ms(now).div_ceil(1000);
        self.timers.work.target_secs().saturating_sub(remaining) as u32
    }

    fn active_is_timed(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| a.plan.is_time_based)
            .unwrap_or(false)
    }

    fn commit_set(&mut self, index: usize, entry: SetEntry) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.logged.get(index) != Some(&false) {
            return;
        }
        active.logged[index] = true;
        let set_index = index + active.plan.set_offset;
        self.logger
            .complete_set(&active.plan.exercise_id, set_index, entry, &self.workout.id);
    }

    /// Log the next unlogged timed set with `seconds` of work
    fn commit_timed_set(&mut self, seconds: u32) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(index) = active.next_unlogged() else {
            return;
        };
        active.inputs[index].reps = Some(seconds);
        let entry = SetEntry {
            reps: seconds,
            weight: active.inputs[index].weight,
        };
        self.commit_set(index, entry);
    }

    fn commit_pending_sets(&mut self) {
        let pending: Vec<(usize, SetEntry)> = match self.active.as_ref() {
            Some(active) => active
                .inputs
                .iter()
                .zip(&active.logged)
                .enumerate()
                .filter(|(_, (_, logged))| !**logged)
                .filter_map(|(i, (input, _))| input.to_entry().map(|entry| (i, entry)))
                .collect(),
            None => Vec::new(),
        };
        for (index, entry) in pending {
            self.commit_set(index, entry);
        }
    }

    fn transition_after_work(&mut self) {
        let last_exercise = self.state.current_exercise_index + 1 >= self.workout.exercises.len();
        let last_round = self.state.current_round >= self.state.total_rounds;

        if !last_exercise {
            self.enter_phase(Phase::Rest);
        } else if !last_round {
            self.enter_phase(Phase::RoundRest);
        } else {
            self.finish();
        }
    }

    fn advance_exercise(&mut self) {
        self.state.current_exercise_index += 1;
        self.enter_phase(Phase::Work);
    }

    fn advance_round(&mut self) {
        self.state.current_exercise_index = 0;
        self.state.current_round += 1;
        self.enter_phase(Phase::Work);
    }

    fn finish(&mut self) {
        self.cancel_auto_advance();
        self.set_rest.clear(self.scheduler.as_mut());
        self.timers.reset_all(self.scheduler.as_mut());

        let end = self.clock.now();
        self.state.total_end_time = Some(end);
        self.state.phase = Phase::Complete;
        self.state.paused = false;
        self.active = None;

        let total_secs = self
            .state
            .total_start_time
            .map(|start| (end - start).num_seconds())
            .unwrap_or(0);
        tracing::info!(
            "Circuit '{}' complete: {} rounds in {}s",
            self.workout.name,
            self.state.total_rounds,
            total_secs
        );
        self.feedback.play_sound(SoundKind::CircuitComplete);
        self.feedback.vibrate(CIRCUIT_COMPLETE_VIBRATION);
    }

    fn schedule_auto_advance_if_finished(&mut self) {
        if self.closed
            || self.state.phase != Phase::Work
            || self.state.paused
            || self.auto_advance.is_some()
        {
            return;
        }
        let finished = self.active.as_ref().map(|a| a.all_logged()).unwrap_or(false);
        if finished {
            let now = self.clock.now_ms();
            self.auto_advance = Some(self.scheduler.schedule_once(
                now,
                AUTO_ADVANCE_DELAY_MS,
                Task::AutoAdvance,
            ));
            tracing::debug!("All sets done; advancing in {}ms", AUTO_ADVANCE_DELAY_MS);
        }
    }

    fn cancel_auto_advance(&mut self) {
        if let Some(handle) = self.auto_advance.take() {
            self.scheduler.cancel(handle);
        }
    }
}
