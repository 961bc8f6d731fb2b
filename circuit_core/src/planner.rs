//! Per-exercise set planner.
//!
//! Decides how many sets the active exercise gets and what to pre-fill, using
//! a fixed priority order over this run's memory, the run cache, the rep
//! scheme, and logged history. Every answer it resolves is written back so a
//! remounted engine reaches the same answer instead of deriving a new one.

use crate::collaborators::History;
use crate::run_cache::{CachePatch, RunCache, RunCacheEntry};
use crate::scheme::RepScheme;
use crate::{Exercise, ExercisePlan, ExerciseUnit, Log, Phase, SetInput, Workout};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

/// Identifies one pass through an exercise: `(exercise_id, round)`
type ActivationKey = (String, u32);

/// Inputs for one planning pass
pub struct PlanContext<'a> {
    pub workout: &'a Workout,
    pub exercise: &'a Exercise,
    pub round: u32,
    pub phase: Phase,
    pub date: NaiveDate,
}

impl PlanContext<'_> {
    fn scheme(&self) -> RepScheme {
        self.workout
            .scheme_for(self.exercise)
            .map(RepScheme::parse)
            .unwrap_or_default()
    }

    fn activation(&self) -> ActivationKey {
        (self.exercise.id.clone(), self.round)
    }
}

/// Whether an exercise is measured in seconds
pub fn is_time_based(workout: &Workout, exercise: &Exercise) -> bool {
    exercise.unit == ExerciseUnit::Seconds
        || workout
            .scheme_for(exercise)
            .map(|s| RepScheme::parse(s).timed)
            .unwrap_or(false)
}

/// Decisions the planner has made during this run
#[derive(Debug, Default)]
pub struct SetPlanner {
    sets_by_exercise: HashMap<String, usize>,
    chosen_durations: HashMap<String, u32>,
    offsets: HashMap<ActivationKey, usize>,
    /// Activations whose work countdown has already been armed
    armed: HashSet<ActivationKey>,
}

impl SetPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chosen_duration(&self, exercise_id: &str) -> Option<u32> {
        self.chosen_durations.get(exercise_id).copied()
    }

    /// Build the plan for the active exercise
    pub fn plan(
        &mut self,
        ctx: &PlanContext<'_>,
        history: &dyn History,
        cache: &mut RunCache,
    ) -> ExercisePlan {
        let exercise_id = ctx.exercise.id.as_str();
        let scheme = ctx.scheme();
        let prior = history.find_prior(exercise_id);
        let today = history.today(exercise_id);
        let cached = cache.load(ctx.date, &ctx.workout.id);

        let num_sets = self.resolve_num_sets(ctx, &scheme, cached.as_ref(), prior.as_ref(), today.as_ref());
        if !self.sets_by_exercise.contains_key(exercise_id) {
            self.sets_by_exercise.insert(exercise_id.to_string(), num_sets);
        }
        if cached
            .as_ref()
            .and_then(|c| c.sets_by_exercise_id.get(exercise_id))
            != Some(&num_sets)
        {
            cache.update(
                ctx.date,
                &ctx.workout.id,
                exercise_id,
                CachePatch {
                    sets: Some(num_sets),
                    duration: None,
                },
            );
        }

        // Approximate: counts completed sets, so a set un-completed earlier
        // today can leave `index + offset` on an index that is already logged.
        let set_offset = *self
            .offsets
            .entry(ctx.activation())
            .or_insert_with(|| today.as_ref().map(Log::completed_count).unwrap_or(0));

        let time_based = is_time_based(ctx.workout, ctx.exercise);
        let (sets, display_duration) = if time_based {
            let duration = self.resolve_duration(exercise_id, &scheme, cached.as_ref(), prior.as_ref(), today.as_ref());
            let input = SetInput {
                reps: duration,
                weight: None,
            };
            (vec![input; num_sets], duration)
        } else {
            let template = today
                .as_ref()
                .filter(|log| !log.sets.is_empty())
                .or(prior.as_ref());
            (prefill_from_template(num_sets, template, &scheme), None)
        };

        let auto_start_duration_sec = match display_duration {
            Some(duration)
                if ctx.phase == Phase::Work
                    && duration > 0
                    && !self.armed.contains(&ctx.activation()) =>
            {
                self.record_duration(ctx.date, &ctx.workout.id, exercise_id, ctx.round, duration, cache);
                tracing::info!("Auto-starting {}s countdown for '{}'", duration, exercise_id);
                Some(duration)
            }
            _ => None,
        };

        tracing::debug!(
            "Planned '{}' round {}: {} sets, offset {}, duration {:?}",
            exercise_id,
            ctx.round,
            num_sets,
            set_offset,
            display_duration
        );

        ExercisePlan {
            exercise_id: exercise_id.to_string(),
            num_sets,
            sets,
            is_time_based: time_based,
            display_duration,
            auto_start_duration_sec,
            set_offset,
        }
    }

    /// Remember a duration the user (or auto-start) picked for an activation
    pub fn record_duration(
        &mut self,
        date: NaiveDate,
        workout_id: &str,
        exercise_id: &str,
        round: u32,
        seconds: u32,
        cache: &mut RunCache,
    ) {
        self.chosen_durations.insert(exercise_id.to_string(), seconds);
        self.armed.insert((exercise_id.to_string(), round));
        cache.update(
            date,
            workout_id,
            exercise_id,
            CachePatch {
                sets: None,
                duration: Some(seconds),
            },
        );
    }

    fn resolve_num_sets(
        &self,
        ctx: &PlanContext<'_>,
        scheme: &RepScheme,
        cached: Option<&RunCacheEntry>,
        prior: Option<&Log>,
        today: Option<&Log>,
    ) -> usize {
        let exercise_id = ctx.exercise.id.as_str();
        let positive = |n: &usize| *n > 0;
        self.sets_by_exercise
            .get(exercise_id)
            .copied()
            .filter(positive)
            .or_else(|| {
                cached
                    .and_then(|c| c.sets_by_exercise_id.get(exercise_id).copied())
                    .filter(positive)
            })
            .or_else(|| scheme.sets.map(|s| s as usize))
            .or_else(|| prior.map(|log| log.sets.len()).filter(positive))
            .or_else(|| today.map(|log| log.sets.len()).filter(positive))
            .unwrap_or(1)
    }

    fn resolve_duration(
        &self,
        exercise_id: &str,
        scheme: &RepScheme,
        cached: Option<&RunCacheEntry>,
        prior: Option<&Log>,
        today: Option<&Log>,
    ) -> Option<u32> {
        if let Some(chosen) = self.chosen_durations.get(exercise_id) {
            return Some(*chosen);
        }
        if let Some(duration) = cached.and_then(|c| c.durations_by_exercise_id.get(exercise_id)) {
            return Some(*duration);
        }

        // Most recent first: today's sets, then the prior day's, latest set first
        let logged: Vec<u32> = today
            .into_iter()
            .chain(prior)
            .flat_map(|log| log.sets.iter().rev())
            .filter(|set| set.is_completed())
            .filter_map(|set| set.reps)
            .filter(|reps| *reps > 0)
            .collect();

        // A value equal to the scheme default may be incidental rather than chosen
        logged
            .iter()
            .copied()
            .find(|secs| Some(*secs) != scheme.reps)
            .or_else(|| logged.first().copied())
            .or_else(|| scheme.duration())
    }
}

/// Pre-fill non-timed sets from a template aligned to its tail
fn prefill_from_template(num_sets: usize, template: Option<&Log>, scheme: &RepScheme) -> Vec<SetInput> {
    let template_sets = template.map(|log| log.sets.as_slice()).unwrap_or(&[]);
    (0..num_sets)
        .map(|i| {
            let aligned = (i + template_sets.len()).checked_sub(num_sets);
            let source = aligned.and_then(|j| template_sets.get(j));
            SetInput {
                reps: source.and_then(|s| s.reps).or(scheme.reps),
                weight: source.and_then(|s| s.weight),
            }
        })
        .collect()
}
