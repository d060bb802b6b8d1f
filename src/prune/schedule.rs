//! Prune schedules
//!
//! Declarative description of *when* during a training loop the engine's
//! `prune` is invoked. The engine itself is schedule-agnostic; a training
//! harness asks the schedule at each step and calls `prune` when told to.

use serde::{Deserialize, Serialize};

/// When to apply prune steps over the course of a run.
///
/// # Example
///
/// ```
/// use podar::prune::PruneSchedule;
///
/// let schedule = PruneSchedule::Periodic {
///     start_step: 10,
///     interval: 5,
///     max_steps: 3,
/// };
/// assert!(schedule.should_prune_at(15));
/// assert!(!schedule.should_prune_at(25)); // max_steps exhausted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PruneSchedule {
    /// Prune exactly once, at `step`.
    OneShot { step: usize },
    /// Prune at `start_step` and every `interval` steps after, up to
    /// `max_steps` applications.
    Periodic {
        start_step: usize,
        interval: usize,
        max_steps: usize,
    },
}

impl PruneSchedule {
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            PruneSchedule::OneShot { .. } => Ok(()),
            PruneSchedule::Periodic {
                interval,
                max_steps,
                ..
            } => {
                if interval == 0 {
                    return Err("periodic schedule interval must be non-zero".to_string());
                }
                if max_steps == 0 {
                    return Err("periodic schedule max_steps must be non-zero".to_string());
                }
                Ok(())
            }
        }
    }

    /// Whether a prune step fires at training step `step`.
    pub fn should_prune_at(&self, step: usize) -> bool {
        match *self {
            PruneSchedule::OneShot { step: at } => step == at,
            PruneSchedule::Periodic {
                start_step,
                interval,
                max_steps,
            } => {
                step >= start_step
                    && (step - start_step) % interval == 0
                    && (step - start_step) / interval < max_steps
            }
        }
    }

    /// How many prune steps have fired at or before training step `step`.
    pub fn steps_applied_by(&self, step: usize) -> usize {
        match *self {
            PruneSchedule::OneShot { step: at } => usize::from(step >= at),
            PruneSchedule::Periodic {
                start_step,
                interval,
                max_steps,
            } => {
                if step < start_step {
                    0
                } else {
                    ((step - start_step) / interval + 1).min(max_steps)
                }
            }
        }
    }

    /// Expected remaining weight fraction after the steps fired by `step`,
    /// under compounding decay. Approximate: the engine floors each step's
    /// removal count, so the true fraction can sit slightly above this.
    pub fn expected_remaining_fraction(&self, rate: f32, step: usize) -> f64 {
        (1.0 - f64::from(rate)).powi(self.steps_applied_by(step) as i32)
    }
}
