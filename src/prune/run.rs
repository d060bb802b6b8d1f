//! Pruning-run bookkeeping: the fixed-rate contract, per-step reports, and
//! checkpoint metadata.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tracks the fixed-rate contract across a sequence of prune steps.
///
/// The first `prune` call fixes the rate for the whole run; any later call
/// with a different rate is a contract violation and fails the step before
/// any mask is touched.
#[derive(Debug, Clone, Default)]
pub struct PruningRun {
    fixed_rate: Option<f32>,
    steps: usize,
}

impl PruningRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `rate` against the contract and start a new step.
    ///
    /// Returns the 1-based step number.
    pub fn begin_step(&mut self, rate: f32) -> Result<usize> {
        if !rate.is_finite() || rate <= 0.0 || rate >= 1.0 {
            return Err(Error::InvalidRate(rate));
        }
        match self.fixed_rate {
            None => self.fixed_rate = Some(rate),
            Some(fixed) if fixed != rate => {
                return Err(Error::RateMismatch {
                    fixed,
                    requested: rate,
                })
            }
            Some(_) => {}
        }
        self.steps += 1;
        Ok(self.steps)
    }

    /// The rate fixed by the first step, if any step has run.
    pub fn fixed_rate(&self) -> Option<f32> {
        self.fixed_rate
    }

    /// Number of completed steps.
    pub fn steps(&self) -> usize {
        self.steps
    }
}

/// Sparsity bookkeeping attached to every checkpoint export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruningMetadata {
    /// Nonzero weight elements before any pruning.
    pub orig_non_zero: usize,
    /// Nonzero weight elements now.
    pub non_zero: usize,
    /// `non_zero / orig_non_zero`.
    pub pct_orig: f64,
    /// Original channel count (structured runs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_nc: Option<usize>,
    /// Remaining channel count (structured runs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_zero_nc: Option<usize>,
}

impl PruningMetadata {
    /// Conventional checkpoint filename: remaining fraction to three
    /// decimals, e.g. `0.810x_orig_ckpt.pt`.
    pub fn checkpoint_filename(&self) -> String {
        format!("{:.3}x_orig_ckpt.pt", self.pct_orig)
    }
}

/// Report for one completed prune step, suitable for logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneStep {
    /// 1-based step number within the run.
    pub step: usize,
    /// Units (elements or channels) the selector was asked to remove.
    pub requested: usize,
    /// Units actually newly removed this step.
    pub pruned: usize,
    pub elems_before: usize,
    pub elems_after: usize,
    /// Active channels before/after; unstructured runs leave these unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels_before: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels_after: Option<usize>,
    pub elapsed_secs: f64,
}

impl fmt::Display for PruneStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prune step {}: removed {}/{} requested",
            self.step, self.pruned, self.requested
        )?;
        if let (Some(before), Some(after)) = (self.channels_before, self.channels_after) {
            write!(f, ", channels {before} -> {after}")?;
        }
        write!(
            f,
            ", elems {} -> {} ({:.1}s)",
            self.elems_before, self.elems_after, self.elapsed_secs
        )
    }
}

/// The capability both pruning engines expose.
pub trait Pruneable {
    /// Prune a fraction `rate` of the currently remaining units.
    fn prune(&mut self, rate: f32) -> Result<PruneStep>;

    /// Nonzero weight elements remaining.
    fn num_elems(&self) -> usize;

    /// Weight elements removed so far.
    fn num_pruned(&self) -> usize;

    /// Checkpoint filename plus the metadata that produced it.
    fn pruning_metadata(&self) -> (String, PruningMetadata);
}
