//! Unstructured L1 magnitude pruning
//!
//! Zeroes individual weight elements globally, smallest |w| first. Masks
//! are monotonic, so repeated steps compound: each step removes
//! `floor(remaining * rate)` of the *currently active* elements.

use std::time::Instant;

use crate::checkpoint::{CheckpointState, TensorEntry};
use crate::model::{Gpt, GptConfig};
use crate::prune::mask::ElementMask;
use crate::prune::registry::{Eligibility, ParamRegistry};
use crate::prune::run::{PruneStep, Pruneable, PruningMetadata, PruningRun};
use crate::prune::topk::GlobalTopK;
use crate::{Error, Result, Tensor};

/// Element-wise global magnitude pruner.
pub struct L1UnstructuredPruner {
    model: Gpt,
    registry: ParamRegistry,
    /// One mask per registered parameter, indexed by uid.
    masks: Vec<ElementMask>,
    run: PruningRun,
    orig_numel: usize,
    /// Currently active (unpruned) elements across eligible parameters.
    numel: usize,
    last_step: Option<PruneStep>,
    audited: bool,
}

impl L1UnstructuredPruner {
    /// Build a fresh model from `config` and wrap it for pruning.
    pub fn new(config: &GptConfig) -> Self {
        Self::from_model(Gpt::new(config))
    }

    /// Wrap an existing (possibly pretrained) model.
    pub fn from_model(model: Gpt) -> Self {
        let registry = ParamRegistry::from_model(&model, Eligibility::AnyWeight);
        let masks = registry
            .iter()
            .map(|p| ElementMask::new(p.elems()))
            .collect();
        let numel = registry.total_elems();
        Self {
            model,
            registry,
            masks,
            run: PruningRun::new(),
            orig_numel: numel,
            numel,
            last_step: None,
            audited: false,
        }
    }

    pub fn model(&self) -> &Gpt {
        &self.model
    }

    pub fn last_step(&self) -> Option<&PruneStep> {
        self.last_step.as_ref()
    }

    /// Re-zero every masked-off element. Parameter updates (an optimizer
    /// step) can revive pruned weights; callers that train between prune
    /// steps re-apply before the next forward.
    pub fn apply_masks(&self) {
        for p in self.registry.iter() {
            self.masks[p.uid as usize].apply(&p.tensor);
        }
    }

    /// Forward through the wrapped model with masks enforced.
    ///
    /// The first call after each prune step audits the live tensors: the
    /// actual nonzero count is compared against the mask bookkeeping and
    /// any drift is logged. Exact zeros that exist in the weights
    /// independently of pruning make this a lower bound, not an equality.
    pub fn forward(&mut self, tokens: &[u32], targets: Option<&[i32]>) -> (Tensor, Option<f32>) {
        self.apply_masks();
        if !self.audited {
            self.audited = true;
            let actual: usize = self
                .registry
                .iter()
                .map(|p| p.tensor.count_nonzero())
                .sum();
            if actual > self.numel {
                eprintln!(
                    "nonzero audit: counted {actual} nonzero elements, mask bookkeeping says {}",
                    self.numel
                );
            }
        }
        self.model.forward(tokens, targets)
    }

    /// Export the dense (masked, not compacted) parameters.
    pub fn export_state(&self) -> CheckpointState {
        self.apply_masks();
        let tensors = self
            .model
            .named_parameters()
            .into_iter()
            .map(|np| {
                let entry = TensorEntry {
                    shape: np.shape.clone(),
                    data: np.tensor.to_vec(),
                };
                (np.name, entry)
            })
            .collect();
        CheckpointState {
            metadata: self.metadata(),
            tensors,
            retained: Default::default(),
        }
    }

    fn metadata(&self) -> PruningMetadata {
        PruningMetadata {
            orig_non_zero: self.orig_numel,
            non_zero: self.numel,
            pct_orig: self.numel as f64 / self.orig_numel as f64,
            orig_nc: None,
            non_zero_nc: None,
        }
    }
}

impl Pruneable for L1UnstructuredPruner {
    fn prune(&mut self, rate: f32) -> Result<PruneStep> {
        let step = self.run.begin_step(rate)?;
        let started = Instant::now();
        let elems_before = self.numel;

        let k = (self.numel as f64 * f64::from(rate)).floor() as usize;
        let mut topk = GlobalTopK::new(k);
        for p in self.registry.iter() {
            let mags = self.masks[p.uid as usize].masked_magnitudes(&p.tensor);
            topk.offer(p.uid, &mags);
        }
        let winners = topk.finish();
        if winners.len() != k {
            return Err(Error::SelectorShortfall {
                requested: k,
                selected: winners.len(),
            });
        }

        let mut pruned = 0;
        for w in &winners {
            if self.masks[w.uid as usize].clear(w.index) {
                pruned += 1;
            }
        }
        self.numel -= pruned;
        self.apply_masks();
        // Re-arm the nonzero audit for the next forward.
        self.audited = false;

        let report = PruneStep {
            step,
            requested: k,
            pruned,
            elems_before,
            elems_after: self.numel,
            channels_before: None,
            channels_after: None,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        eprintln!("{report}");
        self.last_step = Some(report.clone());
        Ok(report)
    }

    fn num_elems(&self) -> usize {
        self.numel
    }

    fn num_pruned(&self) -> usize {
        self.orig_numel - self.numel
    }

    fn pruning_metadata(&self) -> (String, PruningMetadata) {
        let meta = self.metadata();
        (meta.checkpoint_filename(), meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_removes_floor_of_remaining() {
        let mut pruner = L1UnstructuredPruner::new(&GptConfig::tiny());
        let total = pruner.num_elems();

        let step = pruner.prune(0.1).unwrap();
        let k1 = (total as f64 * 0.1).floor() as usize;
        assert_eq!(step.requested, k1);
        assert_eq!(step.pruned, k1);
        assert_eq!(pruner.num_elems(), total - k1);

        // Second step shrinks by 10% of the new remainder, not the original.
        let step = pruner.prune(0.1).unwrap();
        let k2 = ((total - k1) as f64 * 0.1).floor() as usize;
        assert_eq!(step.pruned, k2);
        assert_eq!(pruner.num_elems(), total - k1 - k2);
        assert_eq!(pruner.num_pruned(), k1 + k2);
    }

    #[test]
    fn test_pruned_weights_are_zero() {
        let mut pruner = L1UnstructuredPruner::new(&GptConfig::tiny());
        let total = pruner.num_elems();
        pruner.prune(0.25).unwrap();

        let nonzero: usize = pruner
            .registry
            .iter()
            .map(|p| p.tensor.count_nonzero())
            .sum();
        assert!(nonzero <= pruner.num_elems());
        assert!(nonzero < total);
    }

    #[test]
    fn test_prune_removes_smallest_first() {
        let mut pruner = L1UnstructuredPruner::new(&GptConfig::tiny());
        // Collect the global magnitude floor that must be gone after one step.
        let mut mags: Vec<f32> = Vec::new();
        for p in pruner.registry.iter() {
            mags.extend(p.tensor.to_vec().iter().map(|v| v.abs()));
        }
        mags.sort_by(f32::total_cmp);
        let k = (mags.len() as f64 * 0.2).floor() as usize;
        let threshold = mags[k - 1];

        pruner.prune(0.2).unwrap();

        // Every surviving element is at least as large as the k-th smallest.
        for p in pruner.registry.iter() {
            let mask = &pruner.masks[p.uid as usize];
            for (i, v) in p.tensor.to_vec().iter().enumerate() {
                if mask.is_active(i) {
                    assert!(v.abs() >= threshold || *v == 0.0);
                }
            }
        }
    }

    #[test]
    fn test_rate_contract_enforced() {
        let mut pruner = L1UnstructuredPruner::new(&GptConfig::tiny());
        pruner.prune(0.1).unwrap();
        assert!(matches!(
            pruner.prune(0.3),
            Err(Error::RateMismatch { .. })
        ));
        // Failed step leaves state untouched.
        let elems = pruner.num_elems();
        pruner.prune(0.1).unwrap();
        assert!(pruner.num_elems() < elems);
    }

    #[test]
    fn test_masks_survive_weight_revival() {
        let mut pruner = L1UnstructuredPruner::new(&GptConfig::tiny());
        pruner.prune(0.3).unwrap();
        let elems = pruner.num_elems();

        // Simulate an optimizer step writing into pruned slots.
        for p in pruner.registry.iter() {
            p.tensor.data_mut().fill(1.0);
        }
        pruner.apply_masks();

        let nonzero: usize = pruner
            .registry
            .iter()
            .map(|p| p.tensor.count_nonzero())
            .sum();
        assert_eq!(nonzero, elems);
    }

    #[test]
    fn test_forward_after_pruning() {
        let config = GptConfig::tiny();
        let mut pruner = L1UnstructuredPruner::new(&config);
        pruner.prune(0.5).unwrap();
        let (logits, loss) = pruner.forward(&[1, 2, 3], Some(&[2, 3, 4]));
        assert_eq!(logits.len(), 3 * config.vocab_size);
        assert!(loss.unwrap().is_finite());
    }

    #[test]
    fn test_metadata_and_filename() {
        let mut pruner = L1UnstructuredPruner::new(&GptConfig::tiny());
        let (name, meta) = pruner.pruning_metadata();
        assert_eq!(name, "1.000x_orig_ckpt.pt");
        assert_eq!(meta.orig_non_zero, meta.non_zero);
        assert_eq!(meta.orig_nc, None);

        pruner.prune(0.5).unwrap();
        let (name, meta) = pruner.pruning_metadata();
        assert_eq!(meta.non_zero, pruner.num_elems());
        assert!((meta.pct_orig - 0.5).abs() < 1e-3);
        assert_eq!(name, format!("{:.3}x_orig_ckpt.pt", meta.pct_orig));

        // Metadata is idempotent: querying does not mutate state.
        let (name2, meta2) = pruner.pruning_metadata();
        assert_eq!(name, name2);
        assert_eq!(meta, meta2);
    }

    #[test]
    fn test_export_state_is_dense_and_masked() {
        let mut pruner = L1UnstructuredPruner::new(&GptConfig::tiny());
        pruner.prune(0.4).unwrap();
        let state = pruner.export_state();

        assert!(!state.is_compacted());
        assert_eq!(state.metadata.non_zero, pruner.num_elems());
        // Dense shapes, with zeros in place of pruned weights.
        let wte = &state.tensors["transformer.wte.weight"];
        assert_eq!(wte.elems(), wte.data.len());
        let exported_nonzero: usize = state
            .tensors
            .iter()
            .filter(|(n, _)| n.ends_with(".weight"))
            .map(|(_, t)| t.data.iter().filter(|v| **v != 0.0).count())
            .sum();
        assert!(exported_nonzero <= pruner.num_elems());
    }
}
