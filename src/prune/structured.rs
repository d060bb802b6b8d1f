//! Structured L2 channel pruning
//!
//! Removes whole input channels (weight-matrix columns) from the linear
//! layers, ranked globally by column L2 norm. Unlike the element-wise
//! engine, a structured run can be physically *compacted*: the surviving
//! columns are sliced into smaller dense tensors for export, and a model
//! rebuilt from such a checkpoint gathers its inputs down to the retained
//! channels at forward time.
//!
//! Channel accounting still reports element totals over every weight
//! parameter, targets and non-targets alike, so the sparsity fraction in
//! the metadata is comparable with the unstructured engine's.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::checkpoint::{CheckpointState, TensorEntry};
use crate::model::{Gpt, GptConfig};
use crate::prune::mask::ChannelMask;
use crate::prune::registry::{Eligibility, ParamRegistry};
use crate::prune::run::{PruneStep, Pruneable, PruningMetadata, PruningRun};
use crate::prune::topk::{group_by_owner, GlobalTopK};
use crate::{Error, Result, Tensor};

/// A parameter never drops below this many active channels; winners that
/// would cross the floor are skipped for that whole parameter.
const MIN_CHANNELS: usize = 2;

/// Channel-wise global magnitude pruner.
pub struct L2StructuredPruner {
    model: Gpt,
    registry: ParamRegistry,
    /// One mask per registered weight matrix, indexed by uid.
    masks: Vec<ChannelMask>,
    /// Elements of `.weight` parameters outside the structured targets
    /// (embeddings, norms); constant for the life of the engine.
    non_target_elems: usize,
    run: PruningRun,
    orig_elems: usize,
    orig_channels: usize,
    /// Set once the model's tensors are physically compacted; a dirty
    /// engine serves inference and export but refuses further pruning.
    dirty: bool,
    last_step: Option<PruneStep>,
}

impl L2StructuredPruner {
    /// Build a fresh model from `config` and wrap it for pruning.
    pub fn new(config: &GptConfig) -> Self {
        Self::from_model(Gpt::new(config))
    }

    /// Wrap an existing (possibly pretrained) model.
    pub fn from_model(model: Gpt) -> Self {
        let registry = ParamRegistry::from_model(&model, Eligibility::TwoDimNonEmbedding);
        let masks = registry.iter().map(|p| ChannelMask::new(p.cols())).collect();
        let non_target_elems = count_non_target_elems(&model, &registry);
        let orig_channels = registry.total_channels();
        let orig_elems = non_target_elems + registry.total_elems();
        Self {
            model,
            registry,
            masks,
            non_target_elems,
            run: PruningRun::new(),
            orig_elems,
            orig_channels,
            dirty: false,
            last_step: None,
        }
    }

    /// Rebuild an engine from a compacted checkpoint: slice each linear
    /// layer down to its recorded retained channels, then copy the tensors
    /// in. The resulting engine is dirty from the start.
    pub fn from_compacted(config: &GptConfig, state: &CheckpointState) -> Result<Self> {
        if !state.is_compacted() {
            return Err(Error::NotCompacted);
        }
        let mut model = Gpt::new(config);
        for (module, linear) in model.linear_layers_mut() {
            let name = format!("{module}.weight");
            let retained = state.retained_channels(&name)?;
            linear.compact(retained);
        }

        // Compaction replaced the weight tensors, so enumerate afresh;
        // handles captured before the slice would be stale.
        let registry = ParamRegistry::from_model(&model, Eligibility::TwoDimNonEmbedding);
        let masks = registry.iter().map(|p| ChannelMask::new(p.cols())).collect();
        let non_target_elems = count_non_target_elems(&model, &registry);

        let meta = &state.metadata;
        let orig_channels = meta
            .orig_nc
            .ok_or_else(|| Error::MissingEntry("metadata.orig_nc".to_string()))?;

        let mut engine = Self {
            model,
            registry,
            masks,
            non_target_elems,
            run: PruningRun::new(),
            orig_elems: meta.orig_non_zero,
            orig_channels,
            dirty: true,
            last_step: None,
        };
        engine.load_state(state)?;
        Ok(engine)
    }

    pub fn model(&self) -> &Gpt {
        &self.model
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_step(&self) -> Option<&PruneStep> {
        self.last_step.as_ref()
    }

    /// Active channels across the structured targets.
    pub fn num_channels(&self) -> usize {
        self.masks.iter().map(ChannelMask::count_active).sum()
    }

    /// Re-zero every masked-off column.
    pub fn apply_masks(&self) {
        for p in self.registry.iter() {
            self.masks[p.uid as usize].apply(&p.tensor, p.rows());
        }
    }

    /// Forward through the wrapped model. While the tensors are still
    /// dense the channel masks are re-applied first; a compacted model's
    /// layers gather their inputs down to the retained channels instead.
    pub fn forward(&self, tokens: &[u32], targets: Option<&[i32]>) -> (Tensor, Option<f32>) {
        if !self.dirty {
            self.apply_masks();
        }
        self.model.forward(tokens, targets)
    }

    /// Copy parameters from a checkpoint into the live model.
    ///
    /// A compacted checkpoint only fits a model whose tensors were sliced
    /// to the pruned shapes first (see [`Self::from_compacted`]).
    pub fn load_state(&mut self, state: &CheckpointState) -> Result<()> {
        if state.is_compacted() && !self.dirty {
            return Err(Error::NotCompacted);
        }
        self.model.load_parameters(&state.tensors)
    }

    /// Export with target weights physically sliced to their surviving
    /// columns, plus the retained-channel indices needed to import them.
    pub fn export_compacted(&mut self) -> CheckpointState {
        self.apply_masks();
        let metadata = self.metadata();
        let mut tensors: BTreeMap<String, TensorEntry> = BTreeMap::new();
        let mut retained_map: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for (module, linear) in self.model.linear_layers_mut() {
            let name = format!("{module}.weight");
            let Some(uid) = self.registry.uid_of(&name) else {
                continue;
            };
            let active = self.masks[uid as usize].active_channels();
            // Retained indices are relative to the original full width,
            // composing through any existing restriction.
            let retained: Vec<usize> = match linear.restriction() {
                Some(r) => active.iter().map(|&c| r.retained()[c]).collect(),
                None => active.clone(),
            };

            let rows = linear.out_features();
            let width = linear.in_width();
            let w = linear.weight.to_vec();
            let mut sliced = Vec::with_capacity(rows * active.len());
            for r in 0..rows {
                let row = &w[r * width..(r + 1) * width];
                sliced.extend(active.iter().map(|&c| row[c]));
            }

            tensors.insert(
                name.clone(),
                TensorEntry {
                    shape: vec![rows, active.len()],
                    data: sliced,
                },
            );
            retained_map.insert(format!("{name}_rem_ch"), retained);
        }

        for np in self.model.named_parameters() {
            let (name, tensor, shape) = (np.name, np.tensor, np.shape);
            tensors.entry(name).or_insert_with(|| TensorEntry {
                shape,
                data: tensor.to_vec(),
            });
        }

        CheckpointState {
            metadata,
            tensors,
            retained: retained_map,
        }
    }

    fn metadata(&self) -> PruningMetadata {
        let non_zero = self.num_elems();
        PruningMetadata {
            orig_non_zero: self.orig_elems,
            non_zero,
            pct_orig: non_zero as f64 / self.orig_elems as f64,
            orig_nc: Some(self.orig_channels),
            non_zero_nc: Some(self.num_channels()),
        }
    }
}

impl Pruneable for L2StructuredPruner {
    fn prune(&mut self, rate: f32) -> Result<PruneStep> {
        if self.dirty {
            return Err(Error::AlreadyCompacted(
                "tensors are sliced to the pruned shapes".to_string(),
            ));
        }
        let step = self.run.begin_step(rate)?;
        let started = Instant::now();
        let elems_before = self.num_elems();
        let channels_before = self.num_channels();

        let kc = (channels_before as f64 * f64::from(rate)).floor() as usize;
        let mut topk = GlobalTopK::new(kc);
        for p in self.registry.iter() {
            let norms = self.masks[p.uid as usize].channel_norms(&p.tensor, p.rows());
            topk.offer(p.uid, &norms);
        }
        let winners = topk.finish();

        let mut pruned = 0;
        for (uid, channels) in group_by_owner(&winners) {
            let mask = &mut self.masks[uid as usize];
            // Skip the whole parameter rather than partially honoring its
            // winners: dropping below the floor would collapse the layer.
            if mask.count_active().saturating_sub(channels.len()) < MIN_CHANNELS {
                continue;
            }
            for c in channels {
                if mask.clear(c) {
                    pruned += 1;
                }
            }
        }
        self.apply_masks();

        let report = PruneStep {
            step,
            requested: kc,
            pruned,
            elems_before,
            elems_after: self.num_elems(),
            channels_before: Some(channels_before),
            channels_after: Some(self.num_channels()),
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        eprintln!("{report}");
        self.last_step = Some(report.clone());
        Ok(report)
    }

    fn num_elems(&self) -> usize {
        let target_elems: usize = self
            .registry
            .iter()
            .map(|p| self.masks[p.uid as usize].count_active() * p.rows())
            .sum();
        self.non_target_elems + target_elems
    }

    fn num_pruned(&self) -> usize {
        self.orig_elems - self.num_elems()
    }

    fn pruning_metadata(&self) -> (String, PruningMetadata) {
        let meta = self.metadata();
        (meta.checkpoint_filename(), meta)
    }
}

fn count_non_target_elems(model: &Gpt, registry: &ParamRegistry) -> usize {
    model
        .named_parameters()
        .iter()
        .filter(|p| p.name.ends_with(".weight") && registry.uid_of(&p.name).is_none())
        .map(|p| p.elems())
        .sum()
}
