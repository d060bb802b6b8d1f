//! Checkpoint state and on-disk formats
//!
//! A checkpoint is the pruning-aware export of a model: the dense (or
//! physically compacted) parameter tensors, the pruning metadata that names
//! the file, and — for compacted structured checkpoints — the per-layer
//! retained-channel indices needed to rebuild the input restrictions on
//! import.
//!
//! Format is picked by file extension: `.json` or `.yaml`/`.yml`. Anything
//! else (including the conventional `.pt` suffix of the metadata filename)
//! serializes as JSON.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::prune::PruningMetadata;
use crate::{Error, Result};

/// One serialized parameter: logical shape plus flat row-major data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorEntry {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorEntry {
    pub fn elems(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A complete exported checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Sparsity bookkeeping; also determines [`CheckpointState::filename`].
    pub metadata: PruningMetadata,
    /// Parameters keyed by canonical name (`transformer.wte.weight`, ...).
    pub tensors: BTreeMap<String, TensorEntry>,
    /// Retained input-channel indices per compacted weight, keyed
    /// `{param_name}_rem_ch`. Empty for dense exports.
    #[serde(default)]
    pub retained: BTreeMap<String, Vec<usize>>,
}

impl CheckpointState {
    /// Conventional checkpoint filename, e.g. `0.810x_orig_ckpt.pt`.
    pub fn filename(&self) -> String {
        self.metadata.checkpoint_filename()
    }

    /// Whether the export carries physically compacted tensors.
    pub fn is_compacted(&self) -> bool {
        !self.retained.is_empty()
    }

    /// Look up the retained channels recorded for a weight parameter.
    pub fn retained_channels(&self, param_name: &str) -> Result<&Vec<usize>> {
        let key = format!("{param_name}_rem_ch");
        self.retained
            .get(&key)
            .ok_or(Error::MissingEntry(key))
    }
}

/// On-disk serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    Json,
    Yaml,
}

impl CheckpointFormat {
    /// Infer the format from a path's extension. JSON is the default.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

/// Write a checkpoint to disk in the format implied by the path.
pub fn save_checkpoint(path: &Path, state: &CheckpointState) -> Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    match CheckpointFormat::from_path(path) {
        CheckpointFormat::Json => serde_json::to_writer(writer, state)
            .map_err(|e| Error::Serialization(e.to_string()))?,
        CheckpointFormat::Yaml => serde_yaml::to_writer(writer, state)
            .map_err(|e| Error::Serialization(e.to_string()))?,
    }
    Ok(())
}

/// Read a checkpoint back from disk.
pub fn load_checkpoint(path: &Path) -> Result<CheckpointState> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let state = match CheckpointFormat::from_path(path) {
        CheckpointFormat::Json => {
            serde_json::from_reader(reader).map_err(|e| Error::Serialization(e.to_string()))?
        }
        CheckpointFormat::Yaml => {
            serde_yaml::from_reader(reader).map_err(|e| Error::Serialization(e.to_string()))?
        }
    };
    Ok(state)
}
