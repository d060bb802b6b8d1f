//! Crate error types

use thiserror::Error;

/// Errors raised by the pruning engines and checkpoint adapter.
///
/// The contract-violation variants (`RateMismatch`, `SelectorShortfall`,
/// `NotCompacted`, `AlreadyCompacted`, `ShapeMismatch`) are fatal: a prune
/// step either fully succeeds or fails with one of these, there is no
/// partial-failure state to recover from.
#[derive(Debug, Error)]
pub enum Error {
    /// A pruning run fixes its rate on the first `prune` call; every later
    /// call must pass the identical rate.
    #[error("must apply the same rate of {fixed:.3} for all pruning steps (got {requested:.3})")]
    RateMismatch { fixed: f32, requested: f32 },

    /// Prune rates are fractions of the remaining weights.
    #[error("prune rate must be in (0, 1), got {0}")]
    InvalidRate(f32),

    /// The global top-k selector produced fewer winners than requested.
    #[error("expected to select {requested} winners, selected {selected}")]
    SelectorShortfall { requested: usize, selected: usize },

    /// A compacted checkpoint was loaded into a model whose tensors were
    /// never compacted to the pruned shapes.
    #[error("parameters have not been compacted to load from a pruned checkpoint")]
    NotCompacted,

    /// The engine's tensors are already physically compacted.
    #[error("model is already compacted: {0}")]
    AlreadyCompacted(String),

    /// Parameter copy with mismatched shapes.
    #[error("shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A checkpoint is missing a parameter or retained-channel entry.
    #[error("checkpoint missing entry: {0}")]
    MissingEntry(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for podar operations.
pub type Result<T> = std::result::Result<T, Error>;
