//! Global magnitude pruning
//!
//! Two engines over one shared core:
//!
//! - [`L1UnstructuredPruner`]: element-wise, every `.weight` parameter,
//!   ranked by |w|.
//! - [`L2StructuredPruner`]: channel-wise over linear-layer weight
//!   columns, ranked by column L2 norm, with physical compaction on
//!   export.
//!
//! The core pieces are the [`ParamRegistry`] (stable uids over eligible
//! parameters), monotonic keep-masks ([`ElementMask`], [`ChannelMask`]),
//! and the exact merge-reduce [`GlobalTopK`] selector. Both engines honor
//! the same run contract: the first `prune` call fixes the rate, every
//! step removes a fraction of what *remains*, and pruned units never come
//! back.
//!
//! # References
//!
//! - Han, S., et al. (2015). Learning both weights and connections. NeurIPS.
//! - Li, H., et al. (2016). Pruning filters for efficient ConvNets. arXiv:1608.08710.

mod mask;
mod registry;
mod run;
mod schedule;
mod structured;
mod topk;
mod unstructured;

pub use mask::{ChannelMask, ElementMask};
pub use registry::{Eligibility, EligibleParam, ParamRegistry};
pub use run::{PruneStep, Pruneable, PruningMetadata, PruningRun};
pub use schedule::PruneSchedule;
pub use structured::L2StructuredPruner;
pub use topk::{group_by_owner, GlobalTopK, TopKCandidate};
pub use unstructured::L1UnstructuredPruner;
