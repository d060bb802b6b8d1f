//! Podar: global magnitude pruning for a GPT-style language model
//!
//! This crate implements two experimental pruning strategies on top of a
//! small GPT-2-style transformer:
//!
//! - **Unstructured L1** ([`prune::L1UnstructuredPruner`]): zeroes individual
//!   weight elements globally, smallest magnitude first.
//! - **Structured L2** ([`prune::L2StructuredPruner`]): removes whole input
//!   channels (weight-matrix columns) ranked by L2 norm, and can physically
//!   compact the pruned tensors for export.
//!
//! Both engines share the same machinery: a parameter registry with stable
//! UIDs, boolean prune masks that only ever turn off, and an exact
//! merge-reduce global top-k selector that avoids materializing one giant
//! concatenated tensor across all parameters.
//!
//! ## Example
//!
//! ```
//! use podar::model::GptConfig;
//! use podar::prune::{L1UnstructuredPruner, Pruneable};
//!
//! let mut pruner = L1UnstructuredPruner::new(&GptConfig::tiny());
//! let before = pruner.num_elems();
//!
//! // Each step prunes 10% of the *remaining* weights (geometric decay).
//! pruner.prune(0.1).unwrap();
//! pruner.prune(0.1).unwrap();
//!
//! assert!(pruner.num_elems() < before);
//! let (filename, meta) = pruner.pruning_metadata();
//! assert!(filename.ends_with("x_orig_ckpt.pt"));
//! assert_eq!(meta.non_zero, pruner.num_elems());
//! ```

pub mod checkpoint;
mod error;
pub mod model;
pub mod prune;
mod tensor;

pub use error::{Error, Result};
pub use tensor::Tensor;
