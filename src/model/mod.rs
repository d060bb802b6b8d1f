//! GPT-style base model
//!
//! A small decoder-only transformer built from flat-buffer layers. The
//! pruning engines treat it through [`Gpt::named_parameters`] and the
//! shared [`crate::Tensor`] handles it hands out; nothing in `prune`
//! touches layer internals except the checkpoint adapter, which compacts
//! [`Linear`] layers in place.

mod config;
mod gpt;
mod layers;

pub use config::GptConfig;
pub use gpt::{Block, CausalSelfAttention, Gpt, Mlp, NamedParameter};
pub use layers::{ChannelRestriction, Embedding, LayerNorm, Linear};
