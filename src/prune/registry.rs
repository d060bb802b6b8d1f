//! Eligible-parameter registry
//!
//! Snapshot of the model's prune-eligible parameters, taken once at engine
//! construction. Each entry keeps a shared handle to the live tensor plus a
//! stable numeric uid, so the global selector can tag candidates with a
//! `Copy` owner id instead of cloning name strings per element.

use std::collections::HashMap;

use crate::model::{Gpt, NamedParameter};
use crate::Tensor;

/// Which parameters an engine targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Every `.weight` parameter; element-wise pruning applies to all of
    /// them, embeddings and norms included.
    AnyWeight,
    /// Two-dimensional `.weight` matrices excluding the embedding tables;
    /// the unit of structured pruning is a weight column, which only
    /// linear layers have.
    TwoDimNonEmbedding,
}

impl Eligibility {
    fn matches(self, param: &NamedParameter) -> bool {
        if !param.name.ends_with(".weight") {
            return false;
        }
        match self {
            Eligibility::AnyWeight => true,
            Eligibility::TwoDimNonEmbedding => {
                param.shape.len() == 2
                    && !param.name.contains(".wte.")
                    && !param.name.contains(".wpe.")
            }
        }
    }
}

/// One registered parameter.
#[derive(Debug, Clone)]
pub struct EligibleParam {
    /// Dense index into the registry; also the engine's mask index.
    pub uid: u32,
    pub name: String,
    pub tensor: Tensor,
    pub shape: Vec<usize>,
}

impl EligibleParam {
    pub fn elems(&self) -> usize {
        self.shape.iter().product()
    }

    /// Row count of a 2-D parameter.
    pub fn rows(&self) -> usize {
        debug_assert_eq!(self.shape.len(), 2);
        self.shape[0]
    }

    /// Column (input-channel) count of a 2-D parameter.
    pub fn cols(&self) -> usize {
        debug_assert_eq!(self.shape.len(), 2);
        self.shape[1]
    }
}

/// Stable-order registry of eligible parameters.
#[derive(Debug, Default)]
pub struct ParamRegistry {
    params: Vec<EligibleParam>,
    uid_by_name: HashMap<String, u32>,
}

impl ParamRegistry {
    /// Enumerate the model and register every parameter `eligibility`
    /// accepts, in the model's stable parameter order.
    pub fn from_model(model: &Gpt, eligibility: Eligibility) -> Self {
        let mut registry = Self::default();
        for param in model.named_parameters() {
            if eligibility.matches(&param) {
                let uid = registry.params.len() as u32;
                registry.uid_by_name.insert(param.name.clone(), uid);
                registry.params.push(EligibleParam {
                    uid,
                    name: param.name,
                    tensor: param.tensor,
                    shape: param.shape,
                });
            }
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EligibleParam> {
        self.params.iter()
    }

    pub fn get(&self, uid: u32) -> &EligibleParam {
        &self.params[uid as usize]
    }

    pub fn uid_of(&self, name: &str) -> Option<u32> {
        self.uid_by_name.get(name).copied()
    }

    /// Inverse of [`Self::uid_of`] for the life of the registry.
    pub fn name_of(&self, uid: u32) -> &str {
        &self.params[uid as usize].name
    }

    /// Total elements across registered parameters.
    pub fn total_elems(&self) -> usize {
        self.params.iter().map(EligibleParam::elems).sum()
    }

    /// Total columns across registered 2-D parameters.
    pub fn total_channels(&self) -> usize {
        self.params.iter().map(EligibleParam::cols).sum()
    }
}
