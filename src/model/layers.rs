//! Transformer building-block layers
//!
//! All layers operate on flat `f32` buffers with explicit dims, in the
//! convention `(seq_len, width)` row-major. Weight matrices are stored
//! `(out_features, in_features)` row-major, so a weight *column* is an
//! input channel — the unit the structured pruner removes.

use crate::Tensor;

/// Deterministic pseudo-random init so tests are reproducible without a
/// seeded RNG.
pub(crate) fn sin_init(len: usize, seed: f32, scale: f32) -> Vec<f32> {
    (0..len).map(|i| (i as f32 * seed).sin() * scale).collect()
}

/// GELU activation (tanh approximation, as in GPT-2).
pub(crate) fn gelu(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + 0.044_715 * x * x * x)).tanh())
}

/// In-place softmax over a slice.
pub(crate) fn softmax_in_place(xs: &mut [f32]) {
    let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for x in xs.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    for x in xs.iter_mut() {
        *x /= sum;
    }
}

/// LayerNorm with an optional bias.
pub struct LayerNorm {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
    eps: f32,
}

impl LayerNorm {
    pub fn new(ndim: usize, bias: bool) -> Self {
        Self {
            weight: Tensor::ones(ndim, true),
            bias: bias.then(|| Tensor::zeros(ndim, true)),
            eps: 1e-5,
        }
    }

    /// Normalize each position of a `(seq_len, width)` buffer.
    pub fn forward_batched(&self, x: &[f32], seq_len: usize, width: usize) -> Vec<f32> {
        let w = self.weight.to_vec();
        let b = self.bias.as_ref().map(Tensor::to_vec);
        let mut out = vec![0.0; seq_len * width];

        for s in 0..seq_len {
            let row = &x[s * width..(s + 1) * width];
            let mean = row.iter().sum::<f32>() / width as f32;
            let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / width as f32;
            let inv_std = 1.0 / (var + self.eps).sqrt();

            for (i, &v) in row.iter().enumerate() {
                let mut y = (v - mean) * inv_std * w[i];
                if let Some(b) = &b {
                    y += b[i];
                }
                out[s * width + i] = y;
            }
        }
        out
    }
}

/// Restricts an incoming full-width activation to a layer's retained input
/// channels. Installed on a `Linear` when its weight has been physically
/// compacted: upstream layers still produce the full-width activation, so
/// the input is gathered down to the surviving columns before the dense
/// matmul. Explicit composition, no callback registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRestriction {
    retained: Vec<usize>,
}

impl ChannelRestriction {
    pub fn new(retained: Vec<usize>) -> Self {
        Self { retained }
    }

    /// Retained input-channel indices, in increasing order.
    pub fn retained(&self) -> &[usize] {
        &self.retained
    }

    /// Gather retained channels out of a `(seq_len, full_width)` buffer.
    pub fn gather(&self, x: &[f32], full_width: usize, seq_len: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(seq_len * self.retained.len());
        for s in 0..seq_len {
            let row = &x[s * full_width..(s + 1) * full_width];
            out.extend(self.retained.iter().map(|&c| row[c]));
        }
        out
    }
}

/// Dense linear layer, `y = x W^T + b`.
pub struct Linear {
    /// Weight, `(out_features, in_features)` row-major. After compaction the
    /// column count shrinks to the retained-channel count.
    pub weight: Tensor,
    pub bias: Option<Tensor>,
    out_features: usize,
    /// Width of the *incoming* activation; unchanged by compaction.
    in_features: usize,
    restriction: Option<ChannelRestriction>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, bias: bool, seed: f32) -> Self {
        let scale = 0.02;
        Self {
            weight: Tensor::from_vec(sin_init(out_features * in_features, seed, scale), true),
            bias: bias.then(|| Tensor::zeros(out_features, true)),
            out_features,
            in_features,
            restriction: None,
        }
    }

    /// Tied-weight constructor: shares storage with `weight`.
    pub fn tied(weight: Tensor, in_features: usize, out_features: usize) -> Self {
        Self {
            weight,
            bias: None,
            out_features,
            in_features,
            restriction: None,
        }
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Current weight column count: retained channels if compacted,
    /// otherwise the full input width.
    pub fn in_width(&self) -> usize {
        self.restriction
            .as_ref()
            .map_or(self.in_features, |r| r.retained().len())
    }

    pub fn restriction(&self) -> Option<&ChannelRestriction> {
        self.restriction.as_ref()
    }

    /// Forward over a `(seq_len, in_features)` buffer.
    pub fn forward(&self, x: &[f32], seq_len: usize) -> Vec<f32> {
        let (input, in_w) = match &self.restriction {
            Some(r) => (r.gather(x, self.in_features, seq_len), r.retained().len()),
            None => (x.to_vec(), self.in_features),
        };

        let w = self.weight.to_vec();
        let b = self.bias.as_ref().map(Tensor::to_vec);
        let mut y = vec![0.0; seq_len * self.out_features];

        for s in 0..seq_len {
            let xrow = &input[s * in_w..(s + 1) * in_w];
            for o in 0..self.out_features {
                let wrow = &w[o * in_w..(o + 1) * in_w];
                let mut acc = b.as_ref().map_or(0.0, |b| b[o]);
                for i in 0..in_w {
                    acc += xrow[i] * wrow[i];
                }
                y[s * self.out_features + o] = acc;
            }
        }
        y
    }

    /// Physically remove all but the `retained` input channels, replacing
    /// the weight with a fresh sliced tensor and installing the matching
    /// input restriction.
    pub fn compact(&mut self, retained: &[usize]) {
        let old_in = self.in_width();
        let w = self.weight.to_vec();
        let mut sliced = Vec::with_capacity(self.out_features * retained.len());
        for o in 0..self.out_features {
            let row = &w[o * old_in..(o + 1) * old_in];
            sliced.extend(retained.iter().map(|&c| row[c]));
        }
        self.weight = Tensor::from_vec(sliced, self.weight.requires_grad());
        self.restriction = Some(ChannelRestriction::new(retained.to_vec()));
    }
}

/// Token/position embedding table, `(num_embeddings, n_embd)` row-major.
pub struct Embedding {
    pub weight: Tensor,
    num_embeddings: usize,
    n_embd: usize,
}

impl Embedding {
    pub fn new(num_embeddings: usize, n_embd: usize, seed: f32) -> Self {
        Self {
            weight: Tensor::from_vec(sin_init(num_embeddings * n_embd, seed, 0.02), true),
            num_embeddings,
            n_embd,
        }
    }

    pub fn num_embeddings(&self) -> usize {
        self.num_embeddings
    }

    pub fn n_embd(&self) -> usize {
        self.n_embd
    }

    /// Look up embeddings for a sequence of indices.
    pub fn forward(&self, ids: &[usize]) -> Vec<f32> {
        let w = self.weight.to_vec();
        let mut out = Vec::with_capacity(ids.len() * self.n_embd);
        for &id in ids {
            debug_assert!(id < self.num_embeddings, "index {id} out of range");
            out.extend_from_slice(&w[id * self.n_embd..(id + 1) * self.n_embd]);
        }
        out
    }
}
