//! GPT-2-style decoder-only transformer
//!
//! The base-model collaborator for the pruning engines. The engines need
//! three things from it: stable-order named-parameter enumeration, in-place
//! parameter mutation (through the shared [`Tensor`] handles), and a
//! forward-pass entry point taking token indices and optional targets.

use std::collections::BTreeMap;

use crate::checkpoint::TensorEntry;
use crate::model::config::GptConfig;
use crate::model::layers::{gelu, softmax_in_place, Embedding, LayerNorm, Linear};
use crate::{Error, Result, Tensor};

/// One enumerated model parameter: name, shared storage handle, and the
/// current logical shape.
#[derive(Debug, Clone)]
pub struct NamedParameter {
    pub name: String,
    pub tensor: Tensor,
    pub shape: Vec<usize>,
}

impl NamedParameter {
    /// Total element count.
    pub fn elems(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Causal self-attention with a fused qkv projection.
pub struct CausalSelfAttention {
    pub c_attn: Linear,
    pub c_proj: Linear,
    n_head: usize,
    n_embd: usize,
}

impl CausalSelfAttention {
    fn new(config: &GptConfig, seed: f32) -> Self {
        Self {
            c_attn: Linear::new(config.n_embd, 3 * config.n_embd, config.bias, seed),
            c_proj: Linear::new(config.n_embd, config.n_embd, config.bias, seed + 0.111),
            n_head: config.n_head,
            n_embd: config.n_embd,
        }
    }

    fn forward(&self, x: &[f32], seq_len: usize) -> Vec<f32> {
        let e = self.n_embd;
        let hd = e / self.n_head;
        // (seq_len, 3E): q at offset 0, k at E, v at 2E
        let qkv = self.c_attn.forward(x, seq_len);

        let mut concat = vec![0.0; seq_len * e];
        let mut scores = Vec::with_capacity(seq_len);

        for h in 0..self.n_head {
            let ho = h * hd;
            for t in 0..seq_len {
                let q = &qkv[t * 3 * e + ho..t * 3 * e + ho + hd];

                scores.clear();
                for s in 0..=t {
                    let k = &qkv[s * 3 * e + e + ho..s * 3 * e + e + ho + hd];
                    let dot: f32 = q.iter().zip(k).map(|(a, b)| a * b).sum();
                    scores.push(dot / (hd as f32).sqrt());
                }
                softmax_in_place(&mut scores);

                for d in 0..hd {
                    let mut acc = 0.0;
                    for (s, w) in scores.iter().enumerate() {
                        acc += w * qkv[s * 3 * e + 2 * e + ho + d];
                    }
                    concat[t * e + ho + d] = acc;
                }
            }
        }

        self.c_proj.forward(&concat, seq_len)
    }
}

/// Position-wise feed-forward network with GELU.
pub struct Mlp {
    pub c_fc: Linear,
    pub c_proj: Linear,
}

impl Mlp {
    fn new(config: &GptConfig, seed: f32) -> Self {
        Self {
            c_fc: Linear::new(config.n_embd, 4 * config.n_embd, config.bias, seed),
            c_proj: Linear::new(4 * config.n_embd, config.n_embd, config.bias, seed + 0.111),
        }
    }

    fn forward(&self, x: &[f32], seq_len: usize) -> Vec<f32> {
        let mut hidden = self.c_fc.forward(x, seq_len);
        for v in hidden.iter_mut() {
            *v = gelu(*v);
        }
        self.c_proj.forward(&hidden, seq_len)
    }
}

/// One pre-norm transformer block.
pub struct Block {
    pub ln_1: LayerNorm,
    pub attn: CausalSelfAttention,
    pub ln_2: LayerNorm,
    pub mlp: Mlp,
}

impl Block {
    fn new(config: &GptConfig, layer_idx: usize) -> Self {
        let seed = 0.123 + 0.531 * layer_idx as f32;
        Self {
            ln_1: LayerNorm::new(config.n_embd, config.bias),
            attn: CausalSelfAttention::new(config, seed),
            ln_2: LayerNorm::new(config.n_embd, config.bias),
            mlp: Mlp::new(config, seed + 0.257),
        }
    }

    fn forward(&self, x: &[f32], seq_len: usize, n_embd: usize) -> Vec<f32> {
        let norm1 = self.ln_1.forward_batched(x, seq_len, n_embd);
        let attn_out = self.attn.forward(&norm1, seq_len);
        let residual1: Vec<f32> = x.iter().zip(&attn_out).map(|(a, b)| a + b).collect();

        let norm2 = self.ln_2.forward_batched(&residual1, seq_len, n_embd);
        let mlp_out = self.mlp.forward(&norm2, seq_len);
        residual1.iter().zip(&mlp_out).map(|(a, b)| a + b).collect()
    }
}

/// The complete GPT model.
pub struct Gpt {
    pub config: GptConfig,
    pub wte: Embedding,
    pub wpe: Embedding,
    pub blocks: Vec<Block>,
    pub ln_f: LayerNorm,
    /// Language-model head; weight tied to `wte` (shared storage).
    pub lm_head: Linear,
}

impl Gpt {
    /// Create a new model with deterministic initial weights.
    pub fn new(config: &GptConfig) -> Self {
        let wte = Embedding::new(config.vocab_size, config.n_embd, 0.111);
        let wpe = Embedding::new(config.block_size, config.n_embd, 0.222);
        let blocks = (0..config.n_layer)
            .map(|i| Block::new(config, i))
            .collect();
        let ln_f = LayerNorm::new(config.n_embd, config.bias);
        // https://paperswithcode.com/method/weight-tying
        let lm_head = Linear::tied(wte.weight.clone(), config.n_embd, config.vocab_size);

        Self {
            config: config.clone(),
            wte,
            wpe,
            blocks,
            ln_f,
            lm_head,
        }
    }

    /// Forward pass.
    ///
    /// Returns `(seq_len, vocab_size)` logits as a flat tensor, plus the
    /// mean cross-entropy loss when `targets` are supplied (positions with
    /// negative targets are ignored).
    ///
    /// # Panics
    ///
    /// Panics if the sequence exceeds the configured block size.
    pub fn forward(&self, tokens: &[u32], targets: Option<&[i32]>) -> (Tensor, Option<f32>) {
        let seq_len = tokens.len();
        assert!(
            seq_len <= self.config.block_size,
            "cannot forward sequence of length {seq_len}, block size is only {}",
            self.config.block_size
        );

        let ids: Vec<usize> = tokens.iter().map(|&t| t as usize).collect();
        let positions: Vec<usize> = (0..seq_len).collect();

        let tok_emb = self.wte.forward(&ids);
        let pos_emb = self.wpe.forward(&positions);
        let mut x: Vec<f32> = tok_emb.iter().zip(&pos_emb).map(|(a, b)| a + b).collect();

        for block in &self.blocks {
            x = block.forward(&x, seq_len, self.config.n_embd);
        }
        let x = self.ln_f.forward_batched(&x, seq_len, self.config.n_embd);

        let logits = self.lm_head.forward(&x, seq_len);
        let loss =
            targets.and_then(|t| cross_entropy(&logits, t, seq_len, self.config.vocab_size));

        (Tensor::from_vec(logits, false), loss)
    }

    /// Enumerate every underlying parameter exactly once, in stable order.
    ///
    /// Names follow the original GPT-2 convention
    /// (`transformer.h.{i}.attn.c_attn.weight`, ...). The tied lm head is
    /// not re-listed; its storage is `transformer.wte.weight`.
    pub fn named_parameters(&self) -> Vec<NamedParameter> {
        let e = self.config.n_embd;
        let mut ps = Vec::new();

        push(
            &mut ps,
            "transformer.wte.weight",
            &self.wte.weight,
            vec![self.config.vocab_size, e],
        );
        push(
            &mut ps,
            "transformer.wpe.weight",
            &self.wpe.weight,
            vec![self.config.block_size, e],
        );

        for (i, block) in self.blocks.iter().enumerate() {
            push_norm(&mut ps, &format!("transformer.h.{i}.ln_1"), &block.ln_1, e);
            push_linear(
                &mut ps,
                &format!("transformer.h.{i}.attn.c_attn"),
                &block.attn.c_attn,
            );
            push_linear(
                &mut ps,
                &format!("transformer.h.{i}.attn.c_proj"),
                &block.attn.c_proj,
            );
            push_norm(&mut ps, &format!("transformer.h.{i}.ln_2"), &block.ln_2, e);
            push_linear(
                &mut ps,
                &format!("transformer.h.{i}.mlp.c_fc"),
                &block.mlp.c_fc,
            );
            push_linear(
                &mut ps,
                &format!("transformer.h.{i}.mlp.c_proj"),
                &block.mlp.c_proj,
            );
        }

        push_norm(&mut ps, "transformer.ln_f", &self.ln_f, e);
        ps
    }

    /// Named mutable access to every `Linear` except the lm head — the
    /// layers the checkpoint adapter compacts on import.
    pub fn linear_layers_mut(&mut self) -> Vec<(String, &mut Linear)> {
        let mut out = Vec::new();
        for (i, block) in self.blocks.iter_mut().enumerate() {
            out.push((
                format!("transformer.h.{i}.attn.c_attn"),
                &mut block.attn.c_attn,
            ));
            out.push((
                format!("transformer.h.{i}.attn.c_proj"),
                &mut block.attn.c_proj,
            ));
            out.push((format!("transformer.h.{i}.mlp.c_fc"), &mut block.mlp.c_fc));
            out.push((
                format!("transformer.h.{i}.mlp.c_proj"),
                &mut block.mlp.c_proj,
            ));
        }
        out
    }

    /// Copy parameter values from a name-keyed map, checking every shape.
    ///
    /// This is the crate's opaque "pretrained-weight copy" operation: it
    /// never reshapes, and a single mismatch aborts the whole load.
    pub fn load_parameters(&mut self, tensors: &BTreeMap<String, TensorEntry>) -> Result<()> {
        for np in self.named_parameters() {
            let entry = tensors
                .get(&np.name)
                .ok_or_else(|| Error::MissingEntry(np.name.clone()))?;
            if entry.shape != np.shape {
                return Err(Error::ShapeMismatch {
                    name: np.name,
                    expected: np.shape,
                    actual: entry.shape.clone(),
                });
            }
            *np.tensor.data_mut() = ndarray::Array1::from(entry.data.clone());
        }
        Ok(())
    }

    /// Number of parameters. The position embeddings are excluded from the
    /// default count; the token embeddings stay, since weight tying reuses
    /// them as the output layer.
    pub fn num_params(&self, non_embedding: bool) -> usize {
        let mut n: usize = self.named_parameters().iter().map(NamedParameter::elems).sum();
        if non_embedding {
            n -= self.wpe.weight.len();
        }
        n
    }

    /// Autoregressively sample `max_new_tokens` continuations of `prompt`.
    pub fn generate<R: rand::Rng>(
        &self,
        prompt: &[u32],
        max_new_tokens: usize,
        temperature: f32,
        top_k: Option<usize>,
        rng: &mut R,
    ) -> Vec<u32> {
        let vocab = self.config.vocab_size;
        let mut ids = prompt.to_vec();

        for _ in 0..max_new_tokens {
            let start = ids.len().saturating_sub(self.config.block_size);
            let ctx = &ids[start..];
            let (logits, _) = self.forward(ctx, None);
            let logits = logits.to_vec();

            let mut last: Vec<f32> = logits[(ctx.len() - 1) * vocab..].to_vec();
            for l in last.iter_mut() {
                *l /= temperature;
            }
            if let Some(k) = top_k {
                let mut sorted = last.clone();
                sorted.sort_by(|a, b| b.total_cmp(a));
                let cutoff = sorted[k.min(vocab) - 1];
                for l in last.iter_mut() {
                    if *l < cutoff {
                        *l = f32::NEG_INFINITY;
                    }
                }
            }
            softmax_in_place(&mut last);

            let u: f32 = rng.gen();
            let mut acc = 0.0;
            let mut next = vocab - 1;
            for (i, p) in last.iter().enumerate() {
                acc += p;
                if u < acc {
                    next = i;
                    break;
                }
            }
            ids.push(next as u32);
        }
        ids
    }
}

fn push(ps: &mut Vec<NamedParameter>, name: &str, tensor: &Tensor, shape: Vec<usize>) {
    ps.push(NamedParameter {
        name: name.to_string(),
        tensor: tensor.clone(),
        shape,
    });
}

fn push_norm(ps: &mut Vec<NamedParameter>, prefix: &str, norm: &LayerNorm, ndim: usize) {
    push(ps, &format!("{prefix}.weight"), &norm.weight, vec![ndim]);
    if let Some(bias) = &norm.bias {
        push(ps, &format!("{prefix}.bias"), bias, vec![ndim]);
    }
}

fn push_linear(ps: &mut Vec<NamedParameter>, prefix: &str, lin: &Linear) {
    push(
        ps,
        &format!("{prefix}.weight"),
        &lin.weight,
        vec![lin.out_features(), lin.in_width()],
    );
    if let Some(bias) = &lin.bias {
        push(ps, &format!("{prefix}.bias"), bias, vec![lin.out_features()]);
    }
}

fn cross_entropy(logits: &[f32], targets: &[i32], seq_len: usize, vocab: usize) -> Option<f32> {
    let mut total = 0.0;
    let mut n = 0usize;
    for t in 0..seq_len {
        let target = targets[t];
        if target < 0 {
            continue;
        }
        let row = &logits[t * vocab..(t + 1) * vocab];
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let lse = max + row.iter().map(|l| (l - max).exp()).sum::<f32>().ln();
        total += lse - row[target as usize];
        n += 1;
    }
    (n > 0).then(|| total / n as f32)
}
