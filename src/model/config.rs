//! GPT model configuration

use serde::{Deserialize, Serialize};

/// Configuration for the GPT-style base model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GptConfig {
    /// Maximum sequence length.
    pub block_size: usize,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Number of transformer blocks.
    pub n_layer: usize,
    /// Number of attention heads.
    pub n_head: usize,
    /// Embedding (hidden) dimension.
    pub n_embd: usize,
    /// Whether linear layers and layer norms carry a bias, like GPT-2.
    pub bias: bool,
}

impl GptConfig {
    /// GPT-2 124M configuration.
    pub fn gpt2() -> Self {
        Self {
            block_size: 1024,
            vocab_size: 50257,
            n_layer: 12,
            n_head: 12,
            n_embd: 768,
            bias: true,
        }
    }

    /// GPT-2 medium (350M) configuration.
    pub fn gpt2_medium() -> Self {
        Self {
            n_layer: 24,
            n_head: 16,
            n_embd: 1024,
            ..Self::gpt2()
        }
    }

    /// GPT-2 large (774M) configuration.
    pub fn gpt2_large() -> Self {
        Self {
            n_layer: 36,
            n_head: 20,
            n_embd: 1280,
            ..Self::gpt2()
        }
    }

    /// GPT-2 XL (1558M) configuration.
    pub fn gpt2_xl() -> Self {
        Self {
            n_layer: 48,
            n_head: 25,
            n_embd: 1600,
            ..Self::gpt2()
        }
    }

    /// Tiny configuration for testing.
    pub fn tiny() -> Self {
        Self {
            block_size: 16,
            vocab_size: 64,
            n_layer: 2,
            n_head: 2,
            n_embd: 8,
            bias: true,
        }
    }

    /// Per-head dimension.
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.vocab_size == 0 {
            return Err("vocab_size must be non-zero".to_string());
        }
        if self.block_size == 0 {
            return Err("block_size must be non-zero".to_string());
        }
        if self.n_head == 0 || self.n_embd % self.n_head != 0 {
            return Err(format!(
                "n_embd ({}) must be divisible by n_head ({})",
                self.n_embd, self.n_head
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpt2_presets() {
        let config = GptConfig::gpt2();
        assert_eq!(config.n_embd, 768);
        assert_eq!(config.head_dim(), 64);

        let medium = GptConfig::gpt2_medium();
        assert_eq!(medium.n_layer, 24);
        assert_eq!(medium.vocab_size, 50257);
        assert_eq!(medium.block_size, 1024);

        let xl = GptConfig::gpt2_xl();
        assert_eq!(xl.n_embd, 1600);
        assert_eq!(xl.head_dim(), 64);
    }

    #[test]
    fn test_tiny_is_valid() {
        let config = GptConfig::tiny();
        assert!(config.validate().is_ok());
        assert_eq!(config.head_dim(), 4);
    }

    #[test]
    fn test_validate_rejects_indivisible_heads() {
        let config = GptConfig {
            n_head: 3,
            ..GptConfig::tiny()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = GptConfig::gpt2_large();
        let json = serde_json::to_string(&config).unwrap();
        let restored: GptConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);

        let yaml = serde_yaml::to_string(&config).unwrap();
        let restored: GptConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored, config);
    }
}
