use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Hyper-parameters shared by every component of the transformer.
///
/// The same `n_layers` is used for the encoder and the decoder stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformerConfig {
    pub d_model: usize,
    pub n_heads: usize,
    pub n_layers: usize,
    pub d_ff: usize,
    /// Dropout probability used in training mode; inference ignores it.
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    pub max_seq_len: usize,
    pub src_vocab_size: usize,
    pub tgt_vocab_size: usize,
    /// Reuse the target embedding table as the output projection weight.
    #[serde(default)]
    pub share_target_embeddings: bool,
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f64,
}

fn default_dropout() -> f32 {
    0.1
}

fn default_norm_eps() -> f64 {
    1e-5
}

impl TransformerConfig {
    /// The base configuration (`d_model = 512`, 8 heads, 6 layers) for the given vocabularies.
    pub fn base(src_vocab_size: usize, tgt_vocab_size: usize) -> Self {
        Self {
            d_model: 512,
            n_heads: 8,
            n_layers: 6,
            d_ff: 2048,
            dropout: default_dropout(),
            max_seq_len: 512,
            src_vocab_size,
            tgt_vocab_size,
            share_target_embeddings: false,
            norm_eps: default_norm_eps(),
        }
    }

    /// Reads a TOML or JSON file (chosen by extension) and validates it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: TransformerConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(ModelError::ConfigFormat(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every invariant and reports all violations at once.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut errors = Vec::new();

        for (name, value) in [
            ("d_model", self.d_model),
            ("n_heads", self.n_heads),
            ("n_layers", self.n_layers),
            ("d_ff", self.d_ff),
            ("max_seq_len", self.max_seq_len),
            ("src_vocab_size", self.src_vocab_size),
            ("tgt_vocab_size", self.tgt_vocab_size),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }
        if self.n_heads > 0 && self.d_model % self.n_heads != 0 {
            errors.push(format!(
                "d_model ({}) must be divisible by n_heads ({})",
                self.d_model, self.n_heads
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            errors.push(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        if !(self.norm_eps.is_finite() && self.norm_eps > 0.0) {
            errors.push(format!("norm_eps must be positive, got {}", self.norm_eps));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::InvalidConfig(errors))
        }
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }
}

/// Reserved token ids agreed with the tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecialTokens {
    pub pad: u32,
    pub start: u32,
    pub end: u32,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            pad: 0,
            start: 1,
            end: 2,
        }
    }
}

impl SpecialTokens {
    /// Ids must fit the target vocabulary; start and end must differ from each other and from pad.
    pub fn validate(&self, config: &TransformerConfig) -> Result<(), ModelError> {
        let mut errors = Vec::new();
        for (name, id) in [("pad", self.pad), ("start", self.start), ("end", self.end)] {
            if id as usize >= config.tgt_vocab_size {
                errors.push(format!(
                    "{name} token {id} is outside the target vocabulary ({})",
                    config.tgt_vocab_size
                ));
            }
        }
        if self.start == self.end {
            errors.push("start and end tokens must differ".to_string());
        }
        if self.pad == self.start || self.pad == self.end {
            errors.push("pad token must differ from start and end".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::InvalidConfig(errors))
        }
    }
}
