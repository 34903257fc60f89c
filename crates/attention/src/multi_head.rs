//! Multi-head attention over `(batch, seq, d_model)` activations.
//!
//! Queries, keys and values get their own learned projection, are split into
//! `num_heads` subspaces of `d_model / num_heads`, attended independently by
//! [`ScaledDotProductAttention`] and merged back through `out_proj`.

use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::Tensor;
use layers::{checks, Init, Linear, LinearConfig, WeightScope};

use crate::core::{Attention, AttentionError, AttentionOutput, Config};
use crate::scaled_dot_product::ScaledDotProductAttention;

#[derive(Debug, Clone, PartialEq)]
pub struct MultiHeadAttentionConfig {
    pub d_model: usize,
    pub num_heads: usize,
    /// Dropout on the attention weights while training.
    pub dropout: f32,
}

impl MultiHeadAttentionConfig {
    pub fn new(d_model: usize, num_heads: usize) -> Self {
        Self {
            d_model,
            num_heads,
            dropout: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.num_heads == 0 || self.d_model == 0 {
            return Err(AttentionError::InvalidConfig {
                message: format!(
                    "d_model ({}) and num_heads ({}) must be positive",
                    self.d_model, self.num_heads
                ),
            });
        }
        if self.d_model % self.num_heads != 0 {
            return Err(AttentionError::InvalidConfig {
                message: format!(
                    "d_model ({}) must be divisible by num_heads ({})",
                    self.d_model, self.num_heads
                ),
            });
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(AttentionError::InvalidConfig {
                message: format!("dropout must be in [0, 1), got {}", self.dropout),
            });
        }
        Ok(())
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.num_heads
    }
}

#[derive(Debug)]
pub struct MultiHeadAttention {
    config: MultiHeadAttentionConfig,
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    kernel: ScaledDotProductAttention,
    training: AtomicBool,
}

impl Clone for MultiHeadAttention {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            q_proj: self.q_proj.clone(),
            k_proj: self.k_proj.clone(),
            v_proj: self.v_proj.clone(),
            out_proj: self.out_proj.clone(),
            kernel: self.kernel.clone(),
            training: AtomicBool::new(self.training.load(Ordering::Relaxed)),
        }
    }
}

impl MultiHeadAttention {
    /// Validates `config` and reads `{q,k,v,out}_proj.{weight,bias}` from `scope`.
    pub fn load(
        config: MultiHeadAttentionConfig,
        scope: &mut WeightScope<'_>,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let d_model = config.d_model;
        let mut projection = |name: &str| {
            Linear::load(
                LinearConfig::new(d_model, d_model),
                &mut scope.pp(name),
                &Init::XavierUniform,
            )
        };
        let q_proj = projection("q_proj")?;
        let k_proj = projection("k_proj")?;
        let v_proj = projection("v_proj")?;
        let out_proj = projection("out_proj")?;
        Ok(Self {
            config,
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            kernel: ScaledDotProductAttention::new(),
            training: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MultiHeadAttentionConfig {
        &self.config
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    /// `(batch, seq, d_model)` to `(batch, heads, seq, head_dim)`.
    fn split_heads(&self, hidden: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, seq, _) = hidden.dims3()?;
        hidden
            .reshape((batch, seq, self.config.num_heads, self.config.head_dim()))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// Attends `query` `(batch, q_len, d_model)` over `key_value`
    /// `(batch, k_len, d_model)`.
    ///
    /// Self-attention passes the same tensor twice; cross-attention passes the
    /// encoder memory as `key_value`. The returned weights are per head.
    pub fn forward(
        &self,
        query: &Tensor,
        key_value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<AttentionOutput, AttentionError> {
        let shape_error = |err: candle_core::Error| AttentionError::InvalidShape {
            context: err.to_string(),
        };
        checks::expect_batch_seq_hidden("attention.query", query, self.config.d_model)
            .map_err(shape_error)?;
        checks::expect_same_batch("attention.key_value", query, key_value).map_err(shape_error)?;

        let q = self.split_heads(&self.q_proj.forward(query)?)?;
        let k = self.split_heads(&self.k_proj.forward(key_value)?)?;
        let v = self.split_heads(&self.v_proj.forward(key_value)?)?;

        let config = Config {
            dropout_p: Some(self.config.dropout),
            training: self.training.load(Ordering::Relaxed),
        };
        let attended = self.kernel.attend(&q, &k, &v, mask, &config)?;

        let (batch, q_len, _) = query.dims3()?;
        let merged = attended
            .output
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, q_len, self.config.d_model))?;
        Ok(AttentionOutput {
            output: self.out_proj.forward(&merged)?,
            weights: attended.weights,
        })
    }
}
