//! Layer normalisation over the last axis.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Statistics are taken
//! per position, then the learned scale and shift are applied.

use candle_core::{Result, Tensor, D};

use crate::{checks, Init, LayerError, WeightScope};

/// Configuration for [`LayerNorm`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser added to the variance.
    pub epsilon: f64,
}

impl NormConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }
}

/// Standard LayerNorm with learnable scale and bias.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    pub fn new(weight: Tensor, bias: Tensor, config: NormConfig) -> Result<Self> {
        checks::expect_shape("norm.weight", &weight, &[config.hidden_size])?;
        checks::expect_shape("norm.bias", &bias, &[config.hidden_size])?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Reads `weight` (initialised to ones) and `bias` (zeros) from `scope`.
    pub fn load(config: NormConfig, scope: &mut WeightScope<'_>) -> std::result::Result<Self, LayerError> {
        let weight = scope.fetch("weight", &[config.hidden_size], &Init::Ones)?;
        let bias = scope.fetch("bias", &[config.hidden_size], &Init::Zeros)?;
        Ok(Self::new(weight, bias, config)?)
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let mean = (hidden.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centered = hidden.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        centered
            .broadcast_div(&denom)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}
