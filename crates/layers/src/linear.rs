//! Dense affine projections.
//!
//! Linear layers accept `(batch, seq, in_dim)` or `(rows, in_dim)` inputs and
//! store their weight as `(out_dim, in_dim)`. Parameters live behind [`Arc`] so
//! that a projection can share its matrix with another module (the output
//! generator reusing the target embedding table) without copying.

use std::sync::Arc;

use candle_core::{Error, Result, Tensor};

use crate::{checks, Init, LayerError, WeightScope};

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector is applied.
    pub bias: bool,
}

impl LinearConfig {
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    pub fn without_bias(mut self) -> Self {
        self.bias = false;
        self
    }
}

/// Dense affine projection `x W^T + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Arc<Tensor>,
    bias: Option<Arc<Tensor>>,
}

impl Linear {
    /// Wraps pre-existing parameters after checking them against `config`.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight: Arc::new(weight),
            bias: bias.map(Arc::new),
        })
    }

    /// Reads `weight` (and `bias` when enabled) from `scope`.
    pub fn load(
        config: LinearConfig,
        scope: &mut WeightScope<'_>,
        init: &Init,
    ) -> std::result::Result<Self, LayerError> {
        let weight = scope.fetch("weight", &[config.output_dim, config.input_dim], init)?;
        let bias = if config.bias {
            Some(scope.fetch("bias", &[config.output_dim], &Init::Zeros)?)
        } else {
            None
        };
        Ok(Self::new(config, weight, bias)?)
    }

    /// Builds a projection whose weight is `shared`; only the bias is read from `scope`.
    pub fn tied(
        config: LinearConfig,
        shared: Arc<Tensor>,
        scope: &mut WeightScope<'_>,
    ) -> std::result::Result<Self, LayerError> {
        let expected = [config.output_dim, config.input_dim];
        if shared.dims() != expected {
            return Err(LayerError::ShapeMismatch {
                name: scope.path("weight"),
                expected: expected.to_vec(),
                actual: shared.dims().to_vec(),
            });
        }
        let bias = if config.bias {
            let bias = scope.fetch("bias", &[config.output_dim], &Init::Zeros)?;
            Some(Arc::new(bias))
        } else {
            None
        };
        Ok(Self {
            config,
            weight: shared,
            bias,
        })
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Shared handle to the `(out_dim, in_dim)` weight.
    pub fn weight(&self) -> &Arc<Tensor> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_deref()
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => checks::expect_shape("linear.bias", tensor, &[config.output_dim]),
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let weight_t = self.weight.t()?;
        let mut output = match hidden.dims() {
            [batch, seq, hidden_dim] if *hidden_dim == self.config.input_dim => {
                let flat = hidden.reshape((*batch * *seq, self.config.input_dim))?;
                flat.matmul(&weight_t)?
                    .reshape((*batch, *seq, self.config.output_dim))?
            }
            [_, hidden_dim] if *hidden_dim == self.config.input_dim => hidden.matmul(&weight_t)?,
            dims => {
                return Err(Error::Msg(format!(
                    "linear expects input shaped [B, T, {in_dim}] or [T, {in_dim}], got {dims:?}",
                    in_dim = self.config.input_dim
                )))
            }
        };
        if let Some(bias) = &self.bias {
            output = output.broadcast_add(bias.as_ref())?;
        }
        Ok(output)
    }
}
