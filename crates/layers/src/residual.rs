//! Pre-norm residual wrapper used around every sublayer.
//!
//! `x + dropout(sublayer(norm(x)))`: the residual path itself is never
//! normalised, so each block sees the raw stream and adds its contribution.

use candle_core::{Result, Tensor};

use crate::{checks, Dropout, LayerError, LayerNorm, NormConfig, WeightScope};

#[derive(Debug, Clone)]
pub struct PreNormResidual {
    norm: LayerNorm,
    dropout: Dropout,
}

impl PreNormResidual {
    /// Loads the norm found under `scope` and seeds the branch dropout.
    pub fn load(
        config: NormConfig,
        dropout: f32,
        scope: &mut WeightScope<'_>,
        seed: u64,
    ) -> std::result::Result<Self, LayerError> {
        let norm = LayerNorm::load(config, scope)?;
        Ok(Self {
            norm,
            dropout: Dropout::new(dropout, seed),
        })
    }

    pub fn norm(&self) -> &LayerNorm {
        &self.norm
    }

    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    /// Runs `sublayer` on the normalised input and adds the result back onto `hidden`.
    pub fn forward<F>(&self, hidden: &Tensor, sublayer: F) -> Result<Tensor>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
    {
        let normed = self.normalize(hidden)?;
        let branch = sublayer(&normed)?;
        self.add_branch(hidden, &branch)
    }

    /// First half of [`forward`](Self::forward), for sublayers whose errors
    /// are not `candle_core::Error`.
    pub fn normalize(&self, hidden: &Tensor) -> Result<Tensor> {
        self.norm.forward(hidden)
    }

    /// Second half of [`forward`](Self::forward): dropout on `branch`, then the skip addition.
    pub fn add_branch(&self, hidden: &Tensor, branch: &Tensor) -> Result<Tensor> {
        checks::expect_shape("residual.branch", branch, hidden.dims())?;
        let branch = self.dropout.forward(branch)?;
        hidden.add(&branch)
    }
}
