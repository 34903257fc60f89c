//! Position-wise feed-forward block.
//!
//! Hidden states shaped `(batch, seq, hidden)` are expanded to
//! `intermediate_size`, passed through ReLU, dropped out during training and
//! contracted back. Positions never interact.

use candle_core::{Result, Tensor};

use crate::{checks, Dropout, Init, LayerError, Linear, LinearConfig, WeightScope};

/// Configuration for [`FeedForward`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Dropout applied between the two projections in training mode.
    pub dropout: f32,
}

impl FeedForwardConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            dropout: 0.0,
        }
    }
}

/// `w2(dropout(relu(w1 x)))`.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    w1: Linear,
    w2: Linear,
    dropout: Dropout,
}

impl FeedForward {
    /// Reads `w1` and `w2` from `scope`; `seed` drives the dropout mask.
    pub fn load(
        config: FeedForwardConfig,
        scope: &mut WeightScope<'_>,
        seed: u64,
    ) -> std::result::Result<Self, LayerError> {
        if config.hidden_size == 0 || config.intermediate_size == 0 {
            return Err(LayerError::config(format!(
                "feed-forward dimensions must be positive, got hidden={} intermediate={}",
                config.hidden_size, config.intermediate_size
            )));
        }
        let w1 = Linear::load(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            &mut scope.pp("w1"),
            &Init::XavierUniform,
        )?;
        let w2 = Linear::load(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            &mut scope.pp("w2"),
            &Init::XavierUniform,
        )?;
        let dropout = Dropout::new(config.dropout, seed);
        Ok(Self {
            config,
            w1,
            w2,
            dropout,
        })
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("feed_forward.input", hidden, self.config.hidden_size)?;
        let expanded = self.w1.forward(hidden)?.relu()?;
        let expanded = self.dropout.forward(&expanded)?;
        self.w2.forward(&expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WeightMap;
    use candle_core::{DType, Device};

    #[test]
    fn forward_keeps_layout_and_names_parameters() -> std::result::Result<(), LayerError> {
        let mut map = WeightMap::initialize(&Device::Cpu);
        let ff = FeedForward::load(FeedForwardConfig::new(8, 32), &mut map.scope("ff"), 0)?;
        assert_eq!(
            map.names(),
            vec!["ff.w1.bias", "ff.w1.weight", "ff.w2.bias", "ff.w2.weight"]
        );
        let input = Tensor::randn(0f32, 1.0, (2, 5, 8), &Device::Cpu)?;
        assert_eq!(ff.forward(&input)?.dims(), &[2, 5, 8]);
        Ok(())
    }

    #[test]
    fn positions_are_processed_independently() -> std::result::Result<(), LayerError> {
        let mut map = WeightMap::initialize(&Device::Cpu);
        let ff = FeedForward::load(FeedForwardConfig::new(4, 6), &mut map.scope("ff"), 0)?;
        let input = Tensor::randn(0f32, 1.0, (1, 3, 4), &Device::Cpu)?;
        let full = ff.forward(&input)?;
        let single = ff.forward(&input.narrow(1, 1, 1)?)?;
        let diff = full
            .narrow(1, 1, 1)?
            .sub(&single)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn relu_clips_negative_pre_activations() -> std::result::Result<(), LayerError> {
        let device = Device::Cpu;
        let mut map = WeightMap::initialize(&device);
        map.insert("ff.w1.weight", Tensor::from_vec(vec![1.0f32, -1.0], (2, 1), &device)?);
        map.insert("ff.w2.weight", Tensor::ones((1, 2), DType::F32, &device)?);
        let ff = FeedForward::load(FeedForwardConfig::new(1, 2), &mut map.scope("ff"), 0)?;

        let input = Tensor::from_vec(vec![3.0f32], (1, 1, 1), &device)?;
        let out = ff.forward(&input)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(out, vec![3.0]);
        Ok(())
    }
}
