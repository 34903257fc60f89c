//! Fixed sinusoidal positional encoding.
//!
//! Even columns hold `sin(pos / 10000^(2i/d))`, odd columns the matching
//! cosine. With an odd hidden size the last column is a sine without partner.

use candle_core::{Error, Result, Tensor};
use layers::{checks, Dropout};

/// Configuration for [`PositionalEncoding`].
#[derive(Debug, Clone, PartialEq)]
pub struct PositionalEncodingConfig {
    pub hidden_dim: usize,
    /// Number of precomputed positions.
    pub max_seq_len: usize,
    /// Dropout applied after the addition in training mode.
    pub dropout: f32,
}

#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    config: PositionalEncodingConfig,
    table: Tensor,
    dropout: Dropout,
}

impl PositionalEncoding {
    pub fn new(config: PositionalEncodingConfig, device: &candle_core::Device, seed: u64) -> Result<Self> {
        if config.hidden_dim == 0 || config.max_seq_len == 0 {
            return Err(Error::Msg(format!(
                "positional encoding needs positive sizes, got hidden={} max_seq_len={}",
                config.hidden_dim, config.max_seq_len
            )));
        }
        let table = sinusoid_table(config.max_seq_len, config.hidden_dim, device)?;
        let dropout = Dropout::new(config.dropout, seed);
        Ok(Self {
            config,
            table,
            dropout,
        })
    }

    pub fn config(&self) -> &PositionalEncodingConfig {
        &self.config
    }

    /// The `(max_seq_len, hidden_dim)` table.
    pub fn table(&self) -> &Tensor {
        &self.table
    }

    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    /// Adds the encodings for positions `0..seq` to `(batch, seq, hidden)` input.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("positional.input", hidden, self.config.hidden_dim)?;
        let (_, seq, _) = hidden.dims3()?;
        if seq > self.config.max_seq_len {
            return Err(Error::Msg(format!(
                "sequence length {seq} exceeds max_seq_len {}",
                self.config.max_seq_len
            )));
        }
        let positions = self.table.narrow(0, 0, seq)?;
        let encoded = hidden.broadcast_add(&positions)?;
        self.dropout.forward(&encoded)
    }
}

fn sinusoid_table(max_len: usize, hidden: usize, device: &candle_core::Device) -> Result<Tensor> {
    let inv_freq: Vec<f64> = (0..hidden.div_ceil(2))
        .map(|i| 10000f64.powf(-((2 * i) as f64) / hidden as f64))
        .collect();

    let mut data = Vec::with_capacity(max_len * hidden);
    for pos in 0..max_len {
        for col in 0..hidden {
            let angle = pos as f64 * inv_freq[col / 2];
            let value = if col % 2 == 0 { angle.sin() } else { angle.cos() };
            data.push(value as f32);
        }
    }
    Tensor::from_vec(data, (max_len, hidden), device)
}
