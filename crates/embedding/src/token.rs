//! Token embedding table.

use std::sync::Arc;

use candle_core::{bail, DType, Error, Result, Tensor};
use layers::{Init, LayerError, WeightScope};

/// Configuration for building a token embedding table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
}

/// Lookup table whose rows are scaled by `sqrt(hidden_dim)` on the way out.
///
/// The table sits behind an [`Arc`] so an output projection can reuse it as
/// its weight matrix.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Arc<Tensor>,
    scale: f64,
}

impl TokenEmbedding {
    /// Wraps an existing `(vocab_size, hidden_dim)` table.
    pub fn new(weight: Tensor) -> Result<Self> {
        let (vocab_size, hidden_dim) = weight.dims2()?;
        if vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }
        Ok(Self {
            config: TokenEmbeddingConfig {
                vocab_size,
                hidden_dim,
            },
            weight: Arc::new(weight),
            scale: (hidden_dim as f64).sqrt(),
        })
    }

    /// Reads `weight` from `scope`, sampling `N(0, hidden_dim^-1/2)` when initialising.
    pub fn load(
        config: TokenEmbeddingConfig,
        scope: &mut WeightScope<'_>,
    ) -> std::result::Result<Self, LayerError> {
        if config.vocab_size == 0 || config.hidden_dim == 0 {
            return Err(LayerError::config(format!(
                "token embedding needs positive sizes, got vocab={} hidden={}",
                config.vocab_size, config.hidden_dim
            )));
        }
        let std = (config.hidden_dim as f64).powf(-0.5);
        let weight = scope.fetch(
            "weight",
            &[config.vocab_size, config.hidden_dim],
            &Init::Normal { std },
        )?;
        Ok(Self::new(weight)?)
    }

    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// Shared handle to the `(vocab_size, hidden_dim)` table.
    pub fn weight(&self) -> &Arc<Tensor> {
        &self.weight
    }

    /// Looks up embeddings for `(batch, seq)` integer ids.
    ///
    /// Returns `(batch, seq, hidden)` multiplied by `sqrt(hidden)`. Ids outside
    /// the vocabulary surface as the backend's indexing error.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq) = match token_ids.dims() {
            [batch, seq] if *batch > 0 && *seq > 0 => (*batch, *seq),
            [_, _] => {
                return Err(Error::Msg(
                    "token_ids must have non-zero batch and seq dimensions".into(),
                ))
            }
            _ => return Err(Error::Msg("token_ids must be shaped [batch, seq]".into())),
        };
        if !token_ids.dtype().is_int() {
            bail!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            );
        }

        let flat = token_ids.flatten_all()?;
        let flat = if flat.dtype() == DType::U8 {
            flat.to_dtype(DType::U32)?
        } else {
            flat
        };
        let gathered = self.weight.index_select(&flat, 0)?;
        gathered
            .reshape((batch, seq, self.config.hidden_dim))?
            .affine(self.scale, 0.0)
    }
}
