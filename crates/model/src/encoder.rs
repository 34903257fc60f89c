use attention::{MultiHeadAttention, MultiHeadAttentionConfig};
use candle_core::Tensor;
use layers::{FeedForward, FeedForwardConfig, LayerNorm, NormConfig, PreNormResidual, WeightScope};

use crate::{config::TransformerConfig, ModelError};

pub(crate) fn attention_config(config: &TransformerConfig) -> MultiHeadAttentionConfig {
    MultiHeadAttentionConfig {
        d_model: config.d_model,
        num_heads: config.n_heads,
        dropout: config.dropout,
    }
}

pub(crate) fn feed_forward_config(config: &TransformerConfig) -> FeedForwardConfig {
    FeedForwardConfig {
        hidden_size: config.d_model,
        intermediate_size: config.d_ff,
        dropout: config.dropout,
    }
}

pub(crate) fn norm_config(config: &TransformerConfig) -> NormConfig {
    NormConfig::new(config.d_model).with_epsilon(config.norm_eps)
}

/// Pre-norm encoder layer: self-attention then feed-forward, each wrapped in
/// a residual connection.
#[derive(Debug, Clone)]
pub struct EncoderLayer {
    self_attn: MultiHeadAttention,
    self_attn_residual: PreNormResidual,
    feed_forward: FeedForward,
    ff_residual: PreNormResidual,
}

impl EncoderLayer {
    /// Reads the layer found under `scope` (`encoder.layers.{i}`).
    pub fn load(
        config: &TransformerConfig,
        scope: &mut WeightScope<'_>,
        seed: u64,
    ) -> Result<Self, ModelError> {
        let self_attn = MultiHeadAttention::load(attention_config(config), &mut scope.pp("self_attn"))?;
        let self_attn_residual = PreNormResidual::load(
            norm_config(config),
            config.dropout,
            &mut scope.pp("self_attn_norm"),
            seed,
        )?;
        let feed_forward =
            FeedForward::load(feed_forward_config(config), &mut scope.pp("feed_forward"), seed + 1)?;
        let ff_residual = PreNormResidual::load(
            norm_config(config),
            config.dropout,
            &mut scope.pp("ff_norm"),
            seed + 2,
        )?;
        Ok(Self {
            self_attn,
            self_attn_residual,
            feed_forward,
            ff_residual,
        })
    }

    pub fn set_training(&self, training: bool) {
        self.self_attn.set_training(training);
        self.self_attn_residual.set_training(training);
        self.feed_forward.set_training(training);
        self.ff_residual.set_training(training);
    }

    /// Returns the new hidden state and the self-attention weights.
    pub fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<(Tensor, Tensor), ModelError> {
        let normed = self.self_attn_residual.normalize(hidden)?;
        let attended = self.self_attn.forward(&normed, &normed, mask)?;
        let hidden = self.self_attn_residual.add_branch(hidden, &attended.output)?;
        let hidden = self
            .ff_residual
            .forward(&hidden, |normed| self.feed_forward.forward(normed))?;
        Ok((hidden, attended.weights))
    }
}

/// Stack of independently parameterised [`EncoderLayer`]s and a final norm.
#[derive(Debug, Clone)]
pub struct Encoder {
    layers: Vec<EncoderLayer>,
    norm: LayerNorm,
}

impl Encoder {
    /// Reads `layers.{i}` for every layer plus `norm` from `scope` (`encoder`).
    pub fn load(config: &TransformerConfig, scope: &mut WeightScope<'_>) -> Result<Self, ModelError> {
        let mut layers = Vec::with_capacity(config.n_layers);
        {
            let mut stack = scope.pp("layers");
            for index in 0..config.n_layers {
                let seed = 0x1000 + (index as u64) * 8;
                layers.push(EncoderLayer::load(config, &mut stack.pp(index), seed)?);
            }
        }
        let norm = LayerNorm::load(norm_config(config), &mut scope.pp("norm"))?;
        Ok(Self { layers, norm })
    }

    pub fn layers(&self) -> &[EncoderLayer] {
        &self.layers
    }

    pub fn set_training(&self, training: bool) {
        for layer in &self.layers {
            layer.set_training(training);
        }
    }

    /// Maps embedded source `(batch, src_len, d_model)` to memory of the same shape.
    pub fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, ModelError> {
        Ok(self.forward_with_attention(hidden, mask)?.0)
    }

    /// Like [`forward`](Self::forward), also returning each layer's attention weights.
    pub fn forward_with_attention(
        &self,
        hidden: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<(Tensor, Vec<Tensor>), ModelError> {
        let mut hidden = hidden.clone();
        let mut weights = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (next, layer_weights) = layer.forward(&hidden, mask)?;
            hidden = next;
            weights.push(layer_weights);
        }
        Ok((self.norm.forward(&hidden)?, weights))
    }
}
