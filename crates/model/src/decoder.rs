use attention::MultiHeadAttention;
use candle_core::Tensor;
use layers::{FeedForward, LayerNorm, PreNormResidual, WeightScope};

use crate::config::TransformerConfig;
use crate::encoder::{attention_config, feed_forward_config, norm_config};
use crate::ModelError;

/// Attention weights produced by one decoder layer.
#[derive(Debug, Clone)]
pub struct DecoderAttention {
    /// `[batch, heads, tgt_len, tgt_len]`
    pub self_attn: Tensor,
    /// `[batch, heads, tgt_len, src_len]`
    pub cross_attn: Tensor,
}

/// Pre-norm decoder layer: masked self-attention, cross-attention over the
/// encoder memory, then feed-forward.
#[derive(Debug, Clone)]
pub struct DecoderLayer {
    self_attn: MultiHeadAttention,
    self_attn_residual: PreNormResidual,
    cross_attn: MultiHeadAttention,
    cross_attn_residual: PreNormResidual,
    feed_forward: FeedForward,
    ff_residual: PreNormResidual,
}

impl DecoderLayer {
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
        let cross_attn = MultiHeadAttention::load(attention_config(config), &mut scope.pp("cross_attn"))?;
        let cross_attn_residual = PreNormResidual::load(
            norm_config(config),
            config.dropout,
            &mut scope.pp("cross_attn_norm"),
            seed + 1,
        )?;
        let feed_forward =
            FeedForward::load(feed_forward_config(config), &mut scope.pp("feed_forward"), seed + 2)?;
        let ff_residual = PreNormResidual::load(
            norm_config(config),
            config.dropout,
            &mut scope.pp("ff_norm"),
            seed + 3,
        )?;
        Ok(Self {
            self_attn,
            self_attn_residual,
            cross_attn,
            cross_attn_residual,
            feed_forward,
            ff_residual,
        })
    }

    pub fn set_training(&self, training: bool) {
        self.self_attn.set_training(training);
        self.self_attn_residual.set_training(training);
        self.cross_attn.set_training(training);
        self.cross_attn_residual.set_training(training);
        self.feed_forward.set_training(training);
        self.ff_residual.set_training(training);
    }

    pub fn forward(
        &self,
        hidden: &Tensor,
        memory: &Tensor,
        src_mask: Option<&Tensor>,
        tgt_mask: Option<&Tensor>,
    ) -> Result<(Tensor, DecoderAttention), ModelError> {
        let normed = self.self_attn_residual.normalize(hidden)?;
        let self_attended = self.self_attn.forward(&normed, &normed, tgt_mask)?;
        let hidden = self
            .self_attn_residual
            .add_branch(hidden, &self_attended.output)?;

        let normed = self.cross_attn_residual.normalize(&hidden)?;
        let cross_attended = self.cross_attn.forward(&normed, memory, src_mask)?;
        let hidden = self
            .cross_attn_residual
            .add_branch(&hidden, &cross_attended.output)?;

        let hidden = self
            .ff_residual
            .forward(&hidden, |normed| self.feed_forward.forward(normed))?;
        Ok((
            hidden,
            DecoderAttention {
                self_attn: self_attended.weights,
                cross_attn: cross_attended.weights,
            },
        ))
    }
}

/// Stack of independently parameterised [`DecoderLayer`]s and a final norm.
#[derive(Debug, Clone)]
pub struct Decoder {
    layers: Vec<DecoderLayer>,
    norm: LayerNorm,
}

impl Decoder {
    pub fn load(config: &TransformerConfig, scope: &mut WeightScope<'_>) -> Result<Self, ModelError> {
        let mut layers = Vec::with_capacity(config.n_layers);
        {
            let mut stack = scope.pp("layers");
            for index in 0..config.n_layers {
                let seed = 0x8000 + (index as u64) * 8;
                layers.push(DecoderLayer::load(config, &mut stack.pp(index), seed)?);
            }
        }
        let norm = LayerNorm::load(norm_config(config), &mut scope.pp("norm"))?;
        Ok(Self { layers, norm })
    }

    pub fn layers(&self) -> &[DecoderLayer] {
        &self.layers
    }

    pub fn set_training(&self, training: bool) {
        for layer in &self.layers {
            layer.set_training(training);
        }
    }

    /// Decodes embedded targets `(batch, tgt_len, d_model)` against `memory`.
    pub fn forward(
        &self,
        hidden: &Tensor,
        memory: &Tensor,
        src_mask: Option<&Tensor>,
        tgt_mask: Option<&Tensor>,
    ) -> Result<Tensor, ModelError> {
        Ok(self
            .forward_with_attention(hidden, memory, src_mask, tgt_mask)?
            .0)
    }

    pub fn forward_with_attention(
        &self,
        hidden: &Tensor,
        memory: &Tensor,
        src_mask: Option<&Tensor>,
        tgt_mask: Option<&Tensor>,
    ) -> Result<(Tensor, Vec<DecoderAttention>), ModelError> {
        let mut hidden = hidden.clone();
        let mut weights = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (next, layer_weights) = layer.forward(&hidden, memory, src_mask, tgt_mask)?;
            hidden = next;
            weights.push(layer_weights);
        }
        Ok((self.norm.forward(&hidden)?, weights))
    }
}
