use attention::masks::{padding_mask_from_ids, target_mask};
use candle_core::{Device, Tensor};
use embedding::{PositionalEncoding, PositionalEncodingConfig, TokenEmbedding, TokenEmbeddingConfig};
use layers::{Init, Linear, LinearConfig, WeightMap};

use crate::{
    config::{SpecialTokens, TransformerConfig},
    decoder::Decoder,
    encoder::Encoder,
    ModelError,
};

/// Encoder-decoder transformer assembled from the shared crates.
///
/// Parameters are immutable once built; every method takes `&self`, so a
/// model can be shared across threads behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Transformer {
    config: TransformerConfig,
    tokens: SpecialTokens,
    device: Device,
    src_embed: TokenEmbedding,
    tgt_embed: TokenEmbedding,
    positional: PositionalEncoding,
    encoder: Encoder,
    decoder: Decoder,
    generator: Linear,
    parameter_names: Vec<String>,
    parameter_count: usize,
}

impl Transformer {
    /// Validates `config` and `tokens`, then reads every parameter from `weights`.
    ///
    /// Strict maps must contain exactly the parameters this architecture
    /// asks for; initialising maps sample whatever is missing. Either way,
    /// entries nobody consumed are rejected.
    pub fn new(
        config: TransformerConfig,
        tokens: SpecialTokens,
        weights: &mut WeightMap,
    ) -> Result<Self, ModelError> {
        config.validate()?;
        tokens.validate(&config)?;
        let device = weights.device().clone();

        let src_embed = TokenEmbedding::load(
            TokenEmbeddingConfig {
                vocab_size: config.src_vocab_size,
                hidden_dim: config.d_model,
            },
            &mut weights.scope("src_embed"),
        )?;
        let tgt_embed = TokenEmbedding::load(
            TokenEmbeddingConfig {
                vocab_size: config.tgt_vocab_size,
                hidden_dim: config.d_model,
            },
            &mut weights.scope("tgt_embed"),
        )?;
        let positional = PositionalEncoding::new(
            PositionalEncodingConfig {
                hidden_dim: config.d_model,
                max_seq_len: config.max_seq_len,
                dropout: config.dropout,
            },
            &device,
            0,
        )?;
        let encoder = Encoder::load(&config, &mut weights.scope("encoder"))?;
        let decoder = Decoder::load(&config, &mut weights.scope("decoder"))?;

        let generator_config = LinearConfig::new(config.d_model, config.tgt_vocab_size);
        let generator = if config.share_target_embeddings {
            Linear::tied(
                generator_config,
                tgt_embed.weight().clone(),
                &mut weights.scope("generator"),
            )?
        } else {
            Linear::load(
                generator_config,
                &mut weights.scope("generator"),
                &Init::XavierUniform,
            )?
        };

        weights.finish()?;
        let parameter_names = weights.names();
        let parameter_count = parameter_names
            .iter()
            .filter_map(|name| weights.get(name))
            .map(Tensor::elem_count)
            .sum();
        log::info!(
            "transformer ready: {} layers, d_model={}, heads={}, {} tensors / {} parameters, shared target embeddings={}",
            config.n_layers,
            config.d_model,
            config.n_heads,
            parameter_names.len(),
            parameter_count,
            config.share_target_embeddings
        );

        Ok(Self {
            config,
            tokens,
            device,
            src_embed,
            tgt_embed,
            positional,
            encoder,
            decoder,
            generator,
            parameter_names,
            parameter_count,
        })
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    pub fn tokens(&self) -> &SpecialTokens {
        &self.tokens
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn target_embedding(&self) -> &TokenEmbedding {
        &self.tgt_embed
    }

    pub fn generator(&self) -> &Linear {
        &self.generator
    }

    /// Sorted names of every parameter the model holds.
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    /// Scalar parameter count; a shared table is counted once.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Switches every dropout site between training and inference behaviour.
    pub fn set_training(&self, training: bool) {
        self.positional.set_training(training);
        self.encoder.set_training(training);
        self.decoder.set_training(training);
    }

    /// `[batch, 1, 1, src_len]` mask hiding source padding.
    pub fn source_mask(&self, src: &Tensor) -> Result<Tensor, ModelError> {
        Ok(padding_mask_from_ids(src, i64::from(self.tokens.pad))?)
    }

    /// `[batch, 1, tgt_len, tgt_len]` mask hiding target padding and future positions.
    pub fn target_mask(&self, tgt: &Tensor) -> Result<Tensor, ModelError> {
        Ok(target_mask(tgt, i64::from(self.tokens.pad))?)
    }

    /// Encodes `(batch, src_len)` ids into memory `(batch, src_len, d_model)`.
    pub fn encode(&self, src: &Tensor, src_mask: Option<&Tensor>) -> Result<Tensor, ModelError> {
        let embedded = self.src_embed.forward(src)?;
        let hidden = self.positional.forward(&embedded)?;
        self.encoder.forward(&hidden, src_mask)
    }

    /// Decodes `(batch, tgt_len)` ids against `memory` into hidden states
    /// `(batch, tgt_len, d_model)`.
    pub fn decode(
        &self,
        memory: &Tensor,
        src_mask: Option<&Tensor>,
        tgt: &Tensor,
        tgt_mask: Option<&Tensor>,
    ) -> Result<Tensor, ModelError> {
        let embedded = self.tgt_embed.forward(tgt)?;
        let hidden = self.positional.forward(&embedded)?;
        self.decoder.forward(&hidden, memory, src_mask, tgt_mask)
    }

    /// Maps hidden states to unnormalised logits `(batch, seq, tgt_vocab_size)`.
    pub fn project(&self, hidden: &Tensor) -> Result<Tensor, ModelError> {
        Ok(self.generator.forward(hidden)?)
    }

    /// Full-sequence pass: logits for every target position.
    pub fn forward(
        &self,
        src: &Tensor,
        tgt: &Tensor,
        src_mask: Option<&Tensor>,
        tgt_mask: Option<&Tensor>,
    ) -> Result<Tensor, ModelError> {
        let memory = self.encode(src, src_mask)?;
        let hidden = self.decode(&memory, src_mask, tgt, tgt_mask)?;
        self.project(&hidden)
    }
}
