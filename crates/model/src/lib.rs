//! Encoder-decoder transformer.
//!
//! [`Transformer`] owns the source and target embeddings, the shared
//! positional encoding, the [`Encoder`] and [`Decoder`] stacks and the output
//! projection. Every parameter is read by name from a [`layers::WeightMap`],
//! so a model can be initialised from scratch or restored from a checkpoint
//! written by an external trainer.

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod model;

pub use config::{SpecialTokens, TransformerConfig};
pub use decoder::{Decoder, DecoderAttention, DecoderLayer};
pub use encoder::{Encoder, EncoderLayer};
pub use error::ModelError;
pub use model::Transformer;
