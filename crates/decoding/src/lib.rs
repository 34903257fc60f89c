//! Autoregressive decoding for the encoder-decoder transformer.
//!
//! [`BeamSearchDecoder`] keeps `beam_width` hypotheses per example and ranks
//! finished beams by length-normalised log-probability. [`GreedyDecoder`] is
//! the single-path baseline. Both drive the model through [`StepScorer`], so
//! the search itself can be exercised without any network.

pub mod beam;
pub mod config;
pub mod error;
pub mod greedy;
pub mod scorer;

pub use beam::{length_normalized, BeamSearchDecoder, BeamSearchOutput, Hypothesis};
pub use config::{BeamSearchConfig, MaxLengthPolicy};
pub use error::DecodeError;
pub use greedy::GreedyDecoder;
pub use scorer::{StepScorer, TransformerScorer};
