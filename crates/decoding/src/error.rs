use model::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Search parameters are unusable; raised before any model call.
    #[error("invalid decoding configuration: {0}")]
    InvalidConfig(String),

    /// The scorer returned something the search cannot interpret.
    #[error("invalid scorer output: {0}")]
    InvalidScores(String),

    /// A live beam received a NaN or infinite log-probability.
    #[error("non-finite log-probability at step {step} for beam {beam}")]
    NonFinite { step: usize, beam: usize },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl DecodeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
