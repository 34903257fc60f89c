//! Building blocks for transformer layers.
//!
//! Every layer reads its parameters from a [`WeightMap`] by name, so the same
//! constructors serve freshly initialised models and checkpoints produced by
//! an external trainer. Forward passes use `candle_core::Result`, construction
//! uses [`LayerError`] so that missing or mis-shaped parameters surface with
//! their full name.

pub mod checks;
pub mod dropout;
pub mod feed_forward;
pub mod linear;
pub mod norm;
pub mod residual;
pub mod weights;

use thiserror::Error;

pub use dropout::Dropout;
pub use feed_forward::{FeedForward, FeedForwardConfig};
pub use linear::{Linear, LinearConfig};
pub use norm::{LayerNorm, NormConfig};
pub use residual::PreNormResidual;
pub use weights::{Init, LoadMode, WeightMap, WeightScope};

/// Errors raised while assembling layers from named parameters.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Layer dimensions or hyper-parameters are inconsistent.
    #[error("invalid layer configuration: {0}")]
    InvalidConfig(String),

    /// A required parameter is absent from a strict weight map.
    #[error("missing parameter `{0}`")]
    MissingParameter(String),

    /// A parameter exists but its shape disagrees with the configuration.
    #[error("shape mismatch for `{name}`: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A strict weight map still holds entries no layer asked for.
    #[error("weights contain unused parameters: {}", .0.join(", "))]
    UnusedParameters(Vec<String>),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl LayerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
