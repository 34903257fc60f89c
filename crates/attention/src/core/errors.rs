//! Error types emitted by attention implementations.

use layers::LayerError;

/// Attention-specific error category.
#[derive(Debug)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    InvalidShape { context: String },
    /// The kernel does not support the requested data type.
    UnsupportedDType { requested: String },
    /// Hyper-parameters are inconsistent (e.g. `d_model` not divisible by heads).
    InvalidConfig { message: String },
    /// Projection parameters could not be read.
    Parameters { source: LayerError },
    /// A backend-specific failure propagated to the caller.
    Backend { message: String },
}

impl std::fmt::Display for AttentionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionError::InvalidShape { context } => {
                write!(f, "invalid tensor shape for {context}")
            }
            AttentionError::UnsupportedDType { requested } => {
                write!(f, "unsupported dtype {requested}")
            }
            AttentionError::InvalidConfig { message } => {
                write!(f, "invalid attention configuration: {message}")
            }
            AttentionError::Parameters { source } => write!(f, "attention parameters: {source}"),
            AttentionError::Backend { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for AttentionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttentionError::Parameters { source } => Some(source),
            _ => None,
        }
    }
}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        AttentionError::Backend {
            message: err.to_string(),
        }
    }
}

impl From<LayerError> for AttentionError {
    fn from(source: LayerError) -> Self {
        match source {
            LayerError::InvalidConfig(message) => AttentionError::InvalidConfig { message },
            source => AttentionError::Parameters { source },
        }
    }
}
