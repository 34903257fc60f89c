use attention::AttentionError;
use layers::LayerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// One or more configuration invariants are violated.
    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("failed to parse config: {0}")]
    ConfigFormat(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Attention(#[from] AttentionError),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl ModelError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(vec![message.into()])
    }
}

impl From<toml::de::Error> for ModelError {
    fn from(value: toml::de::Error) -> Self {
        ModelError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(value: serde_json::Error) -> Self {
        ModelError::ConfigFormat(value.to_string())
    }
}
