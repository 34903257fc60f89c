//! Run-time knobs shared by attention implementations.

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    /// Probability for dropout applied to attention weights.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    pub dropout_p: Option<f32>,
    /// Dropout only fires when this is set.
    pub training: bool,
}

impl Config {
    /// Inference configuration with dropout disabled.
    pub fn inference() -> Self {
        Self::default()
    }

    /// Probability actually applied for this call.
    pub fn effective_dropout(&self) -> Option<f32> {
        match self.dropout_p {
            Some(p) if self.training && p > 0.0 => Some(p),
            _ => None,
        }
    }
}
