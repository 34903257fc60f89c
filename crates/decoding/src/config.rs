use serde::{Deserialize, Serialize};

use crate::DecodeError;

/// Parameters of one beam search, passed explicitly to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BeamSearchConfig {
    pub beam_width: usize,
    /// Exponent of the `((5 + len) / 6)` normaliser; `0` ranks by raw score.
    pub length_penalty: f32,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        Self {
            beam_width: 4,
            length_penalty: 0.6,
        }
    }
}

impl BeamSearchConfig {
    pub fn new(beam_width: usize, length_penalty: f32) -> Self {
        Self {
            beam_width,
            length_penalty,
        }
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.beam_width == 0 {
            return Err(DecodeError::config("beam_width must be at least 1"));
        }
        if !self.length_penalty.is_finite() || self.length_penalty < 0.0 {
            return Err(DecodeError::config(format!(
                "length_penalty must be finite and non-negative, got {}",
                self.length_penalty
            )));
        }
        Ok(())
    }
}

/// Derives the per-example decode budget from the source length.
///
/// `max_len = ceil(scale * src_len) + offset`, kept within
/// `[1, max_seq_len - 1]` so the start token plus every emitted token still
/// fits the positional table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaxLengthPolicy {
    pub scale: f32,
    pub offset: usize,
}

impl Default for MaxLengthPolicy {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 50,
        }
    }
}

impl MaxLengthPolicy {
    pub fn new(scale: f32, offset: usize) -> Self {
        Self { scale, offset }
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if !self.scale.is_finite() || self.scale < 0.0 {
            return Err(DecodeError::config(format!(
                "max length scale must be finite and non-negative, got {}",
                self.scale
            )));
        }
        Ok(())
    }

    pub fn max_len(&self, src_len: usize, max_seq_len: usize) -> usize {
        let scaled = (self.scale * src_len as f32).ceil().max(0.0) as usize;
        scaled
            .saturating_add(self.offset)
            .clamp(1, Self::ceiling(max_seq_len))
    }

    /// Largest budget a model with `max_seq_len` positions can decode.
    pub fn ceiling(max_seq_len: usize) -> usize {
        max_seq_len.saturating_sub(1).max(1)
    }
}

/// Rejects budgets of zero steps or more steps than the positional table holds.
pub(crate) fn check_budget(max_len: usize, max_seq_len: Option<usize>) -> Result<(), DecodeError> {
    if max_len == 0 {
        return Err(DecodeError::config("max_len must be at least 1"));
    }
    if let Some(max_seq_len) = max_seq_len {
        let ceiling = MaxLengthPolicy::ceiling(max_seq_len);
        if max_len > ceiling {
            return Err(DecodeError::config(format!(
                "max_len {max_len} exceeds {ceiling}, the longest output for max_seq_len {max_seq_len}"
            )));
        }
    }
    Ok(())
}
