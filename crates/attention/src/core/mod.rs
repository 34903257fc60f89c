//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on tensors with layout
//! `[batch, n_heads, seq_len, head_dim]`; `k` and `v` share a key length that
//! may differ from the query length (cross-attention).

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::Config;
pub use errors::AttentionError;

/// Attended values together with the weights that produced them.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `[batch, n_heads, q_len, head_dim]` for kernels, `[batch, q_len, d_model]`
    /// once heads are merged.
    pub output: Tensor,
    /// `[batch, n_heads, q_len, k_len]`; every row sums to one.
    pub weights: Tensor,
}

/// Unified interface for attention kernels.
///
/// * `q` is `[batch, n_heads, q_len, head_dim]`, `k` and `v` are
///   `[batch, n_heads, k_len, head_dim]`.
/// * Masks, when present, are `u8` and broadcastable to
///   `[batch, n_heads, q_len, k_len]`; `1` forbids attention.
/// * Dropout is controlled via [`Config`] and only applied while training.
pub trait Attention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput, AttentionError>;
}
