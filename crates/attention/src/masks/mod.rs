//! Mask utilities shared by attention implementations.
//!
//! Masks are boolean tensors with dtype [`MASK_DTYPE`]: `1` means the key must
//! be hidden from the query, `0` means it may be attended. Builders return the
//! smallest broadcastable shape:
//!
//! * padding masks are `[batch, 1, 1, k_len]`,
//! * causal masks are `[1, 1, q_len, k_len]`,
//! * combined target masks are `[batch, 1, len, len]`.

pub mod causal;
pub mod padding;

use candle_core::{DType, Result, Tensor};

/// Dtype shared by all boolean masks.
pub const MASK_DTYPE: DType = DType::U8;

/// Score written into masked positions before the softmax.
///
/// Large and finite so that a fully masked row degrades to a uniform
/// distribution instead of NaN.
pub const MASK_FILL: f32 = -1e9;

pub use causal::build_causal_mask;
pub use padding::{padding_mask_from_booleans, padding_mask_from_ids, padding_mask_from_lengths};

/// Union of two masks: a position is hidden when either mask hides it.
///
/// Shapes broadcast against each other, so a `[batch, 1, 1, len]` padding mask
/// combined with a `[1, 1, len, len]` causal mask yields `[batch, 1, len, len]`.
pub fn combine_masks(left: &Tensor, right: &Tensor) -> Result<Tensor> {
    left.broadcast_maximum(right)
}

/// Decoder self-attention mask for `(batch, len)` target ids: padded keys and
/// future positions are both hidden.
pub fn target_mask(token_ids: &Tensor, pad_id: i64) -> Result<Tensor> {
    let (_, len) = token_ids.dims2()?;
    let padding = padding_mask_from_ids(token_ids, pad_id)?;
    let causal = build_causal_mask(token_ids.device(), len, len)?;
    combine_masks(&padding, &causal)
}
