//! Scaled dot-product and multi-head attention.
//!
//! Kernels operate on per-head tensors with layout
//! `[batch, n_heads, seq_len, head_dim]` and return both the attended values
//! and the normalised attention weights `[batch, n_heads, q_len, k_len]`.
//! Reductions run in `f32`; outputs are cast back to the query dtype.
//!
//! Masks are boolean (`u8`) tensors where `1` marks a key position a query
//! must not attend to. Any mask broadcastable to
//! `[batch, n_heads, q_len, k_len]` is accepted; builders for padding, causal
//! and combined masks live in [`masks`].
//!
//! Dropout on the attention weights is a train-only concern controlled through
//! [`Config`].

pub mod core;
pub mod masks;
pub mod multi_head;
pub mod scaled_dot_product;

pub use core::{Attention, AttentionError, AttentionOutput, Config};
pub use multi_head::{MultiHeadAttention, MultiHeadAttentionConfig};
pub use scaled_dot_product::ScaledDotProductAttention;
