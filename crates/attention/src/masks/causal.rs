//! Builders for causal attention masks.

use candle_core::{Device, Result, Tensor};

/// Construct a `[1, 1, q_len, k_len]` causal mask.
///
/// When `k_len > q_len`, queries are assumed to align with the most recent
/// `q_len` keys, allowing access to the extended prefix. Every query can see
/// its own position, so no row is fully masked when `k_len >= q_len`.
pub fn build_causal_mask(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    let mut data = vec![0u8; q_len * k_len];
    let offset = k_len.saturating_sub(q_len);

    for q in 0..q_len {
        let row_start = q * k_len;
        let max_k = q + offset;
        for k in (max_k + 1)..k_len {
            data[row_start + k] = 1;
        }
    }

    Tensor::from_vec(data, (1, 1, q_len, k_len), device)
}
