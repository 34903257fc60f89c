//! Builders for padding masks used to drop padded keys.
//!
//! Every builder returns a `[batch, 1, 1, k_len]` tensor so the mask applies
//! to all heads and all queries alike.

use candle_core::{DType, Device, Error, Result, Tensor};

/// Construct padding masks from per-batch valid key lengths.
pub fn padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    k_len: usize,
) -> Result<Tensor> {
    let batch = key_lengths.len();
    let mut data = vec![0u8; batch * k_len];

    for (b, &valid) in key_lengths.iter().enumerate() {
        let valid = valid.min(k_len);
        for k in valid..k_len {
            data[b * k_len + k] = 1;
        }
    }

    Tensor::from_vec(data, (batch, 1, 1, k_len), device)
}

/// Construct padding masks from boolean padding indicators.
///
/// Each inner slice corresponds to a batch element and must share the same
/// length. `true` indicates a padded (masked) key position.
pub fn padding_mask_from_booleans(device: &Device, padding: &[Vec<bool>]) -> Result<Tensor> {
    let k_len = padding.first().map(Vec::len).unwrap_or(0);
    if let Some(row) = padding.iter().find(|row| row.len() != k_len) {
        return Err(Error::Msg(format!(
            "all boolean padding masks must share k_len {k_len}, found {}",
            row.len()
        )));
    }

    let data: Vec<u8> = padding
        .iter()
        .flat_map(|row| row.iter().map(|&is_padding| u8::from(is_padding)))
        .collect();
    Tensor::from_vec(data, (padding.len(), 1, 1, k_len), device)
}

/// Construct padding masks from `(batch, k_len)` integer token ids, hiding
/// every position equal to `pad_id`.
pub fn padding_mask_from_ids(token_ids: &Tensor, pad_id: i64) -> Result<Tensor> {
    let (batch, k_len) = token_ids.dims2()?;
    if !token_ids.dtype().is_int() {
        return Err(Error::Msg(format!(
            "padding mask expects integer token ids, got {:?}",
            token_ids.dtype()
        )));
    }
    let ids = token_ids.to_dtype(DType::I64)?.to_vec2::<i64>()?;
    let data: Vec<u8> = ids
        .iter()
        .flat_map(|row| row.iter().map(|&id| u8::from(id == pad_id)))
        .collect();
    Tensor::from_vec(data, (batch, 1, 1, k_len), token_ids.device())
}
