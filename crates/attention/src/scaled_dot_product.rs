//! Exact scaled dot-product attention.
//!
//! `softmax(q k^T / sqrt(d_head))` with masked scores replaced by
//! [`MASK_FILL`] before normalisation, followed by train-only dropout on the
//! weights and the weighted sum over `v`.

use std::sync::OnceLock;

use candle_core::{DType, Tensor};
use candle_nn::ops::{dropout, softmax_last_dim};

use crate::core::{Attention, AttentionError, AttentionOutput, Config};
use crate::masks::{MASK_DTYPE, MASK_FILL};

/// Numerically stable, portable attention kernel.
#[derive(Debug, Default)]
pub struct ScaledDotProductAttention {
    first_call: OnceLock<()>,
}

impl ScaledDotProductAttention {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clone for ScaledDotProductAttention {
    fn clone(&self) -> Self {
        Self::new()
    }
}

fn check_mask(
    mask: &Tensor,
    q: &Tensor,
    shape: (usize, usize, usize, usize),
) -> Result<(), AttentionError> {
    let (batch, heads, q_len, k_len) = shape;
    if !q.device().same_device(mask.device()) {
        return Err(AttentionError::InvalidShape {
            context: "mask must reside on the same device as q".to_string(),
        });
    }
    if mask.dtype() != MASK_DTYPE {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("mask expects dtype {MASK_DTYPE:?}, got {:?}", mask.dtype()),
        });
    }
    let (mb, mh, mq, mk) = mask.dims4().map_err(|_| AttentionError::InvalidShape {
        context: "mask must have shape [batch|1, heads|1, q_len|1, k_len]".to_string(),
    })?;
    let fits = |dim: usize, full: usize| dim == 1 || dim == full;
    if !fits(mb, batch) || !fits(mh, heads) || !fits(mq, q_len) || mk != k_len {
        return Err(AttentionError::InvalidShape {
            context: format!(
                "mask shape mismatch: expected broadcastable to [{batch}, {heads}, {q_len}, {k_len}] got [{mb}, {mh}, {mq}, {mk}]"
            ),
        });
    }
    Ok(())
}

impl Attention for ScaledDotProductAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput, AttentionError> {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::scaled_dot_product init dtype={:?} dropout_p={:?} mask={}",
                q.dtype(),
                config.dropout_p,
                mask.is_some()
            );
        }

        if let Some(p) = config.dropout_p {
            if !(0.0..1.0).contains(&p) {
                return Err(AttentionError::InvalidConfig {
                    message: format!("dropout probability must be in [0, 1), got {p}"),
                });
            }
        }

        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must reside on the same device".to_string(),
            });
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must share the same dtype".to_string(),
            });
        }
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (batch, heads, q_len, head_dim) =
            q.dims4().map_err(|_| AttentionError::InvalidShape {
                context: "q must have shape [batch, heads, seq_len, head_dim]".to_string(),
            })?;
        let (kb, kh, k_len, kd) = k.dims4().map_err(|_| AttentionError::InvalidShape {
            context: "k must have shape [batch, heads, seq_len, head_dim]".to_string(),
        })?;
        let (vb, vh, vk, vd) = v.dims4().map_err(|_| AttentionError::InvalidShape {
            context: "v must have shape [batch, heads, seq_len, head_dim]".to_string(),
        })?;

        if kb != batch || kh != heads || kd != head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] got [{kb}, {kh}, {k_len}, {kd}]"
                ),
            });
        }
        if vb != batch || vh != heads || vk != k_len || vd != head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "v shape mismatch: expected [{batch}, {heads}, {k_len}, {head_dim}] got [{vb}, {vh}, {vk}, {vd}]"
                ),
            });
        }
        if let Some(mask) = mask {
            check_mask(mask, q, (batch, heads, q_len, k_len))?;
        }

        let merged = batch * heads;
        let q_view = q
            .to_dtype(DType::F32)?
            .contiguous()?
            .reshape((merged, q_len, head_dim))?;
        let k_view = k
            .to_dtype(DType::F32)?
            .contiguous()?
            .reshape((merged, k_len, head_dim))?;
        let v_view = v
            .to_dtype(DType::F32)?
            .contiguous()?
            .reshape((merged, k_len, head_dim))?;

        let scale = 1.0 / (head_dim as f64).sqrt();
        let scores = q_view
            .matmul(&k_view.transpose(1, 2)?.contiguous()?)?
            .affine(scale, 0.0)?
            .reshape((batch, heads, q_len, k_len))?;

        let scores = match mask {
            Some(mask) => {
                let shape = (batch, heads, q_len, k_len);
                let mask = mask.broadcast_as(shape)?;
                let fill = Tensor::new(MASK_FILL, device)?.broadcast_as(shape)?;
                mask.where_cond(&fill, &scores)?
            }
            None => scores,
        };

        let probs = softmax_last_dim(&scores)?;
        let probs = match config.effective_dropout() {
            Some(p) => dropout(&probs, p)?,
            None => probs,
        };

        let output = probs
            .reshape((merged, q_len, k_len))?
            .matmul(&v_view)?
            .reshape((batch, heads, q_len, head_dim))?;

        Ok(AttentionOutput {
            output: output.to_dtype(dtype)?,
            weights: probs.to_dtype(dtype)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::{build_causal_mask, padding_mask_from_lengths};
    use candle_core::{Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| ((i * 7) % 11) as f32 * 0.1 - 0.5).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let k = Tensor::from_vec(data.iter().rev().copied().collect::<Vec<_>>(), (1, 2, 4, 8), device)?;
        let v = Tensor::from_vec(data, (1, 2, 4, 8), device)?;
        Ok((q, k, v))
    }

    fn naive_attention(
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
    ) -> CandleResult<Tensor> {
        let (batch, heads, q_len, head_dim) = q.dims4()?;
        let (_, _, k_len, _) = k.dims4()?;
        let mut output = vec![0f32; batch * heads * q_len * head_dim];

        let q_vec = q.flatten_all()?.to_vec1::<f32>()?;
        let k_vec = k.flatten_all()?.to_vec1::<f32>()?;
        let v_vec = v.flatten_all()?.to_vec1::<f32>()?;
        let mask_vec = match mask {
            Some(m) => Some(
                m.broadcast_as((batch, heads, q_len, k_len))?
                    .contiguous()?
                    .flatten_all()?
                    .to_vec1::<u8>()?,
            ),
            None => None,
        };
        let scale = 1.0 / (head_dim as f32).sqrt();

        for b in 0..batch {
            for h in 0..heads {
                for q_idx in 0..q_len {
                    let mut row = vec![0f32; k_len];
                    for (k_idx, slot) in row.iter_mut().enumerate() {
                        let masked = mask_vec.as_ref().is_some_and(|m| {
                            m[((b * heads + h) * q_len + q_idx) * k_len + k_idx] == 1
                        });
                        *slot = if masked {
                            f32::NEG_INFINITY
                        } else {
                            let mut dot = 0f32;
                            for d in 0..head_dim {
                                let qi = ((b * heads + h) * q_len + q_idx) * head_dim + d;
                                let ki = ((b * heads + h) * k_len + k_idx) * head_dim + d;
                                dot += q_vec[qi] * k_vec[ki];
                            }
                            dot * scale
                        };
                    }
                    let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    let exps: Vec<f32> = row.iter().map(|v| (v - max_val).exp()).collect();
                    let denom: f32 = exps.iter().sum();
                    for d in 0..head_dim {
                        let mut acc = 0f32;
                        for (k_idx, e) in exps.iter().enumerate() {
                            let vi = ((b * heads + h) * k_len + k_idx) * head_dim + d;
                            acc += e / denom * v_vec[vi];
                        }
                        output[((b * heads + h) * q_len + q_idx) * head_dim + d] = acc;
                    }
                }
            }
        }

        Tensor::from_vec(output, (batch, heads, q_len, head_dim), q.device())
    }

    fn max_diff(a: &Tensor, b: &Tensor) -> CandleResult<f32> {
        a.to_dtype(DType::F32)?
            .sub(&b.to_dtype(DType::F32)?)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()
    }

    #[test]
    fn matches_naive_with_causal_mask() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 4, 4)?;
        let out = ScaledDotProductAttention::new().attend(&q, &k, &v, Some(&mask), &Config::default())?;
        let expected = naive_attention(&q, &k, &v, Some(&mask))?;
        assert_eq!(out.output.dims(), &[1, 2, 4, 8]);
        assert_eq!(out.weights.dims(), &[1, 2, 4, 4]);
        assert!(max_diff(&out.output, &expected)? < 1e-4);
        Ok(())
    }

    #[test]
    fn weights_are_distributions_with_zero_on_masked_keys() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = padding_mask_from_lengths(&device, &[3], 4)?;
        let out = ScaledDotProductAttention::new().attend(&q, &k, &v, Some(&mask), &Config::default())?;

        let weights = out.weights.flatten_all()?.to_vec1::<f32>()?;
        for row in weights.chunks(4) {
            assert!(row.iter().all(|w| *w >= 0.0));
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            assert!(row[3] < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn fully_masked_row_falls_back_to_uniform() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = Tensor::ones((1, 1, 1, 4), MASK_DTYPE, &device)?;
        let out = ScaledDotProductAttention::new().attend(&q, &k, &v, Some(&mask), &Config::default())?;
        let weights = out.weights.flatten_all()?.to_vec1::<f32>()?;
        assert!(weights.iter().all(|w| (w - 0.25).abs() < 1e-6));
        let values = out.output.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn cross_attention_allows_different_key_length() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (2, 2, 3, 4), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 2, 5, 4), &device)?;
        let v = Tensor::randn(0f32, 1.0, (2, 2, 5, 4), &device)?;
        let out = ScaledDotProductAttention::new().attend(&q, &k, &v, None, &Config::default())?;
        assert_eq!(out.output.dims(), &[2, 2, 3, 4]);
        assert_eq!(out.weights.dims(), &[2, 2, 3, 5]);
        Ok(())
    }

    #[test]
    fn mismatched_shapes_error() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let k = Tensor::zeros((1, 2, 5, 8), DType::F32, &device)?;
        let v = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let err = ScaledDotProductAttention::new()
            .attend(&q, &k, &v, None, &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
        Ok(())
    }

    #[test]
    fn mask_shape_and_dtype_validation() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let attention = ScaledDotProductAttention::new();

        let wrong_heads = Tensor::zeros((1, 3, 4, 4), MASK_DTYPE, &device)?;
        let err = attention
            .attend(&q, &q, &q, Some(&wrong_heads), &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));

        let additive = Tensor::zeros((1, 1, 4, 4), DType::F32, &device)?;
        let err = attention
            .attend(&q, &q, &q, Some(&additive), &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::UnsupportedDType { .. }));
        Ok(())
    }

    #[test]
    fn numerical_stability() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::full(10_000.0f32, (1, 1, 4, 4), &device)?;
        let k = Tensor::full(-10_000.0f32, (1, 1, 4, 4), &device)?;
        let v = Tensor::ones((1, 1, 4, 4), DType::F32, &device)?;
        let out = ScaledDotProductAttention::new().attend(&q, &k, &v, None, &Config::default())?;
        let values = out.output.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|value| value.is_finite()));
        Ok(())
    }

    #[test]
    fn dropout_only_applies_while_training() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let attention = ScaledDotProductAttention::new();
        let reference = attention.attend(&q, &k, &v, None, &Config::default())?;

        let eval = Config {
            dropout_p: Some(0.5),
            training: false,
        };
        let out = attention.attend(&q, &k, &v, None, &eval)?;
        assert!(max_diff(&out.output, &reference.output)? < 1e-6);

        let bad = Config {
            dropout_p: Some(1.5),
            training: true,
        };
        let err = attention.attend(&q, &k, &v, None, &bad).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidConfig { .. }));
        Ok(())
    }
}
