//! Inverted dropout with a deterministic per-layer generator.
//!
//! Every [`Dropout`] starts in inference mode, where it returns its input
//! unchanged. [`Dropout::set_training`] flips it to sampling masks from its own
//! seeded generator, scaling kept activations by `1 / (1 - p)`.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use candle_core::{Error, Result, Tensor};

/// Whether a dropout site samples masks at all.
#[derive(Debug)]
pub enum DropoutMode {
    /// Probability is zero (or one), so the site is an identity.
    Disabled,
    /// Dropout is active with the supplied probability and RNG state.
    Enabled { probability: f32, rng: Mutex<Lcg64> },
}

impl Clone for DropoutMode {
    fn clone(&self) -> Self {
        match self {
            DropoutMode::Disabled => DropoutMode::Disabled,
            DropoutMode::Enabled { probability, rng } => {
                let state = match rng.lock() {
                    Ok(guard) => guard.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                DropoutMode::Enabled {
                    probability: *probability,
                    rng: Mutex::new(state),
                }
            }
        }
    }
}

impl DropoutMode {
    /// `p <= 0` and `p >= 1` both disable the site.
    pub fn from_probability(probability: f32, seed: u64) -> Self {
        if probability <= 0.0 || probability >= 1.0 {
            DropoutMode::Disabled
        } else {
            DropoutMode::Enabled {
                probability,
                rng: Mutex::new(Lcg64::new(seed)),
            }
        }
    }
}

/// A single dropout site.
pub struct Dropout {
    mode: DropoutMode,
    training: AtomicBool,
}

impl Clone for Dropout {
    fn clone(&self) -> Self {
        Self {
            mode: self.mode.clone(),
            training: AtomicBool::new(self.training.load(Ordering::Relaxed)),
        }
    }
}

impl fmt::Debug for Dropout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dropout")
            .field("mode", &self.mode)
            .field("training", &self.is_training())
            .finish()
    }
}

impl Dropout {
    pub fn new(probability: f32, seed: u64) -> Self {
        Self {
            mode: DropoutMode::from_probability(probability, seed),
            training: AtomicBool::new(false),
        }
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    pub fn forward(&self, tensor: &Tensor) -> Result<Tensor> {
        if !self.is_training() {
            return Ok(tensor.clone());
        }
        match &self.mode {
            DropoutMode::Disabled => Ok(tensor.clone()),
            DropoutMode::Enabled { probability, rng } => {
                let keep_prob = 1.0 - probability;
                let total = tensor.elem_count();
                let mut rng = rng
                    .lock()
                    .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
                let mask_data: Vec<f32> = (0..total)
                    .map(|_| if rng.next_f32() < keep_prob { 1.0 / keep_prob } else { 0.0 })
                    .collect();
                let mask = Tensor::from_vec(mask_data, tensor.dims().to_vec(), tensor.device())?
                    .to_dtype(tensor.dtype())?;
                tensor.mul(&mask)
            }
        }
    }
}

/// Simple 64-bit linear congruential generator for reproducible masks.
#[derive(Debug, Clone)]
pub struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // Knuth's MMIX multiplier.
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn next_f32(&mut self) -> f32 {
        const SCALE: f64 = 1.0 / ((1u64 << 53) as f64);
        let bits = self.next_u64() >> 11;
        (bits as f64 * SCALE) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn inference_mode_is_identity() -> Result<()> {
        let dropout = Dropout::new(0.5, 0);
        let input = Tensor::randn(0f32, 1.0, (2, 2, 4), &Device::Cpu)?;
        let out = dropout.forward(&input)?;
        let diff = input.sub(&out)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn training_mode_preserves_expectation() -> Result<()> {
        let dropout = Dropout::new(0.25, 123);
        dropout.set_training(true);
        let input = Tensor::ones((4, 8, 16), DType::F32, &Device::Cpu)?;
        let values = dropout.forward(&input)?.flatten_all()?.to_vec1::<f32>()?;

        let mean = values.iter().copied().sum::<f32>() / values.len() as f32;
        assert!((mean - 1.0).abs() < 0.1);
        assert!(values.iter().any(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn same_seed_gives_same_mask() -> Result<()> {
        let a = Dropout::new(0.3, 7);
        let b = Dropout::new(0.3, 7);
        a.set_training(true);
        b.set_training(true);
        let input = Tensor::ones((3, 5), DType::F32, &Device::Cpu)?;
        let left = a.forward(&input)?.flatten_all()?.to_vec1::<f32>()?;
        let right = b.forward(&input)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(left, right);
        Ok(())
    }

    #[test]
    fn zero_probability_is_disabled() {
        assert!(matches!(DropoutMode::from_probability(0.0, 1), DropoutMode::Disabled));
        assert!(matches!(DropoutMode::from_probability(1.0, 1), DropoutMode::Disabled));
    }
}
