//! Lightweight validation helpers shared across layer components.
//!
//! These routines return `candle_core::Result<()>` so forward paths can
//! propagate shape problems with `?` instead of panicking inside a matmul.

use candle_core::{Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(context: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual] if *actual == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Validates that two activations share batch and hidden sizes.
pub fn expect_same_batch(context: &str, left: &Tensor, right: &Tensor) -> Result<()> {
    let (lb, _, lh) = left.dims3()?;
    let (rb, _, rh) = right.dims3()?;
    if lb == rb && lh == rh {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: batch/hidden mismatch between {:?} and {:?}",
            left.dims(),
            right.dims()
        )))
    }
}
