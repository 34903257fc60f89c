//! Positional encodings.

mod sinusoidal;

pub use sinusoidal::{PositionalEncoding, PositionalEncodingConfig};
