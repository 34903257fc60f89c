//! Embedding crate
//!
//! Token lookup tables scaled by `sqrt(d_model)` and the fixed sinusoidal
//! positional encoding added on top of them.

pub mod positional;
pub mod token;

pub use positional::*;
pub use token::*;
