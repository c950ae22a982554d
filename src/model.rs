//! Model components.
//!
//! - [`adapter`] — two-layer projection head with a `y + LayerNorm(y)` output
//! - [`backbone`] — the sequence-backbone seam and a patch-embedding backbone
//! - [`encoder`] — backbone + adapter composition

pub mod adapter;
pub mod backbone;
pub mod encoder;
