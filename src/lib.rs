//! Timer time-series encoder in pure Rust.
//!
//! A candle-based wrapper that runs a pretrained time-series backbone, takes
//! the hidden states of its last layer, and remaps them to an externally
//! required embedding width with a small trainable adapter.
//!
//! ## Architecture
//!
//! ```text
//! series [B, L] → backbone (all layers) → hidden_states[-1] [B, S, 1024]
//!                                                 ↓
//!                              Linear → ReLU → Linear = y
//!                                                 ↓
//!                                   y + LayerNorm(y)  [B, S, project_dim]
//! ```
//!
//! ## Modules
//!
//! - [`model`] — adapter, backbone seam, encoder
//! - [`config`] — encoder configuration and training-mode tag
//! - [`device`] — explicit compute-device selection

pub mod config;
pub mod device;
pub mod model;

mod error;

pub use error::{Error, Result};
