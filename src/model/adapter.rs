//! Projection adapter on top of the backbone's hidden states.
//!
//! ```text
//! x [*, encoder_dim]
//!   → Linear(encoder_dim → hidden_dim) → ReLU → Linear(hidden_dim → project_dim) = y
//!   → y + LayerNorm(y)
//! ```
//!
//! The residual adds the normalized projection back onto the unnormalized
//! one. This is neither pre-norm nor post-norm and must stay that way to
//! match trained adapter weights.

use candle_core::{D, Module, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder};

use crate::{Error, Result};

/// LayerNorm epsilon (PyTorch default).
pub const LAYER_NORM_EPS: f64 = 1e-5;

/// Two-layer MLP with a `y + LayerNorm(y)` output.
///
/// Weight paths: `proj.0`, `proj.2` (the linears) and `pre_norm`.
#[derive(Debug, Clone)]
pub struct TimerAdapter {
    fc1: Linear,
    fc2: Linear,
    pre_norm: LayerNorm,
    encoder_dim: usize,
    hidden_dim: usize,
    project_dim: usize,
}

impl TimerAdapter {
    /// Build the adapter. `hidden_dim` defaults to `2 * project_dim`.
    pub fn new(
        encoder_dim: usize,
        project_dim: usize,
        hidden_dim: Option<usize>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hidden_dim = match hidden_dim {
            Some(dim) => dim,
            None => project_dim.checked_mul(2).ok_or_else(|| {
                Error::Config(format!("project_dim {project_dim} too large for a 2x hidden width"))
            })?,
        };
        let fc1 = candle_nn::linear(encoder_dim, hidden_dim, vb.pp("proj.0"))?;
        let fc2 = candle_nn::linear(hidden_dim, project_dim, vb.pp("proj.2"))?;
        let pre_norm = candle_nn::layer_norm(project_dim, LAYER_NORM_EPS, vb.pp("pre_norm"))?;
        Ok(Self {
            fc1,
            fc2,
            pre_norm,
            encoder_dim,
            hidden_dim,
            project_dim,
        })
    }

    /// Forward pass.
    ///
    /// Input: `[*, encoder_dim]`. Output: `[*, project_dim]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let last = x.dim(D::Minus1)?;
        if last != self.encoder_dim {
            return Err(Error::ShapeMismatch(format!(
                "adapter expects last dim {}, got {:?}",
                self.encoder_dim,
                x.dims()
            )));
        }

        let h = self.fc1.forward(x)?.relu()?;
        let y = self.fc2.forward(&h)?;
        let normed = self.pre_norm.forward(&y)?;
        Ok((&y + normed)?)
    }

    pub fn encoder_dim(&self) -> usize {
        self.encoder_dim
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn project_dim(&self) -> usize {
        self.project_dim
    }
}
