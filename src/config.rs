//! Configuration for the Timer encoder.
//!
//! Defaults match `thuml/timer-base-84m`: a 1024-wide backbone whose
//! last-layer hidden states are projected to `project_dim`.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Hidden width of the Timer backbone.
pub const ENCODER_DIM: usize = 1024;

/// Nominal forecast horizon of the backbone. Carried as metadata only.
pub const PREDICTION_LENGTH: usize = 96;

/// Backbone checkpoint used when none is configured.
///
/// This is the upstream Timer repo. It needs a loader that understands the
/// Timer architecture; `PatchBackboneLoader` rejects its weights.
pub const DEFAULT_ENCODER_PATH: &str = "thuml/timer-base-84m";

/// Training-mode tag.
///
/// Advisory only: it is stored on the encoder for the surrounding training
/// pipeline and never changes how a forward pass is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainMode {
    /// Only the adapter head is trained.
    #[default]
    Adapter,
    /// Backbone and adapter are both trained.
    Full,
    /// Nothing is trained.
    Frozen,
}

impl TrainMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainMode::Adapter => "adapter",
            TrainMode::Full => "full",
            TrainMode::Frozen => "frozen",
        }
    }
}

impl FromStr for TrainMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adapter" => Ok(TrainMode::Adapter),
            "full" => Ok(TrainMode::Full),
            "frozen" => Ok(TrainMode::Frozen),
            other => Err(Error::Config(format!(
                "unknown train mode '{other}' (expected adapter, full or frozen)"
            ))),
        }
    }
}

impl std::fmt::Display for TrainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerEncoderConfig {
    /// Local directory or HuggingFace repo id of the backbone checkpoint.
    pub encoder_path: String,
    /// Output embedding width.
    pub project_dim: usize,
    /// Adapter hidden width. `None` means `2 * project_dim`.
    pub hidden_dim: Option<usize>,
    pub train_mode: TrainMode,
}

impl Default for TimerEncoderConfig {
    fn default() -> Self {
        Self {
            encoder_path: DEFAULT_ENCODER_PATH.to_string(),
            project_dim: 1024,
            hidden_dim: None,
            train_mode: TrainMode::Adapter,
        }
    }
}

impl TimerEncoderConfig {
    pub fn new(encoder_path: impl Into<String>, project_dim: usize, train_mode: TrainMode) -> Self {
        Self {
            encoder_path: encoder_path.into(),
            project_dim,
            train_mode,
            ..Default::default()
        }
    }

    /// Read a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_dim == 0 {
            return Err(Error::Config("project_dim must be positive".into()));
        }
        if self.hidden_dim == Some(0) {
            return Err(Error::Config("hidden_dim must be positive when set".into()));
        }
        if self.encoder_path.trim().is_empty() {
            return Err(Error::Config("encoder_path must not be empty".into()));
        }
        Ok(())
    }
}
