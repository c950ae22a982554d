//! Patch-embedding backbone and checkpoint resolution.
//!
//! ```text
//! Input: [B, L]
//! Patch:  unfold into N = L / input_token_len non-overlapping patches (remainder dropped)
//! Embed:  Linear(input_token_len → hidden_size)           → hidden_states[0]
//! Block:  LayerNorm(x + fc2(SiLU(fc1(x))))  × num_hidden_layers → hidden_states[1..]
//! Output: num_hidden_layers + 1 tensors of [B, N, hidden_size]
//! ```
//!
//! A checkpoint is a directory (local, or a HuggingFace repo) holding
//! `config.json` and `model.safetensors`.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use super::{BackboneLoader, HiddenStates, SequenceBackbone};
use crate::{Error, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Backbone hyperparameters, read from a checkpoint's `config.json`.
///
/// Unknown keys are ignored so full Timer configs deserialize as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchBackboneConfig {
    pub input_token_len: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub layer_norm_eps: f64,
}

impl Default for PatchBackboneConfig {
    fn default() -> Self {
        Self {
            input_token_len: 96,
            hidden_size: 1024,
            intermediate_size: 2048,
            num_hidden_layers: 8,
            layer_norm_eps: 1e-5,
        }
    }
}

impl PatchBackboneConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.verify()?;
        Ok(cfg)
    }

    pub fn verify(&self) -> Result<()> {
        if self.input_token_len == 0 || self.hidden_size == 0 || self.intermediate_size == 0 {
            return Err(Error::Config(format!(
                "backbone dimensions must be positive: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Residual feed-forward block: `LayerNorm(x + fc2(SiLU(fc1(x))))`.
#[derive(Debug, Clone)]
struct PatchBlock {
    fc1: Linear,
    fc2: Linear,
    norm: LayerNorm,
}

impl PatchBlock {
    fn load(vb: VarBuilder, cfg: &PatchBackboneConfig) -> Result<Self> {
        let fc1 = candle_nn::linear(cfg.hidden_size, cfg.intermediate_size, vb.pp("fc1"))?;
        let fc2 = candle_nn::linear(cfg.intermediate_size, cfg.hidden_size, vb.pp("fc2"))?;
        let norm = candle_nn::layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("norm"))?;
        Ok(Self { fc1, fc2, norm })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.fc2.forward(&self.fc1.forward(x)?.silu()?)?;
        Ok(self.norm.forward(&(x + h)?)?)
    }
}

/// Patch-embedding sequence backbone.
///
/// Weight paths: `embed` (no bias), `layers.{i}.fc1`, `layers.{i}.fc2`,
/// `layers.{i}.norm`.
#[derive(Debug, Clone)]
pub struct PatchBackbone {
    embed: Linear,
    layers: Vec<PatchBlock>,
    cfg: PatchBackboneConfig,
    dtype: DType,
}

impl PatchBackbone {
    pub fn new(cfg: &PatchBackboneConfig, vb: VarBuilder) -> Result<Self> {
        cfg.verify()?;
        let dtype = vb.dtype();
        let embed = candle_nn::linear_no_bias(cfg.input_token_len, cfg.hidden_size, vb.pp("embed"))?;
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| PatchBlock::load(vb.pp(format!("layers.{i}")), cfg))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            embed,
            layers,
            cfg: cfg.clone(),
            dtype,
        })
    }

    pub fn config(&self) -> &PatchBackboneConfig {
        &self.cfg
    }

    /// Number of positions emitted for a series of `lookback` samples.
    pub fn num_positions(&self, lookback: usize) -> usize {
        lookback / self.cfg.input_token_len
    }
}

impl SequenceBackbone for PatchBackbone {
    fn forward_hidden_states(&self, sequence: &Tensor) -> Result<HiddenStates> {
        let (batch, lookback) = sequence.dims2().map_err(|_| {
            Error::ShapeMismatch(format!(
                "backbone expects [batch, lookback], got {:?}",
                sequence.dims()
            ))
        })?;
        let token_len = self.cfg.input_token_len;
        let positions = self.num_positions(lookback);
        if positions == 0 {
            return Err(Error::ShapeMismatch(format!(
                "lookback {lookback} is shorter than one patch ({token_len})"
            )));
        }

        let patches = sequence
            .to_dtype(self.dtype)?
            .narrow(1, 0, positions * token_len)?
            .reshape((batch, positions, token_len))?;

        let mut hidden = self.embed.forward(&patches)?;
        let mut states = Vec::with_capacity(self.layers.len() + 1);
        states.push(hidden.clone());
        for layer in &self.layers {
            hidden = layer.forward(&hidden)?;
            states.push(hidden.clone());
        }
        Ok(HiddenStates::new(states))
    }

    fn hidden_size(&self) -> usize {
        self.cfg.hidden_size
    }

    fn input_token_len(&self) -> usize {
        self.cfg.input_token_len
    }
}

/// Files making up a resolved checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
}

/// Resolve an identifier to checkpoint files.
///
/// An existing directory is used as-is. Identifiers that look like
/// filesystem paths must exist locally. Anything else is treated as a
/// HuggingFace repo id and fetched (or read from the hub cache).
pub fn resolve_checkpoint(identifier: &str) -> Result<CheckpointFiles> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(Error::ModelLoad("empty backbone identifier".into()));
    }

    let local = Path::new(identifier);
    if local.is_dir() {
        let files = CheckpointFiles {
            config: local.join(CONFIG_FILE),
            weights: local.join(WEIGHTS_FILE),
        };
        for file in [&files.config, &files.weights] {
            if !file.is_file() {
                return Err(Error::ModelLoad(format!("missing {}", file.display())));
            }
        }
        return Ok(files);
    }

    if looks_like_path(identifier) {
        return Err(Error::ModelLoad(format!(
            "checkpoint directory {identifier} does not exist"
        )));
    }
    if !is_valid_repo_id(identifier) {
        return Err(Error::ModelLoad(format!(
            "'{identifier}' is neither a directory nor a hub repo id"
        )));
    }

    tracing::info!(repo = identifier, "resolving backbone from HuggingFace Hub");
    let api = hf_hub::api::sync::Api::new()
        .map_err(|e| Error::ModelLoad(format!("hub client: {e}")))?;
    let repo = api.model(identifier.to_string());
    let config = repo
        .get(CONFIG_FILE)
        .map_err(|e| Error::ModelLoad(format!("{identifier}/{CONFIG_FILE}: {e}")))?;
    let weights = repo
        .get(WEIGHTS_FILE)
        .map_err(|e| Error::ModelLoad(format!("{identifier}/{WEIGHTS_FILE}: {e}")))?;
    Ok(CheckpointFiles { config, weights })
}

fn looks_like_path(identifier: &str) -> bool {
    identifier.starts_with('/')
        || identifier.starts_with('.')
        || identifier.starts_with('~')
        || identifier.contains('\\')
}

/// `owner/name` with alphanumerics, `-`, `_` and `.` only.
fn is_valid_repo_id(identifier: &str) -> bool {
    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    match identifier.split_once('/') {
        Some((owner, name)) => valid_part(owner) && valid_part(name),
        None => valid_part(identifier),
    }
}

/// Loads a [`PatchBackbone`] from a local directory or hub repo.
#[derive(Debug, Clone)]
pub struct PatchBackboneLoader {
    pub dtype: DType,
}

impl Default for PatchBackboneLoader {
    fn default() -> Self {
        Self { dtype: DType::F32 }
    }
}

impl BackboneLoader for PatchBackboneLoader {
    type Backbone = PatchBackbone;

    fn load(&self, identifier: &str, device: &Device) -> Result<PatchBackbone> {
        let files = resolve_checkpoint(identifier)?;

        let cfg = PatchBackboneConfig::from_json_file(&files.config)
            .map_err(|e| Error::ModelLoad(format!("{}: {e}", files.config.display())))?;

        tracing::info!("Loading backbone weights from {:?}", files.weights);
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], self.dtype, device)
                .map_err(|e| Error::ModelLoad(format!("backbone weights: {e}")))?
        };
        PatchBackbone::new(&cfg, vb).map_err(|e| Error::ModelLoad(format!("backbone init: {e}")))
    }
}
