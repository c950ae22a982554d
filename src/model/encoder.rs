//! Timer encoder: pretrained backbone + trainable projection adapter.
//!
//! ```text
//! series [B, L]
//!   → backbone (all hidden states) → hidden_states[-1]  [B, S, 1024]
//!   → TimerAdapter                                      [B, S, project_dim]
//! ```
//!
//! The device is always supplied by the caller. The adapter's parameters live
//! in their own [`VarMap`] so they can be handed to an optimizer or
//! persisted independently of the backbone.

use std::path::Path;

use candle_core::{D, DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};

use super::adapter::TimerAdapter;
use super::backbone::{BackboneLoader, SequenceBackbone};
use crate::config::{ENCODER_DIM, PREDICTION_LENGTH, TimerEncoderConfig, TrainMode};
use crate::device::device_label;
use crate::{Error, Result};

pub struct TimerEncoder<B> {
    backbone: B,
    adapter: TimerAdapter,
    adapter_vars: VarMap,
    device: Device,
    train_mode: TrainMode,
    prediction_length: usize,
}

impl<B: SequenceBackbone> TimerEncoder<B> {
    /// Load the backbone named by `config.encoder_path` and attach a fresh adapter.
    ///
    /// Every loader failure surfaces as [`Error::ModelLoad`]; no adapter is
    /// built in that case.
    pub fn load<L>(config: &TimerEncoderConfig, loader: &L, device: &Device) -> Result<Self>
    where
        L: BackboneLoader<Backbone = B>,
    {
        config.validate()?;
        tracing::info!(
            backbone = %config.encoder_path,
            device = %device_label(device),
            "loading Timer backbone"
        );
        let backbone = loader
            .load(&config.encoder_path, device)
            .map_err(|e| match e {
                Error::ModelLoad(_) => e,
                other => Error::ModelLoad(format!("{}: {other}", config.encoder_path)),
            })?;
        Self::from_backbone(backbone, config, device)
    }

    /// Wrap an already constructed backbone.
    pub fn from_backbone(backbone: B, config: &TimerEncoderConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        if backbone.hidden_size() != ENCODER_DIM {
            return Err(Error::ShapeMismatch(format!(
                "backbone hidden size {} does not match encoder dim {ENCODER_DIM}",
                backbone.hidden_size()
            )));
        }

        let adapter_vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&adapter_vars, DType::F32, device);
        let adapter = TimerAdapter::new(ENCODER_DIM, config.project_dim, config.hidden_dim, vb)?;
        tracing::info!(
            encoder_dim = ENCODER_DIM,
            hidden_dim = adapter.hidden_dim(),
            project_dim = adapter.project_dim(),
            train_mode = %config.train_mode,
            "Timer encoder ready"
        );

        Ok(Self {
            backbone,
            adapter,
            adapter_vars,
            device: device.clone(),
            train_mode: config.train_mode,
            prediction_length: PREDICTION_LENGTH,
        })
    }

    /// Encode a batch of series.
    ///
    /// Input: `[B, L]` with `L >= input_token_len`.
    /// Output: `[B, S, project_dim]` where `S` is the backbone's position count.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.check_input(x)?;

        let states = self.backbone.forward_hidden_states(x)?;
        let num_layers = states.len();
        // The adapter's parameters are F32 regardless of the backbone dtype.
        let hidden = states.into_last()?.to_dtype(DType::F32)?;

        let width = hidden.dim(D::Minus1)?;
        if width != self.adapter.encoder_dim() {
            return Err(Error::ShapeMismatch(format!(
                "backbone emitted hidden states {:?}, adapter expects last dim {}",
                hidden.dims(),
                self.adapter.encoder_dim()
            )));
        }
        tracing::debug!(
            input = ?x.dims(),
            hidden = ?hidden.dims(),
            num_layers,
            "Timer backbone forward"
        );

        self.adapter.forward(&hidden)
    }

    fn check_input(&self, x: &Tensor) -> Result<()> {
        let (_batch, lookback) = x.dims2().map_err(|_| {
            Error::ShapeMismatch(format!("expected [batch, lookback], got {:?}", x.dims()))
        })?;
        let token_len = self.backbone.input_token_len();
        if lookback < token_len {
            return Err(Error::ShapeMismatch(format!(
                "lookback {lookback} is shorter than the backbone's input token length {token_len}"
            )));
        }
        Ok(())
    }

    pub fn backbone(&self) -> &B {
        &self.backbone
    }

    pub fn adapter(&self) -> &TimerAdapter {
        &self.adapter
    }

    /// Trainable adapter variables, for an external optimizer.
    pub fn adapter_vars(&self) -> Vec<Var> {
        self.adapter_vars.all_vars()
    }

    /// Write adapter weights to a safetensors file.
    pub fn save_adapter(&self, path: impl AsRef<Path>) -> Result<()> {
        self.adapter_vars.save(path.as_ref())?;
        tracing::info!("Saved adapter weights to {:?}", path.as_ref());
        Ok(())
    }

    /// Overwrite adapter weights from a safetensors file written by [`Self::save_adapter`].
    pub fn load_adapter(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.adapter_vars.load(path.as_ref())?;
        tracing::info!("Loaded adapter weights from {:?}", path.as_ref());
        Ok(())
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn train_mode(&self) -> TrainMode {
        self.train_mode
    }

    pub fn prediction_length(&self) -> usize {
        self.prediction_length
    }

    pub fn encoder_dim(&self) -> usize {
        self.adapter.encoder_dim()
    }

    pub fn project_dim(&self) -> usize {
        self.adapter.project_dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::backbone::HiddenStates;
    use crate::model::backbone::patch::{
        CONFIG_FILE, PatchBackbone, PatchBackboneConfig, PatchBackboneLoader, WEIGHTS_FILE,
    };
    use std::cell::Cell;

    /// Emits `num_layers` constant layers of width `emit_width`, one position
    /// per `token_len` samples, and counts calls.
    struct FixedBackbone {
        reported_width: usize,
        emit_width: usize,
        token_len: usize,
        num_layers: usize,
        calls: Cell<usize>,
    }

    impl FixedBackbone {
        fn new() -> Self {
            Self {
                reported_width: ENCODER_DIM,
                emit_width: ENCODER_DIM,
                token_len: 96,
                num_layers: 3,
                calls: Cell::new(0),
            }
        }
    }

    impl SequenceBackbone for FixedBackbone {
        fn forward_hidden_states(&self, sequence: &Tensor) -> Result<HiddenStates> {
            self.calls.set(self.calls.get() + 1);
            let (batch, lookback) = sequence.dims2()?;
            let positions = lookback / self.token_len;
            let mut layers = Vec::with_capacity(self.num_layers);
            for i in 0..self.num_layers {
                let t = Tensor::ones((batch, positions, self.emit_width), DType::F32, sequence.device())?;
                layers.push((t * (i as f64 + 0.5))?);
            }
            Ok(HiddenStates::new(layers))
        }

        fn hidden_size(&self) -> usize {
            self.reported_width
        }

        fn input_token_len(&self) -> usize {
            self.token_len
        }
    }

    struct FailingLoader;

    impl BackboneLoader for FailingLoader {
        type Backbone = FixedBackbone;

        fn load(&self, _identifier: &str, _device: &Device) -> Result<FixedBackbone> {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "weights missing",
            )))
        }
    }

    fn config(project_dim: usize) -> TimerEncoderConfig {
        TimerEncoderConfig::new("test/backbone", project_dim, TrainMode::Adapter)
    }

    fn to_vec(t: Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1().unwrap()
    }

    #[test]
    fn test_forward_output_shape_matches_backbone_positions() {
        let device = Device::Cpu;
        let cfg = PatchBackboneConfig {
            intermediate_size: 64,
            num_hidden_layers: 2,
            ..Default::default()
        };
        let backbone_vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&backbone_vars, DType::F32, &device);
        let backbone = PatchBackbone::new(&cfg, vb).unwrap();

        let encoder = TimerEncoder::from_backbone(backbone, &config(64), &device).unwrap();
        let x = Tensor::randn(0.0_f32, 1.0, (2, 2880), &device).unwrap();
        let out = encoder.forward(&x).unwrap();
        // 2880 / 96 = 30 positions
        assert_eq!(out.dims(), &[2, 30, 64]);
    }

    #[test]
    fn test_default_projection_width() {
        let device = Device::Cpu;
        let encoder =
            TimerEncoder::from_backbone(FixedBackbone::new(), &config(1024), &device).unwrap();
        assert_eq!(encoder.encoder_dim(), 1024);
        assert_eq!(encoder.project_dim(), 1024);
        assert_eq!(encoder.adapter().hidden_dim(), 2048);
        assert_eq!(encoder.prediction_length(), 96);
        assert_eq!(encoder.train_mode(), TrainMode::Adapter);
        assert!(encoder.device().is_cpu());

        let x = Tensor::zeros((1, 960), DType::F32, &device).unwrap();
        let out = encoder.forward(&x).unwrap();
        assert_eq!(out.dims(), &[1, 10, 1024]);
    }

    #[test]
    fn test_forward_uses_last_layer() {
        let device = Device::Cpu;
        let encoder = TimerEncoder::from_backbone(FixedBackbone::new(), &config(8), &device).unwrap();
        let x = Tensor::zeros((1, 192), DType::F32, &device).unwrap();
        let out = encoder.forward(&x).unwrap();

        // Final layer of FixedBackbone is constant 2.5.
        let last = Tensor::full(2.5_f32, (1, 2, ENCODER_DIM), &device).unwrap();
        let expected = encoder.adapter().forward(&last).unwrap();
        let diff: f32 = (out - expected).unwrap().abs().unwrap().max_all().unwrap().to_scalar().unwrap();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_half_precision_backbone_feeds_f32_adapter() {
        let device = Device::Cpu;
        let cfg = PatchBackboneConfig {
            intermediate_size: 32,
            num_hidden_layers: 1,
            ..Default::default()
        };
        let backbone_vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&backbone_vars, DType::F32, &device);
        PatchBackbone::new(&cfg, vb).unwrap();

        let dir = tempfile::tempdir().unwrap();
        backbone_vars.save(dir.path().join(WEIGHTS_FILE)).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), serde_json::to_string(&cfg).unwrap()).unwrap();

        let loader = PatchBackboneLoader { dtype: DType::F16 };
        let encoder_cfg =
            TimerEncoderConfig::new(dir.path().to_str().unwrap(), 8, TrainMode::Adapter);
        let encoder = TimerEncoder::load(&encoder_cfg, &loader, &device).unwrap();

        let x = Tensor::randn(0.0_f32, 1.0, (1, 192), &device).unwrap();
        let out = encoder.forward(&x).unwrap();
        assert_eq!(out.dims(), &[1, 2, 8]);
        assert_eq!(out.dtype(), DType::F32);
    }

    #[test]
    fn test_invalid_identifier_is_model_load_error() {
        let device = Device::Cpu;
        let cfg = TimerEncoderConfig::new("/nonexistent/timer-base", 16, TrainMode::Adapter);
        let result = TimerEncoder::load(&cfg, &PatchBackboneLoader::default(), &device);
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }

    #[test]
    fn test_loader_errors_become_model_load() {
        let device = Device::Cpu;
        let result = TimerEncoder::load(&config(16), &FailingLoader, &device);
        match result {
            Err(Error::ModelLoad(msg)) => assert!(msg.contains("weights missing")),
            Err(other) => panic!("expected ModelLoad, got {other}"),
            Ok(_) => panic!("expected ModelLoad, got an encoder"),
        }
    }

    #[test]
    fn test_bad_input_rank_fails_before_backbone() {
        let device = Device::Cpu;
        let encoder = TimerEncoder::from_backbone(FixedBackbone::new(), &config(8), &device).unwrap();

        let x = Tensor::zeros((1, 10, 96), DType::F32, &device).unwrap();
        assert!(matches!(encoder.forward(&x), Err(Error::ShapeMismatch(_))));
        assert_eq!(encoder.backbone().calls.get(), 0);
    }

    #[test]
    fn test_short_lookback_fails_before_backbone() {
        let device = Device::Cpu;
        let encoder = TimerEncoder::from_backbone(FixedBackbone::new(), &config(8), &device).unwrap();

        let x = Tensor::zeros((1, 95), DType::F32, &device).unwrap();
        assert!(matches!(encoder.forward(&x), Err(Error::ShapeMismatch(_))));
        assert_eq!(encoder.backbone().calls.get(), 0);
    }

    #[test]
    fn test_wrong_emitted_width_fails_before_adapter() {
        let device = Device::Cpu;
        let backbone = FixedBackbone {
            emit_width: 512,
            ..FixedBackbone::new()
        };
        let encoder = TimerEncoder::from_backbone(backbone, &config(8), &device).unwrap();

        let x = Tensor::zeros((1, 96), DType::F32, &device).unwrap();
        assert!(matches!(encoder.forward(&x), Err(Error::ShapeMismatch(_))));
        assert_eq!(encoder.backbone().calls.get(), 1);
    }

    #[test]
    fn test_backbone_width_checked_at_construction() {
        let device = Device::Cpu;
        let backbone = FixedBackbone {
            reported_width: 768,
            ..FixedBackbone::new()
        };
        let result = TimerEncoder::from_backbone(backbone, &config(8), &device);
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_train_mode_does_not_change_output() {
        let device = Device::Cpu;
        let encoder = TimerEncoder::from_backbone(FixedBackbone::new(), &config(8), &device).unwrap();
        let frozen_cfg = TimerEncoderConfig::new("test/backbone", 8, TrainMode::Frozen);
        let mut frozen =
            TimerEncoder::from_backbone(FixedBackbone::new(), &frozen_cfg, &device).unwrap();
        assert_eq!(frozen.train_mode(), TrainMode::Frozen);

        // Give both the same adapter weights.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adapter.safetensors");
        encoder.save_adapter(&path).unwrap();
        frozen.load_adapter(&path).unwrap();

        let x = Tensor::zeros((1, 96), DType::F32, &device).unwrap();
        assert_eq!(
            to_vec(encoder.forward(&x).unwrap()),
            to_vec(frozen.forward(&x).unwrap())
        );
    }

    #[test]
    fn test_adapter_weights_round_trip() {
        let device = Device::Cpu;
        let source = TimerEncoder::from_backbone(FixedBackbone::new(), &config(8), &device).unwrap();
        let mut target = TimerEncoder::from_backbone(FixedBackbone::new(), &config(8), &device).unwrap();
        // 2 linears (weight + bias) + layer norm (weight + bias)
        assert_eq!(source.adapter_vars().len(), 6);

        let x = Tensor::zeros((1, 288), DType::F32, &device).unwrap();
        let before = to_vec(source.forward(&x).unwrap());
        assert_ne!(before, to_vec(target.forward(&x).unwrap()));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adapter.safetensors");
        source.save_adapter(&path).unwrap();
        target.load_adapter(&path).unwrap();

        assert_eq!(before, to_vec(target.forward(&x).unwrap()));
    }
}
