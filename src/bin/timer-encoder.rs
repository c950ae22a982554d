//! Timer encoder smoke test.
//!
//! Builds an encoder, runs one forward pass on a random `[batch, lookback]`
//! series and prints the output shape.
//!
//! Without `--checkpoint` the backbone is randomly initialised, so the run
//! needs no downloads. With it, the checkpoint is resolved from a local
//! directory or the HuggingFace Hub.

use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::Parser;
use timer_encoder_rs::{
    config::{TimerEncoderConfig, TrainMode},
    device::parse_device,
    model::backbone::patch::{PatchBackbone, PatchBackboneConfig, PatchBackboneLoader},
    model::encoder::TimerEncoder,
};

#[derive(Parser, Debug)]
#[command(
    name = "timer-encoder",
    about = "Run one forward pass of the Timer encoder and print the output shape"
)]
struct Args {
    /// Backbone checkpoint: local directory or HuggingFace repo id holding a
    /// patch-backbone `config.json` and `model.safetensors`. Omit to use a
    /// randomly initialised backbone. Upstream Timer checkpoints such as
    /// thuml/timer-base-84m use different tensor names: they are downloaded
    /// and then rejected with a model-load error.
    #[arg(long)]
    checkpoint: Option<String>,

    /// Output embedding width.
    #[arg(long, default_value_t = 1024)]
    project_dim: usize,

    /// Training-mode tag (adapter, full, frozen). Informational only.
    #[arg(long, default_value = "adapter")]
    train_mode: TrainMode,

    /// Compute device: cpu, cuda, cuda:N, metal.
    #[arg(long, default_value = "cuda")]
    device: String,

    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// Number of raw samples per series.
    #[arg(long, default_value_t = 2880)]
    lookback: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.project_dim == 0 {
        anyhow::bail!("project_dim must be positive");
    }

    let device = parse_device(&args.device)?;
    tracing::info!("Using device: {:?}", device);

    let encoder = match &args.checkpoint {
        Some(path) => {
            let config = TimerEncoderConfig::new(path.clone(), args.project_dim, args.train_mode);
            TimerEncoder::load(&config, &PatchBackboneLoader::default(), &device)
                .map_err(|e| anyhow::anyhow!("failed to load encoder: {e}"))?
        }
        None => {
            tracing::info!("No checkpoint given, using a randomly initialised backbone");
            let config = TimerEncoderConfig {
                project_dim: args.project_dim,
                train_mode: args.train_mode,
                ..TimerEncoderConfig::default()
            };
            let backbone_vars = VarMap::new();
            let vb = VarBuilder::from_varmap(&backbone_vars, DType::F32, &device);
            let backbone = PatchBackbone::new(&PatchBackboneConfig::default(), vb)?;
            TimerEncoder::from_backbone(backbone, &config, &device)?
        }
    };

    let x = Tensor::randn(0.0_f32, 1.0, (args.batch_size, args.lookback), &device)?;
    let outputs = encoder
        .forward(&x)
        .map_err(|e| anyhow::anyhow!("forward failed: {e}"))?;

    println!("last hidden_states shape: {:?}", outputs.dims());
    println!("timer encoder test pass");

    Ok(())
}
