//! Build a backbone, run one forward pass, and report its feature shape.
//!
//! ```text
//! $ backbone_probe vgg --height 32 --width 320
//! $ backbone_probe --config densenet.json --save-config out.json
//! ```

use anyhow::{Context, bail};
use burn::backend::NdArray;
use burn::prelude::{Backend, Tensor};
use clap::Parser;
use recbone::models::backbone::{BackboneConfig, BackboneMeta, FeatureShape};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

type ProbeBackend = NdArray<f32>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Backbone name: cnn_lite, vgg, resnet, or densenet.
    #[arg(default_value = "cnn_lite")]
    backbone: String,

    /// Load the backbone config from a JSON file; overrides the name.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save the resolved backbone config to a JSON file.
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Input image channels.
    #[arg(long, default_value_t = 3)]
    in_channels: usize,

    /// Input batch size.
    #[arg(short, long, default_value_t = 1)]
    batch: usize,

    /// Input image height.
    #[arg(long, default_value_t = 32)]
    height: usize,

    /// Input image width.
    #[arg(long, default_value_t = 320)]
    width: usize,
}

/// The probe report.
#[derive(Serialize, Debug)]
struct ProbeReport {
    backbone: &'static str,
    in_channels: usize,
    out_channels: usize,
    input: [usize; 4],
    predicted: FeatureShape,
    observed: [usize; 4],
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "backbone_probe=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BackboneConfig::load_json(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BackboneConfig::from_name(&args.backbone, args.in_channels)?,
    };

    if let Some(path) = &args.save_config {
        config
            .save_json(path)
            .with_context(|| format!("saving {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved backbone config");
    }

    let device = Default::default();
    let report = probe::<ProbeBackend>(&config, &args, &device)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn probe<B: Backend>(
    config: &BackboneConfig,
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<ProbeReport> {
    let resolution = [args.height, args.width];
    let Some(predicted) = config.output_shape(resolution) else {
        bail!(
            "{} cannot process a {}x{} input",
            config.name(),
            args.height,
            args.width
        );
    };

    tracing::info!(
        backbone = config.name(),
        height = args.height,
        width = args.width,
        "building backbone"
    );
    let model = config.init::<B>(device);

    let input_dims = [args.batch, config.in_channels(), args.height, args.width];
    let input: Tensor<B, 4> = Tensor::zeros(input_dims, device);
    let observed = model.forward(input).dims();

    if observed != predicted.dims(args.batch) {
        tracing::warn!(?observed, ?predicted, "observed shape differs from prediction");
    }

    Ok(ProbeReport {
        backbone: model.name(),
        in_channels: model.in_channels(),
        out_channels: model.out_channels(),
        input: input_dims,
        predicted,
        observed,
    })
}
