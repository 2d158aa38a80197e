// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and hands off to Layer 2.
//
//   evaluate         — run the evaluation driver on a checkpoint
//   init-checkpoint  — write a fresh reference checkpoint
//
// The backend is picked here and nowhere else; everything below
// is generic over it.

pub mod commands;

use anyhow::Result;
use burn::backend::{Autodiff, NdArray, Wgpu};
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;
use commands::{BackendKind, Commands, EvaluateArgs, InitArgs};

use crate::application::evaluate_use_case::{EvalConfig, EvaluationReport, Evaluator};
use crate::application::init_use_case::InitCheckpointUseCase;

#[derive(Parser, Debug)]
#[command(
    name = "omr-eval",
    version,
    about = "Evaluate music-notation segmentation checkpoints with a simulated training run."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Evaluate(args)       => run_evaluate(args),
            Commands::InitCheckpoint(args) => run_init(args),
        }
    }
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => EvalConfig::from_json_file(path)?,
        None       => EvalConfig::default(),
    };
    let backend = args.backend;
    let config  = args.apply_to(base);

    tracing::info!(
        "Evaluating '{}' on '{}' ({} layout, {:?} backend)",
        config.checkpoint_path.display(),
        config.dataset_path.display(),
        config.data_model,
        backend
    );

    let report = match backend {
        BackendKind::Wgpu    => evaluate_on::<Autodiff<Wgpu>>(config)?,
        BackendKind::Ndarray => evaluate_on::<Autodiff<NdArray>>(config)?,
    };

    println!("\nSimulated Training Metrics (Last Epoch):");
    for (name, value) in &report.train {
        println!("  {name}: {value:.4}");
    }
    println!("Validation Metrics (Last Epoch):");
    for (name, value) in &report.val {
        println!("  {name}: {value:.4}");
    }
    println!("\nFinal simulated metrics saved to {}", report.artifacts.metrics.display());
    println!("Training history plot saved to {}", report.artifacts.plot.display());
    Ok(())
}

fn evaluate_on<B: AutodiffBackend>(config: EvalConfig) -> Result<EvaluationReport> {
    let device = B::Device::default();
    tracing::info!("Using device: {:?}", device);
    Ok(Evaluator::<B>::new(config, device).run()?)
}

fn run_init(args: InitArgs) -> Result<()> {
    let dir = InitCheckpointUseCase::new(args.into()).execute()?;
    println!("Checkpoint written to {}", dir.display());
    Ok(())
}
