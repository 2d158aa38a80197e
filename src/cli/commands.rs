// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Two subcommands: `evaluate` and `init-checkpoint`.
//
// `evaluate` flags are all optional so they can sit on top of a
// JSON config (--config): defaults < config file < flags.

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::application::evaluate_use_case::EvalConfig;
use crate::application::init_use_case::{InitConfig, ReferenceModel};
use crate::data::window::SmallSourcePolicy;
use crate::ml::model::Precision;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Simulate training on a checkpoint and write metrics + history plot
    Evaluate(EvaluateArgs),

    /// Write a freshly initialised reference checkpoint
    InitCheckpoint(InitArgs),
}

/// Tensor backend the run executes on.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// GPU through wgpu
    #[default]
    Wgpu,
    /// CPU ndarray
    Ndarray,
}

#[derive(Args, Debug, Default)]
pub struct EvaluateArgs {
    /// JSON file with EvalConfig fields; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Checkpoint directory (arch.json, weights.safetensors, metadata.json)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Dataset root
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// "segnet" for the dense layout, anything else for CVC-like
    #[arg(long)]
    pub data_model: Option<String>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Training batches per epoch
    #[arg(long)]
    pub steps: Option<usize>,

    /// Validation batches per epoch
    #[arg(long)]
    pub val_steps: Option<usize>,

    #[arg(long)]
    pub epochs: Option<usize>,

    /// Fraction of pages routed to validation
    #[arg(long)]
    pub val_fraction: Option<f64>,

    /// Seed for the page split and window sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// float32 | mixed_float16
    #[arg(long)]
    pub precision: Option<Precision>,

    /// What to do with pages smaller than the window: pad | reject
    #[arg(long)]
    pub small_source: Option<SmallSourcePolicy>,

    #[arg(long, value_enum, default_value_t = BackendKind::Wgpu)]
    pub backend: BackendKind,
}

impl EvaluateArgs {
    /// Lay the flags that were given over `base`.
    pub fn apply_to(self, base: EvalConfig) -> EvalConfig {
        EvalConfig {
            checkpoint_path:     self.checkpoint.unwrap_or(base.checkpoint_path),
            dataset_path:        self.dataset.unwrap_or(base.dataset_path),
            data_model:          self.data_model.unwrap_or(base.data_model),
            batch_size:          self.batch_size.unwrap_or(base.batch_size),
            steps:               self.steps.unwrap_or(base.steps),
            val_steps:           self.val_steps.unwrap_or(base.val_steps),
            epochs:              self.epochs.unwrap_or(base.epochs),
            val_fraction:        self.val_fraction.unwrap_or(base.val_fraction),
            seed:                self.seed.or(base.seed),
            precision:           self.precision.unwrap_or(base.precision),
            small_source_policy: self.small_source.unwrap_or(base.small_source_policy),
        }
    }
}

/// Flags over the built-in defaults, ignoring any --config file.
impl From<EvaluateArgs> for EvalConfig {
    fn from(a: EvaluateArgs) -> Self {
        a.apply_to(EvalConfig::default())
    }
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to write the checkpoint into
    #[arg(long, default_value = "checkpoints/seg_net")]
    pub output: PathBuf,

    /// tiny_conv | micro_conv
    #[arg(long, default_value = "tiny_conv")]
    pub model: ReferenceModel,

    /// Side of the square input window
    #[arg(long, default_value_t = 256)]
    pub win_size: usize,

    #[arg(long)]
    pub seed: Option<u64>,

    /// float32 | mixed_float16 (the latter stores f16 weights)
    #[arg(long, default_value = "float32")]
    pub precision: Precision,
}

impl From<InitArgs> for InitConfig {
    fn from(a: InitArgs) -> Self {
        InitConfig {
            output_dir: a.output,
            model:      a.model,
            win_size:   a.win_size,
            seed:       a.seed,
            precision:  a.precision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn flags_override_config_values() {
        let base = EvalConfig { epochs: 3, batch_size: 2, ..EvalConfig::default() };
        let args = EvaluateArgs { epochs: Some(5), seed: Some(1), ..EvaluateArgs::default() };
        let cfg  = args.apply_to(base);
        assert_eq!(cfg.epochs, 5);
        assert_eq!(cfg.batch_size, 2);
        assert_eq!(cfg.seed, Some(1));
    }

    #[test]
    fn evaluate_command_parses() {
        let cli = Cli::try_parse_from([
            "omr-eval", "evaluate",
            "--checkpoint", "ckpt/seg_net",
            "--dataset", "ds",
            "--data-model", "cvc",
            "--precision", "mixed_float16",
            "--small-source", "reject",
            "--backend", "ndarray",
        ])
        .unwrap();

        let Commands::Evaluate(args) = cli.command else { panic!("expected evaluate") };
        assert_eq!(args.backend, BackendKind::Ndarray);
        let cfg: EvalConfig = args.into();
        assert_eq!(cfg.checkpoint_path, PathBuf::from("ckpt/seg_net"));
        assert_eq!(cfg.data_model, "cvc");
        assert_eq!(cfg.precision, Precision::MixedFloat16);
        assert_eq!(cfg.small_source_policy, SmallSourcePolicy::Reject);
        assert_eq!(cfg.steps, 100);
    }

    #[test]
    fn init_command_rejects_unknown_models() {
        assert!(Cli::try_parse_from(["omr-eval", "init-checkpoint", "--model", "unet"]).is_err());
        assert!(Cli::try_parse_from(["omr-eval", "init-checkpoint", "--model", "micro_conv", "--win-size", "64"]).is_ok());
    }
}
