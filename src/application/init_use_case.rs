// ============================================================
// Layer 2 — InitCheckpointUseCase
// ============================================================
// Writes a freshly initialised reference checkpoint that the
// evaluate command can load straight away:
//
//   Step 1: Build the architecture (tiny_conv or micro_conv)
//   Step 2: Glorot-uniform kernels, zero biases, identity BN
//   Step 3: Save arch.json, weights.safetensors, metadata.json

use anyhow::{Context, Result};
use chrono::Local;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt, path::PathBuf, str::FromStr};

use crate::domain::classes::CHANNEL_NUM;
use crate::infra::checkpoint::{CheckpointStore, Metadata};
use crate::ml::model::{ArchSpec, Precision};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceModel {
    #[default]
    TinyConv,
    MicroConv,
}

impl ReferenceModel {
    pub fn arch(self, win_size: usize) -> ArchSpec {
        match self {
            Self::TinyConv  => ArchSpec::tiny_conv(win_size, CHANNEL_NUM),
            Self::MicroConv => ArchSpec::micro_conv(win_size, CHANNEL_NUM),
        }
    }
}

impl fmt::Display for ReferenceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TinyConv  => "tiny_conv",
            Self::MicroConv => "micro_conv",
        })
    }
}

impl FromStr for ReferenceModel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tiny_conv"  => Ok(Self::TinyConv),
            "micro_conv" => Ok(Self::MicroConv),
            other        => Err(format!("unknown model '{other}', expected tiny_conv or micro_conv")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    pub output_dir: PathBuf,
    pub model:      ReferenceModel,
    pub win_size:   usize,
    pub seed:       Option<u64>,
    pub precision:  Precision,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("checkpoints/seg_net"),
            model:      ReferenceModel::default(),
            win_size:   256,
            seed:       None,
            precision:  Precision::default(),
        }
    }
}

pub struct InitCheckpointUseCase {
    config: InitConfig,
}

impl InitCheckpointUseCase {
    pub fn new(config: InitConfig) -> Self {
        Self { config }
    }

    /// Returns the checkpoint directory that was written.
    pub fn execute(&self) -> Result<PathBuf> {
        let cfg = &self.config;

        let spec = cfg.model.arch(cfg.win_size);
        let seed = cfg.seed.unwrap_or_else(rand::random);
        let weights = spec
            .init_weights(&mut StdRng::seed_from_u64(seed))
            .with_context(|| format!("Cannot build {} for a {}px window", cfg.model, cfg.win_size))?;
        let num_params: usize = weights.values().map(|t| t.data.len()).sum();

        let mut metadata = Metadata::new();
        metadata.insert("model".into(),       json!(cfg.model.to_string()));
        metadata.insert("win_size".into(),    json!(cfg.win_size));
        metadata.insert("channel_num".into(), json!(CHANNEL_NUM));
        metadata.insert("precision".into(),   json!(cfg.precision));
        metadata.insert("seed".into(),        json!(seed));
        metadata.insert("created".into(),     json!(Local::now().to_rfc3339()));

        CheckpointStore::new(&cfg.output_dir).save(&spec, &weights, &metadata, cfg.precision)?;

        tracing::info!(
            "Initialised {} ({} parameters, {}px window, seed {}) in '{}'",
            cfg.model,
            num_params,
            cfg.win_size,
            seed,
            cfg.output_dir.display()
        );
        Ok(cfg.output_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn written_checkpoint_loads_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = InitConfig {
            output_dir: dir.path().join("tiny"),
            model:      ReferenceModel::TinyConv,
            win_size:   32,
            seed:       Some(9),
            precision:  Precision::Float32,
        };
        let out = InitCheckpointUseCase::new(cfg).execute().unwrap();

        let ckpt = CheckpointStore::new(&out)
            .load::<NdArray>(Precision::Float32, &Default::default())
            .unwrap();
        assert_eq!(ckpt.win_size(), 32);
        assert_eq!(ckpt.metadata["model"], json!("tiny_conv"));
        assert_eq!(ckpt.metadata["channel_num"], json!(CHANNEL_NUM));
        assert_eq!(ckpt.metadata["seed"], json!(9));
        assert!(ckpt.metadata.contains_key("created"));
    }

    #[test]
    fn odd_window_cannot_host_tiny_conv() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = InitConfig { output_dir: dir.path().join("x"), win_size: 33, ..InitConfig::default() };
        assert!(InitCheckpointUseCase::new(cfg).execute().is_err());
        assert!(!dir.path().join("x").exists());
    }

    #[test]
    fn model_names_parse() {
        assert_eq!("micro_conv".parse::<ReferenceModel>(), Ok(ReferenceModel::MicroConv));
        assert!("unet".parse::<ReferenceModel>().is_err());
    }
}
