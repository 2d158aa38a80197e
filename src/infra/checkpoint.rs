// ============================================================
// Layer 6 — Checkpoint Store
// ============================================================
// Reads (and writes) a checkpoint directory:
//
//   <checkpoint>/
//     arch.json            ← ArchSpec, tagged layer list
//     weights.safetensors  ← f32 or f16 tensors keyed <layer>.<param>
//     metadata.json        ← optional free-form JSON object
//
// Loading order:
//   1. parse arch.json and validate the layer graph
//   2. require the output channel count to be CHANNEL_NUM
//   3. decode the weight blob
//   4. require the blob's key set and shapes to match the
//      architecture's parameter list exactly
//   5. bind the weights onto a fresh SegmentationNet
//   6. read metadata.json, or return an empty map if absent
//
// The returned model is never written back; evaluation only
// reads it.
//
// Reference: Burn Book §5 (Records and Checkpointing)
//            safetensors format specification

use anyhow::{Context, Result};
use burn::prelude::*;
use safetensors::{tensor::{Dtype, TensorView}, SafeTensors};
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::classes::CHANNEL_NUM;
use crate::error::CheckpointCorruptError;
use crate::ml::model::{ArchPlan, ArchSpec, HostTensor, Precision, SegmentationNet, WeightMap};

pub const ARCH_FILE:     &str = "arch.json";
pub const WEIGHTS_FILE:  &str = "weights.safetensors";
pub const METADATA_FILE: &str = "metadata.json";

/// Free-form checkpoint metadata (training config, window size, ...).
pub type Metadata = Map<String, Value>;

/// Everything `load` hands back to the driver.
#[derive(Debug)]
pub struct LoadedCheckpoint<B: Backend> {
    pub model:    SegmentationNet<B>,
    pub arch:     ArchSpec,
    pub metadata: Metadata,
}

impl<B: Backend> LoadedCheckpoint<B> {
    pub fn win_size(&self) -> usize {
        self.model.win_size()
    }
}

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_required(&self, name: &str) -> Result<(PathBuf, Vec<u8>), CheckpointCorruptError> {
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(CheckpointCorruptError::MissingFile { path });
        }
        let bytes = fs::read(&path).map_err(|source| CheckpointCorruptError::Io { path: path.clone(), source })?;
        Ok((path, bytes))
    }

    pub fn read_arch(&self) -> Result<ArchSpec, CheckpointCorruptError> {
        let (path, bytes) = self.read_required(ARCH_FILE)?;
        serde_json::from_slice(&bytes).map_err(|source| CheckpointCorruptError::ArchitectureParse { path, source })
    }

    pub fn read_weights(&self) -> Result<WeightMap, CheckpointCorruptError> {
        let (path, bytes) = self.read_required(WEIGHTS_FILE)?;
        let st = SafeTensors::deserialize(&bytes).map_err(|e| CheckpointCorruptError::WeightBlob {
            path:   path.clone(),
            reason: e.to_string(),
        })?;

        let mut weights = WeightMap::new();
        for (name, view) in st.tensors() {
            let data = decode_view(&name, &view)?;
            weights.insert(name, HostTensor { shape: view.shape().to_vec(), data });
        }
        tracing::debug!("Decoded {} weight tensors from '{}'", weights.len(), path.display());
        Ok(weights)
    }

    /// Missing metadata is not an error; anything other than a JSON object is.
    pub fn read_metadata(&self) -> Result<Metadata, CheckpointCorruptError> {
        let path = self.dir.join(METADATA_FILE);
        if !path.is_file() {
            tracing::debug!("No {} in '{}'", METADATA_FILE, self.dir.display());
            return Ok(Metadata::new());
        }
        let bytes = fs::read(&path).map_err(|source| CheckpointCorruptError::Io { path: path.clone(), source })?;
        serde_json::from_slice(&bytes).map_err(|source| CheckpointCorruptError::Metadata { path, source })
    }

    pub fn load<B: Backend>(
        &self,
        precision: Precision,
        device:    &B::Device,
    ) -> Result<LoadedCheckpoint<B>, CheckpointCorruptError> {
        let arch = self.read_arch()?;
        let plan = arch.plan()?;
        if plan.out_channels != CHANNEL_NUM {
            return Err(CheckpointCorruptError::Architecture(format!(
                "model predicts {} channels, expected {CHANNEL_NUM}",
                plan.out_channels
            )));
        }

        let weights = self.read_weights()?;
        check_weights(&plan, &weights)?;

        let model    = SegmentationNet::build(&arch, &weights, precision, device)?;
        let metadata = self.read_metadata()?;

        tracing::info!(
            "Loaded '{}' from '{}' ({} tensors, {}px window, {:?})",
            arch.name,
            self.dir.display(),
            weights.len(),
            plan.win_size(),
            precision
        );
        Ok(LoadedCheckpoint { model, arch, metadata })
    }

    /// Write all three files, creating the directory if needed.
    /// MixedFloat16 stores the blob as f16.
    pub fn save(
        &self,
        arch:      &ArchSpec,
        weights:   &WeightMap,
        metadata:  &Metadata,
        precision: Precision,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", self.dir.display()))?;

        let arch_path = self.dir.join(ARCH_FILE);
        fs::write(&arch_path, serde_json::to_string_pretty(arch)?)
            .with_context(|| format!("Cannot write '{}'", arch_path.display()))?;

        let (dtype, encoded): (Dtype, Vec<(&str, Vec<u8>, &[usize])>) = match precision {
            Precision::Float32 => (
                Dtype::F32,
                weights
                    .iter()
                    .map(|(name, t)| (name.as_str(), t.data.iter().flat_map(|v| v.to_le_bytes()).collect(), t.shape.as_slice()))
                    .collect(),
            ),
            Precision::MixedFloat16 => (
                Dtype::F16,
                weights
                    .iter()
                    .map(|(name, t)| {
                        let bytes = t.data.iter().flat_map(|&v| half::f16::from_f32(v).to_le_bytes()).collect();
                        (name.as_str(), bytes, t.shape.as_slice())
                    })
                    .collect(),
            ),
        };

        let views = encoded
            .iter()
            .map(|(name, bytes, shape)| {
                TensorView::new(dtype, shape.to_vec(), bytes)
                    .map(|view| (*name, view))
                    .with_context(|| format!("Weight '{name}' does not match its shape {shape:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let blob = safetensors::serialize(views, &None).context("SafeTensors serialisation failed")?;
        let weights_path = self.dir.join(WEIGHTS_FILE);
        fs::write(&weights_path, blob).with_context(|| format!("Cannot write '{}'", weights_path.display()))?;

        let meta_path = self.dir.join(METADATA_FILE);
        fs::write(&meta_path, serde_json::to_string_pretty(metadata)?)
            .with_context(|| format!("Cannot write '{}'", meta_path.display()))?;

        tracing::debug!("Saved checkpoint to '{}'", self.dir.display());
        Ok(())
    }
}

fn decode_view(name: &str, view: &TensorView<'_>) -> Result<Vec<f32>, CheckpointCorruptError> {
    let bytes = view.data();
    match view.dtype() {
        Dtype::F32 => Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()),
        Dtype::F16 => Ok(bytes
            .chunks_exact(2)
            .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect()),
        other => Err(CheckpointCorruptError::UnsupportedDtype {
            name:  name.to_string(),
            dtype: format!("{other:?}"),
        }),
    }
}

/// The blob must hold exactly the architecture's parameters, shape for shape.
pub fn check_weights(plan: &ArchPlan, weights: &WeightMap) -> Result<(), CheckpointCorruptError> {
    for p in &plan.params {
        let found = weights
            .get(&p.name)
            .ok_or_else(|| CheckpointCorruptError::MissingWeight { name: p.name.clone() })?;
        if found.shape != p.shape {
            return Err(CheckpointCorruptError::ShapeMismatch {
                name:     p.name.clone(),
                expected: p.shape.clone(),
                found:    found.shape.clone(),
            });
        }
    }
    if let Some(extra) = weights.keys().find(|k| !plan.params.iter().any(|p| &p.name == *k)) {
        return Err(CheckpointCorruptError::UnexpectedWeight { name: extra.clone() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rand::{rngs::StdRng, SeedableRng};

    use crate::testutil;

    type B = NdArray;

    fn load(dir: &Path) -> Result<LoadedCheckpoint<B>, CheckpointCorruptError> {
        CheckpointStore::new(dir).load::<B>(Precision::Float32, &Default::default())
    }

    #[test]
    fn saved_checkpoint_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_checkpoint(dir.path(), 32);

        let ckpt = load(dir.path()).unwrap();
        assert_eq!(ckpt.win_size(), 32);
        assert_eq!(ckpt.arch.name, "micro_conv");
        assert_eq!(ckpt.metadata["win_size"], Value::from(32));
    }

    #[test]
    fn missing_weights_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_checkpoint(dir.path(), 16);
        fs::remove_file(dir.path().join(WEIGHTS_FILE)).unwrap();

        assert!(matches!(load(dir.path()), Err(CheckpointCorruptError::MissingFile { .. })));
    }

    #[test]
    fn missing_metadata_gives_an_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_checkpoint(dir.path(), 16);
        fs::remove_file(dir.path().join(METADATA_FILE)).unwrap();

        assert!(load(dir.path()).unwrap().metadata.is_empty());
    }

    #[test]
    fn weight_key_set_must_match_exactly() {
        let spec = ArchSpec::micro_conv(16, CHANNEL_NUM);
        let plan = spec.plan().unwrap();
        let good = spec.init_weights(&mut StdRng::seed_from_u64(0)).unwrap();
        assert!(check_weights(&plan, &good).is_ok());

        let mut missing = good.clone();
        missing.remove("head.bias");
        assert!(matches!(check_weights(&plan, &missing), Err(CheckpointCorruptError::MissingWeight { name }) if name == "head.bias"));

        let mut reshaped = good.clone();
        reshaped.insert("head.bias".into(), HostTensor { shape: vec![3], data: vec![0.0; 3] });
        assert!(matches!(check_weights(&plan, &reshaped), Err(CheckpointCorruptError::ShapeMismatch { .. })));

        let mut extra = good;
        extra.insert("ghost.kernel".into(), HostTensor { shape: vec![1], data: vec![0.0] });
        assert!(matches!(check_weights(&plan, &extra), Err(CheckpointCorruptError::UnexpectedWeight { .. })));
    }

    #[test]
    fn unknown_layer_type_fails_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_checkpoint(dir.path(), 16);
        fs::write(
            dir.path().join(ARCH_FILE),
            r#"{"name":"x","layers":[{"type":"input","name":"in","shape":[16,16,3]},{"type":"lstm","name":"l"}]}"#,
        )
        .unwrap();

        assert!(matches!(load(dir.path()), Err(CheckpointCorruptError::ArchitectureParse { .. })));
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let dir  = tempfile::tempdir().unwrap();
        let spec = ArchSpec::micro_conv(16, 2);
        let weights = spec.init_weights(&mut StdRng::seed_from_u64(0)).unwrap();
        CheckpointStore::new(dir.path())
            .save(&spec, &weights, &Metadata::new(), Precision::Float32)
            .unwrap();

        assert!(matches!(load(dir.path()), Err(CheckpointCorruptError::Architecture(_))));
    }

    #[test]
    fn half_precision_blob_decodes_to_rounded_values() {
        let dir     = tempfile::tempdir().unwrap();
        let spec    = ArchSpec::micro_conv(16, CHANNEL_NUM);
        let weights = spec.init_weights(&mut StdRng::seed_from_u64(5)).unwrap();
        let store   = CheckpointStore::new(dir.path());
        store.save(&spec, &weights, &Metadata::new(), Precision::MixedFloat16).unwrap();

        let decoded = store.read_weights().unwrap();
        let before  = &weights["block1_conv.kernel"];
        let after   = &decoded["block1_conv.kernel"];
        assert_eq!(before.shape, after.shape);
        assert_eq!(after.data, Precision::MixedFloat16.quantize(&before.data));
        assert!(store.load::<B>(Precision::MixedFloat16, &Default::default()).is_ok());
    }

    #[test]
    fn garbage_blob_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_checkpoint(dir.path(), 16);
        fs::write(dir.path().join(WEIGHTS_FILE), b"not a safetensors file").unwrap();

        assert!(matches!(load(dir.path()), Err(CheckpointCorruptError::WeightBlob { .. })));
    }
}
