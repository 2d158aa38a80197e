// ============================================================
// Layer 2 — EvaluateUseCase (Evaluation Driver)
// ============================================================
// Runs one evaluation of a checkpoint as a linear state machine:
//
//   LOADING     read arch + weights (+ metadata), take win_size
//               from the model's input shape
//   SPLITTING   resolve dataset entries, split by page
//   SIMULATING  epochs × (steps train + val_steps validation)
//               batches at learning rate 0
//   REPORTING   history plot, then final-epoch metrics file
//   DONE        final (train, val) metric maps returned
//
// Any state may move to FAILED. Checkpoint and dataset problems
// surface as their own error types; anything going wrong while
// simulating or reporting (panics from the tensor backend
// included) is wrapped in EvaluationError with the stage it hit.
// Artifacts are only written once every value is computed, and
// a failed run leaves no metrics file behind.
//
// Reference: Burn Book §5 (Training)

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::tensor::backend::AutodiffBackend;
use chrono::Local;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::{
    resolver::{resolve, DatasetLayout},
    splitter::{split_by_page, DEFAULT_VAL_FRACTION},
    window::{SmallSourcePolicy, WindowLoader},
};
use crate::domain::history::{MetricMap, TrainingHistory};
use crate::error::{EvalError, EvaluationError, LoaderError};
use crate::infra::{
    checkpoint::{CheckpointStore, Metadata},
    metrics::{plots_dir_for, reserve_paths, run_stamp, write_metrics, ArtifactPaths},
    plot::save_history_plot,
};
use crate::ml::{
    model::Precision,
    simulator::{simulate, SimulationPlan},
};

// ─── Evaluation Configuration ────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvalConfig {
    pub checkpoint_path:     PathBuf,
    pub dataset_path:        PathBuf,
    /// "segnet" for the dense layout, anything else for CVC-like
    pub data_model:          String,
    pub batch_size:          usize,
    pub steps:               usize,
    pub val_steps:           usize,
    pub epochs:              usize,
    pub val_fraction:        f64,
    /// Drives the page shuffle and both loaders; drawn at random when unset
    pub seed:                Option<u64>,
    pub precision:           Precision,
    pub small_source_policy: SmallSourcePolicy,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            checkpoint_path:     PathBuf::from("checkpoints/seg_net"),
            dataset_path:        PathBuf::from("ds2_dense"),
            data_model:          "segnet".to_string(),
            batch_size:          8,
            steps:               100,
            val_steps:           50,
            epochs:              10,
            val_fraction:        DEFAULT_VAL_FRACTION,
            seed:                None,
            precision:           Precision::default(),
            small_source_policy: SmallSourcePolicy::default(),
        }
    }
}

impl EvalConfig {
    /// Read a JSON config; fields it leaves out keep their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config '{}'", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config '{}'", path.display()))
    }
}

// ─── State machine ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalState {
    Idle,
    Loading,
    Splitting,
    Simulating,
    Reporting,
    Done,
    Failed,
}

impl fmt::Display for EvalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle       => "idle",
            Self::Loading    => "loading",
            Self::Splitting  => "splitting",
            Self::Simulating => "simulating",
            Self::Reporting  => "reporting",
            Self::Done       => "done",
            Self::Failed     => "failed",
        };
        f.write_str(s)
    }
}

/// Page and entry counts on each side of the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSummary {
    pub train_pages:   usize,
    pub val_pages:     usize,
    pub train_entries: usize,
    pub val_entries:   usize,
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub train:     MetricMap,
    pub val:       MetricMap,
    pub history:   TrainingHistory,
    pub artifacts: ArtifactPaths,
    pub metadata:  Metadata,
    pub split:     SplitSummary,
    pub seed:      u64,
}

pub struct Evaluator<B: AutodiffBackend> {
    config: EvalConfig,
    device: B::Device,
    state:  EvalState,
}

impl<B: AutodiffBackend> Evaluator<B> {
    pub fn new(config: EvalConfig, device: B::Device) -> Self {
        Self { config, device, state: EvalState::Idle }
    }

    pub fn state(&self) -> EvalState {
        self.state
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    fn enter(&mut self, next: EvalState) {
        tracing::info!("Evaluation state: {} → {}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: impl Into<EvalError>) -> EvalError {
        let err = err.into();
        tracing::error!("Evaluation failed while {}: {}", self.state, ErrorChain(&err));
        self.state = EvalState::Failed;
        err
    }

    fn stage_error(&mut self, source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> EvalError {
        let stage = self.state;
        self.fail(EvaluationError::new(stage, source))
    }

    /// Run every state once, start to finish.
    pub fn run(&mut self) -> Result<EvaluationReport, EvalError> {
        let cfg = self.config.clone();

        // ── LOADING ───────────────────────────────────────────────────────────
        self.enter(EvalState::Loading);
        let checkpoint = CheckpointStore::new(&cfg.checkpoint_path)
            .load::<B>(cfg.precision, &self.device)
            .map_err(|e| self.fail(e))?;
        let win_size = checkpoint.win_size();
        if let Some(declared) = checkpoint.metadata.get("win_size").and_then(|v| v.as_u64()) {
            if declared as usize != win_size {
                tracing::warn!(
                    "Metadata declares win_size {} but the model input is {}px; using the model's",
                    declared,
                    win_size
                );
            }
        }

        // ── SPLITTING ─────────────────────────────────────────────────────────
        self.enter(EvalState::Splitting);
        let layout  = DatasetLayout::from_discriminator(&cfg.data_model);
        let entries = resolve(&cfg.dataset_path, layout).map_err(|e| self.fail(e))?;

        let seed = cfg.seed.unwrap_or_else(rand::random);
        tracing::info!("Run seed: {}", seed);
        let mut rng = StdRng::seed_from_u64(seed);

        let split = split_by_page(entries, cfg.val_fraction, &mut rng);
        let summary = SplitSummary {
            train_pages:   split.train_pages().len(),
            val_pages:     split.val_pages().len(),
            train_entries: split.train.len(),
            val_entries:   split.val.len(),
        };

        // ── SIMULATING ────────────────────────────────────────────────────────
        self.enter(EvalState::Simulating);
        if cfg.batch_size == 0 {
            return Err(self.stage_error(LoaderError::ZeroBatchSize));
        }
        if split.train.is_empty() {
            return Err(self.stage_error(LoaderError::NoEntries));
        }

        let decoder = layout.decoder();
        let mut train_loader = WindowLoader::new(
            split.train,
            decoder.clone(),
            win_size,
            cfg.steps * cfg.batch_size,
            rng.gen(),
        )
        .with_policy(cfg.small_source_policy);
        let mut val_loader = WindowLoader::new(
            split.val,
            decoder,
            win_size,
            cfg.val_steps * cfg.batch_size,
            rng.gen(),
        )
        .with_policy(cfg.small_source_policy);

        let plan = SimulationPlan {
            epochs:     cfg.epochs,
            steps:      cfg.steps,
            val_steps:  cfg.val_steps,
            batch_size: cfg.batch_size,
        };
        tracing::info!(
            "Simulating training over {} epochs ({} x {} train, {} x {} val windows of {}px, {} labels)",
            plan.epochs,
            plan.steps,
            plan.batch_size,
            plan.val_steps,
            plan.batch_size,
            win_size,
            train_loader.decoder_name()
        );

        let model   = checkpoint.model;
        let device  = self.device.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            simulate(model, &mut train_loader, &mut val_loader, &plan, &device)
        }));
        let history = match outcome {
            Ok(Ok(history)) => history,
            Ok(Err(e))      => return Err(self.stage_error(e)),
            Err(payload)    => return Err(self.stage_error(panic_message(payload))),
        };

        // ── REPORTING ─────────────────────────────────────────────────────────
        self.enter(EvalState::Reporting);
        let train = history.final_train();
        let val   = history.final_val();

        let plots_dir = plots_dir_for(&cfg.checkpoint_path);
        let stamp     = run_stamp(&Local::now());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| write_artifacts(&plots_dir, &stamp, &history, &train, &val)));
        let artifacts = match outcome {
            Ok(Ok(paths)) => paths,
            Ok(Err(e))    => return Err(self.stage_error(e)),
            Err(payload)  => return Err(self.stage_error(panic_message(payload))),
        };

        self.enter(EvalState::Done);
        tracing::info!("Final simulated metrics saved to '{}'", artifacts.metrics.display());
        tracing::info!("Training history plot saved to '{}'", artifacts.plot.display());

        Ok(EvaluationReport {
            train,
            val,
            history,
            artifacts,
            metadata: checkpoint.metadata,
            split: summary,
            seed,
        })
    }
}

/// Plot first, metrics second; a failed metrics write takes the plot with it.
fn write_artifacts(
    plots_dir: &Path,
    stamp:     &str,
    history:   &TrainingHistory,
    train:     &MetricMap,
    val:       &MetricMap,
) -> anyhow::Result<ArtifactPaths> {
    let paths = reserve_paths(plots_dir, stamp)?;
    save_history_plot(history, &paths.plot)?;
    if let Err(e) = write_metrics(&paths.metrics, train, val) {
        let _ = std::fs::remove_file(&paths.plot);
        return Err(e);
    }
    Ok(paths)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("panicked: {detail}")
}

/// Displays an error followed by every source in its chain.
struct ErrorChain<'a>(&'a EvalError);

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = std::error::Error::source(self.0);
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}

/// Driver entry point: evaluate a checkpoint against a dataset on the
/// backend's default device and return the final (train, val) metrics.
#[allow(clippy::too_many_arguments)]
pub fn evaluate<B: AutodiffBackend>(
    checkpoint_path: impl Into<PathBuf>,
    dataset_path:    impl Into<PathBuf>,
    data_model:      &str,
    batch_size:      usize,
    steps:           usize,
    val_steps:       usize,
    epochs:          usize,
) -> Result<(MetricMap, MetricMap), EvalError> {
    let config = EvalConfig {
        checkpoint_path: checkpoint_path.into(),
        dataset_path: dataset_path.into(),
        data_model: data_model.to_string(),
        batch_size,
        steps,
        val_steps,
        epochs,
        ..EvalConfig::default()
    };
    let report = Evaluator::<B>::new(config, Default::default()).run()?;
    Ok((report.train, report.val))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    use crate::error::{CheckpointCorruptError, DatasetLayoutError, WindowBoundsError};
    use crate::infra::checkpoint::WEIGHTS_FILE;
    use crate::testutil;

    type B = Autodiff<NdArray>;

    fn page_names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("page_{i:02}")).collect()
    }

    /// `<tmp>/checkpoints/seg_net` plus a segnet dataset of `pages` pages.
    fn fixture(win: usize, pages: usize, page_size: u32) -> (tempfile::TempDir, EvalConfig) {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = dir.path().join("checkpoints/seg_net");
        testutil::write_checkpoint(&ckpt, win);

        let names = page_names(pages);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        testutil::write_segnet_dataset(&dir.path().join("ds"), &refs, page_size, page_size);

        let config = EvalConfig {
            checkpoint_path: ckpt,
            dataset_path:    dir.path().join("ds"),
            batch_size:      4,
            steps:           2,
            val_steps:       1,
            epochs:          1,
            seed:            Some(42),
            ..EvalConfig::default()
        };
        (dir, config)
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|rd| rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn full_run_on_twenty_pages_reaches_done() {
        let (dir, config) = fixture(256, 20, 256);
        let mut evaluator = Evaluator::<B>::new(config, Default::default());

        let report = evaluator.run().unwrap();
        assert_eq!(evaluator.state(), EvalState::Done);
        assert_eq!((report.split.train_pages, report.split.val_pages), (18, 2));

        for map in [&report.train, &report.val] {
            for key in ["loss", "accuracy", "dice_coef"] {
                assert!(map.get(key).is_some_and(|v| v.is_finite()), "missing {key} in {map:?}");
            }
        }

        let plots = files_in(&dir.path().join("checkpoints/plots"));
        assert_eq!(plots.len(), 2, "{plots:?}");
        assert!(plots.iter().any(|f| f.starts_with("simulated_metrics_") && f.ends_with(".txt")));
        assert!(plots.iter().any(|f| f.starts_with("training_history_") && f.ends_with(".png")));

        let text = std::fs::read_to_string(&report.artifacts.metrics).unwrap();
        assert!(text.starts_with("Simulated Training Metrics (Last Epoch):\nloss: "));
        assert!(text.contains("\nValidation Metrics (Last Epoch):\n"));
    }

    #[test]
    fn missing_weights_fails_in_loading_without_artifacts() {
        let (dir, config) = fixture(16, 4, 16);
        std::fs::remove_file(config.checkpoint_path.join(WEIGHTS_FILE)).unwrap();
        let mut evaluator = Evaluator::<B>::new(config, Default::default());

        let err = evaluator.run().unwrap_err();
        assert!(matches!(err, EvalError::Checkpoint(CheckpointCorruptError::MissingFile { .. })), "{err}");
        assert_eq!(evaluator.state(), EvalState::Failed);
        assert!(!dir.path().join("checkpoints/plots").exists());
    }

    #[test]
    fn image_without_label_is_a_dataset_error() {
        let (dir, config) = fixture(16, 3, 16);
        std::fs::remove_file(dir.path().join("ds/segmentation/page_01_seg.png")).unwrap();
        let mut evaluator = Evaluator::<B>::new(config, Default::default());

        let err = evaluator.run().unwrap_err();
        assert!(matches!(err, EvalError::Dataset(DatasetLayoutError::MissingLabel { .. })), "{err}");
        assert_eq!(evaluator.state(), EvalState::Failed);
    }

    #[test]
    fn rejected_small_sources_fail_while_simulating() {
        let (dir, mut config) = fixture(32, 4, 16);
        config.small_source_policy = SmallSourcePolicy::Reject;
        let mut evaluator = Evaluator::<B>::new(config, Default::default());

        match evaluator.run().unwrap_err() {
            EvalError::Evaluation(e) => {
                assert_eq!(e.stage, EvalState::Simulating);
                let cause = e.source.downcast_ref::<LoaderError>();
                assert!(matches!(cause, Some(LoaderError::Window(WindowBoundsError::SourceTooSmall { .. }))));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(files_in(&dir.path().join("checkpoints/plots")).is_empty());
    }

    #[test]
    fn unwritable_plots_dir_fails_while_reporting() {
        let (dir, config) = fixture(16, 3, 16);
        let plots = dir.path().join("checkpoints/plots");
        std::fs::write(&plots, b"occupied").unwrap();
        let mut evaluator = Evaluator::<B>::new(config, Default::default());

        match evaluator.run().unwrap_err() {
            EvalError::Evaluation(e) => assert_eq!(e.stage, EvalState::Reporting),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(evaluator.state(), EvalState::Failed);
        assert!(plots.is_file());

        let leftovers: Vec<String> = files_in(&dir.path().join("checkpoints"))
            .into_iter()
            .filter(|f| f.starts_with("simulated_metrics_") || f.starts_with("training_history_"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn same_seed_reproduces_metrics_and_never_overwrites() {
        let (dir, config) = fixture(16, 6, 24);

        let first  = Evaluator::<B>::new(config.clone(), Default::default()).run().unwrap();
        let second = Evaluator::<B>::new(config, Default::default()).run().unwrap();

        assert_eq!(first.train, second.train);
        assert_eq!(first.split, second.split);
        assert_ne!(first.artifacts.metrics, second.artifacts.metrics);
        assert_eq!(files_in(&dir.path().join("checkpoints/plots")).len(), 4);
    }

    #[test]
    fn single_page_dataset_completes_with_nan_validation() {
        let (_dir, mut config) = fixture(16, 1, 16);
        config.epochs = 2;
        let report = Evaluator::<B>::new(config, Default::default()).run().unwrap();

        assert_eq!(report.split.val_pages, 0);
        assert_eq!(report.history.epochs(), 2);
        assert!(report.train["loss"].is_finite());
        assert!(report.val["loss"].is_nan());
    }

    /// Log sink shared between a test and its subscriber.
    #[derive(Clone, Default)]
    struct CapturedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLog {
        type Writer = CapturedLog;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn empty_validation_split_warns_once() {
        let (_dir, config) = fixture(16, 1, 16);
        let log = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(log.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            Evaluator::<B>::new(config, Default::default()).run().unwrap();
        });

        let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("WARN").count(), 1, "{text}");
        assert!(text.contains("validation split will be empty"));
    }

    #[test]
    fn entry_point_returns_both_metric_maps() {
        let (_dir, config) = fixture(16, 5, 16);
        let (train, val) = evaluate::<B>(
            config.checkpoint_path,
            config.dataset_path,
            "segnet",
            2,
            1,
            1,
            1,
        )
        .unwrap();
        assert!(train.contains_key("dice_coef"));
        assert!(val.contains_key("dice_coef"));
    }

    #[test]
    fn config_json_fills_missing_fields_with_defaults() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.json");
        std::fs::write(&path, r#"{"data_model":"cvc","epochs":3,"precision":"mixed_float16"}"#).unwrap();

        let cfg = EvalConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.data_model, "cvc");
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.precision, Precision::MixedFloat16);
        assert_eq!(cfg.batch_size, 8);
        assert_eq!(cfg.val_fraction, DEFAULT_VAL_FRACTION);
    }

    #[test]
    fn state_names_read_naturally_in_errors() {
        let err = EvaluationError::new(EvalState::Reporting, "disk full");
        assert_eq!(err.to_string(), "evaluation failed while reporting: disk full");
    }
}
