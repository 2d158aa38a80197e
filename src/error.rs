// ============================================================
// Error Taxonomy
// ============================================================
// Every failure a run can hit falls into one of these types.
// All of them are fatal to the current run: nothing retries and
// no partial result is returned.
//
//   CheckpointCorruptError — arch/weights unreadable or mismatched
//   DatasetLayoutError     — dataset root does not match its layout
//   WindowBoundsError      — a window cannot be cut from its source
//   LoaderError            — anything the windowed loader trips over
//   EvaluationError        — wraps failures during simulate/report
//   EvalError              — what the driver hands back to callers

use std::path::PathBuf;
use thiserror::Error;

use crate::application::evaluate_use_case::EvalState;

#[derive(Debug, Error)]
pub enum CheckpointCorruptError {
    #[error("checkpoint file '{}' is missing", path.display())]
    MissingFile { path: PathBuf },

    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("architecture description '{}' is invalid: {source}", path.display())]
    ArchitectureParse {
        path:   PathBuf,
        source: serde_json::Error,
    },

    #[error("architecture is not usable: {0}")]
    Architecture(String),

    #[error("metadata '{}' is not a JSON object: {source}", path.display())]
    Metadata {
        path:   PathBuf,
        source: serde_json::Error,
    },

    #[error("weight blob '{}' is unreadable: {reason}", path.display())]
    WeightBlob { path: PathBuf, reason: String },

    #[error("weight '{name}' required by the architecture is missing")]
    MissingWeight { name: String },

    #[error("weight '{name}' has shape {found:?}, architecture expects {expected:?}")]
    ShapeMismatch {
        name:     String,
        expected: Vec<usize>,
        found:    Vec<usize>,
    },

    #[error("weight '{name}' is not declared by the architecture")]
    UnexpectedWeight { name: String },

    #[error("weight '{name}' has unsupported dtype {dtype}")]
    UnsupportedDtype { name: String, dtype: String },
}

#[derive(Debug, Error)]
pub enum DatasetLayoutError {
    #[error("dataset root '{}' does not exist", root.display())]
    MissingRoot { root: PathBuf },

    #[error("expected directory '{}' for the {layout} layout", path.display())]
    MissingDirectory { path: PathBuf, layout: &'static str },

    #[error("image '{}' has no matching label file (looked for '{}')", image.display(), expected.display())]
    MissingLabel { image: PathBuf, expected: PathBuf },

    #[error("no image/label pairs found under '{}'", root.display())]
    Empty { root: PathBuf },

    #[error("cannot list '{}': {source}", path.display())]
    Io {
        path:   PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum WindowBoundsError {
    #[error("source '{}' is {width}x{height}, smaller than the {win_size}px window", path.display())]
    SourceTooSmall {
        path:     PathBuf,
        width:    u32,
        height:   u32,
        win_size: usize,
    },

    #[error("label for '{}' is {label_width}x{label_height}, image is {width}x{height}", path.display())]
    LabelSizeMismatch {
        path:         PathBuf,
        width:        u32,
        height:       u32,
        label_width:  u32,
        label_height: u32,
    },
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error(transparent)]
    Window(#[from] WindowBoundsError),

    #[error("cannot decode '{}': {source}", path.display())]
    Image {
        path:   PathBuf,
        source: image::ImageError,
    },

    #[error("loader has no dataset entries to sample from")]
    NoEntries,

    #[error("batch size must be at least 1")]
    ZeroBatchSize,
}

/// Failure during the SIMULATING or REPORTING phase, with its cause kept.
#[derive(Debug, Error)]
#[error("evaluation failed while {stage}: {source}")]
pub struct EvaluationError {
    pub stage:  EvalState,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl EvaluationError {
    pub fn new(
        stage: EvalState,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self { stage, source: source.into() }
    }
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointCorruptError),

    #[error(transparent)]
    Dataset(#[from] DatasetLayoutError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}
