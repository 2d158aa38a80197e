// ============================================================
// Layer 6 — Metrics Artifact
// ============================================================
// Persists the final epoch of a run as plain text:
//
//   <checkpoint_parent>/plots/simulated_metrics_<stamp>.txt
//
//   Simulated Training Metrics (Last Epoch):
//   loss: 0.8123
//   accuracy: 0.9012
//   dice_coef: 0.4410
//   mean_iou: 0.3021
//
//   Validation Metrics (Last Epoch):
//   loss: 0.8240
//   ...
//
// The stamp is the run's local time (%Y%m%d_%H%M%S). If a file
// for that stamp already exists, `_1`, `_2`, ... is appended, so
// a run never replaces an earlier one. The text is written to a
// hidden temporary file next to the target and renamed into place,
// so a failed write leaves no partial artifact.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use std::{
    fmt::Write as _,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::history::{MetricMap, TRACKED_METRICS};

pub const PLOTS_DIR: &str = "plots";

const TRAIN_HEADER: &str = "Simulated Training Metrics (Last Epoch):";
const VAL_HEADER:   &str = "Validation Metrics (Last Epoch):";

/// Where one run's two artifacts go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub metrics: PathBuf,
    pub plot:    PathBuf,
}

/// `<checkpoint_parent>/plots`, with "." standing in for an empty parent.
pub fn plots_dir_for(checkpoint: &Path) -> PathBuf {
    match checkpoint.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(PLOTS_DIR),
        _ => PathBuf::from(".").join(PLOTS_DIR),
    }
}

pub fn run_stamp<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Create the plots directory and pick artifact names no earlier run used.
pub fn reserve_paths(plots_dir: &Path, stamp: &str) -> Result<ArtifactPaths> {
    fs::create_dir_all(plots_dir)
        .with_context(|| format!("Cannot create plots directory '{}'", plots_dir.display()))?;

    let mut n = 0usize;
    loop {
        let suffix = if n == 0 { String::new() } else { format!("_{n}") };
        let paths  = ArtifactPaths {
            metrics: plots_dir.join(format!("simulated_metrics_{stamp}{suffix}.txt")),
            plot:    plots_dir.join(format!("training_history_{stamp}{suffix}.png")),
        };
        if !paths.metrics.exists() && !paths.plot.exists() {
            return Ok(paths);
        }
        n += 1;
    }
}

/// Tracked metrics first in their usual order, anything else after.
fn ordered(map: &MetricMap) -> Vec<(&str, f64)> {
    let mut out: Vec<(&str, f64)> = TRACKED_METRICS
        .iter()
        .filter_map(|&name| map.get(name).map(|&v| (name, v)))
        .collect();
    out.extend(
        map.iter()
            .filter(|(k, _)| !TRACKED_METRICS.contains(&k.as_str()))
            .map(|(k, &v)| (k.as_str(), v)),
    );
    out
}

pub fn render_metrics(train: &MetricMap, val: &MetricMap) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "{TRAIN_HEADER}");
    for (name, value) in ordered(train) {
        let _ = writeln!(text, "{name}: {value:.4}");
    }
    let _ = writeln!(text);
    let _ = writeln!(text, "{VAL_HEADER}");
    for (name, value) in ordered(val) {
        let _ = writeln!(text, "{name}: {value:.4}");
    }
    text
}

/// Write via a temporary sibling and rename.
pub fn write_metrics(path: &Path, train: &MetricMap, val: &MetricMap) -> Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("'{}' has no file name", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let result = (|| -> Result<()> {
        let mut f = fs::File::create(&tmp_path)
            .with_context(|| format!("Cannot create '{}'", tmp_path.display()))?;
        f.write_all(render_metrics(train, val).as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Cannot move metrics into '{}'", path.display()))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result?;

    tracing::debug!("Wrote metrics artifact '{}'", path.display());
    Ok(())
}
