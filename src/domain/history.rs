// ============================================================
// Layer 3 — Training History
// ============================================================
// One value per epoch for every tracked metric, train and
// validation side by side. Validation series carry the `val_`
// prefix, matching the names used in the metrics artifact:
//
//   loss, accuracy, dice_coef, mean_iou
//   val_loss, val_accuracy, val_dice_coef, val_mean_iou
//
// A history is created fresh for each run and only ever appended to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric names in reporting order.
pub const TRACKED_METRICS: [&str; 4] = ["loss", "accuracy", "dice_coef", "mean_iou"];

pub const VAL_PREFIX: &str = "val_";

/// Final-epoch values keyed by metric name.
pub type MetricMap = BTreeMap<String, f64>;

// ─── EpochMetrics ─────────────────────────────────────────────────────────────
/// Averages over all batches of one pass (train or validation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Focal-Tversky loss, lower is better
    pub loss: f64,

    /// Fraction of pixels whose argmax class matches the label
    pub accuracy: f64,

    /// Dice overlap over all channels, 1.0 = perfect
    pub dice_coef: f64,

    /// Per-class IoU averaged over the classes present
    pub mean_iou: f64,
}

impl EpochMetrics {
    pub fn new(loss: f64, accuracy: f64, dice_coef: f64, mean_iou: f64) -> Self {
        Self { loss, accuracy, dice_coef, mean_iou }
    }

    /// Placeholder for a pass that had nothing to consume.
    pub fn undefined() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN, f64::NAN)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "loss"      => Some(self.loss),
            "accuracy"  => Some(self.accuracy),
            "dice_coef" => Some(self.dice_coef),
            "mean_iou"  => Some(self.mean_iou),
            _           => None,
        }
    }

    pub fn to_map(&self) -> MetricMap {
        TRACKED_METRICS
            .iter()
            .filter_map(|&name| self.get(name).map(|v| (name.to_string(), v)))
            .collect()
    }
}

// ─── MetricAccumulator ────────────────────────────────────────────────────────
/// Running mean of per-batch metrics within one pass.
#[derive(Debug, Default, Clone)]
pub struct MetricAccumulator {
    sums:    [f64; 4],
    batches: usize,
}

impl MetricAccumulator {
    pub fn push(&mut self, m: &EpochMetrics) {
        self.sums[0] += m.loss;
        self.sums[1] += m.accuracy;
        self.sums[2] += m.dice_coef;
        self.sums[3] += m.mean_iou;
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn mean(&self) -> EpochMetrics {
        if self.batches == 0 {
            return EpochMetrics::undefined();
        }
        let n = self.batches as f64;
        EpochMetrics::new(self.sums[0] / n, self.sums[1] / n, self.sums[2] / n, self.sums[3] / n)
    }
}

// ─── TrainingHistory ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    series: BTreeMap<String, Vec<f64>>,
    epochs: usize,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one epoch's train and validation values.
    pub fn record_epoch(&mut self, train: &EpochMetrics, val: &EpochMetrics) {
        for name in TRACKED_METRICS {
            if let Some(v) = train.get(name) {
                self.series.entry(name.to_string()).or_default().push(v);
            }
            if let Some(v) = val.get(name) {
                self.series.entry(format!("{VAL_PREFIX}{name}")).or_default().push(v);
            }
        }
        self.epochs += 1;
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn series(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Last-epoch values of the training series.
    pub fn final_train(&self) -> MetricMap {
        self.series
            .iter()
            .filter(|(k, _)| !k.starts_with(VAL_PREFIX))
            .filter_map(|(k, v)| v.last().map(|&x| (k.clone(), x)))
            .collect()
    }

    /// Last-epoch values of the validation series, with the prefix removed.
    pub fn final_val(&self) -> MetricMap {
        self.series
            .iter()
            .filter_map(|(k, v)| {
                let name = k.strip_prefix(VAL_PREFIX)?;
                v.last().map(|&x| (name.to_string(), x))
            })
            .collect()
    }
}
