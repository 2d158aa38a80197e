// ============================================================
// Layer 5 — Loss & Metric Library
// ============================================================
// Stateless functions over (y_true, y_pred) pairs of identical
// shape [batch, win, win, CHANNEL_NUM], channels-last.
//
//   Dice coefficient
//     (2·Σ(t·p) + 1) / (Σt + Σp + 1)
//
//   Tversky index
//     TI = (TP + 1) / (TP + α·FN + (1 − α)·FP + 1)
//     α = 0.7 weights false negatives above false positives, so
//     thin minority classes (stems, staff lines) are not ignored
//
//   Focal-Tversky loss
//     (1 − TI)^γ,  γ = 0.75
//
//   Categorical accuracy
//     fraction of pixels where argmax(t) == argmax(p)
//
//   Mean IoU
//     per-class IoU of the argmax masks, averaged over classes
//     that occur in either mask
//
// The +1 smoothing keeps every formula finite for all-zero and
// all-one inputs.
//
// Reference: Abraham & Khan (2019) A Novel Focal Tversky Loss

use burn::prelude::*;

pub const SMOOTH: f64 = 1.0;

/// Weight of false negatives in the Tversky index; false positives get 1 − α.
pub const TVERSKY_ALPHA: f64 = 0.7;

/// Focal exponent.
pub const FOCAL_GAMMA: f64 = 0.75;

/// Keeps the pow gradient finite when the index reaches exactly 1.
const LOSS_FLOOR: f64 = 1e-7;

pub fn dice_coef<B: Backend, const D: usize>(y_true: Tensor<B, D>, y_pred: Tensor<B, D>) -> Tensor<B, 1> {
    let intersection = (y_true.clone() * y_pred.clone()).sum();
    let numerator    = intersection.mul_scalar(2.0).add_scalar(SMOOTH);
    let denominator  = (y_true.sum() + y_pred.sum()).add_scalar(SMOOTH);
    numerator / denominator
}

pub fn tversky_index<B: Backend, const D: usize>(y_true: Tensor<B, D>, y_pred: Tensor<B, D>) -> Tensor<B, 1> {
    let true_pos  = (y_true.clone() * y_pred.clone()).sum();
    let false_neg = (y_true.clone() * y_pred.clone().neg().add_scalar(1.0)).sum();
    let false_pos = (y_true.neg().add_scalar(1.0) * y_pred).sum();

    let denominator = true_pos.clone()
        + false_neg.mul_scalar(TVERSKY_ALPHA)
        + false_pos.mul_scalar(1.0 - TVERSKY_ALPHA);
    true_pos.add_scalar(SMOOTH) / denominator.add_scalar(SMOOTH)
}

pub fn focal_tversky_loss<B: Backend, const D: usize>(y_true: Tensor<B, D>, y_pred: Tensor<B, D>) -> Tensor<B, 1> {
    tversky_index(y_true, y_pred)
        .neg()
        .add_scalar(1.0)
        .clamp_min(LOSS_FLOOR)
        .powf_scalar(FOCAL_GAMMA)
}

/// Categorical accuracy over the last (channel) axis.
pub fn accuracy<B: Backend>(y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Tensor<B, 1> {
    y_true
        .argmax(3)
        .equal(y_pred.argmax(3))
        .float()
        .mean()
}

/// Mean IoU of the argmax masks; 1.0 when no class occurs at all.
pub fn mean_iou<B: Backend>(y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> f64 {
    let num_classes = y_true.dims()[3];
    let truth = y_true.argmax(3).into_data();
    let pred  = y_pred.argmax(3).into_data();

    let mut matrix = ConfusionMatrix::new(num_classes);
    for (t, p) in truth.iter::<i64>().zip(pred.iter::<i64>()) {
        matrix.record(t as usize, p as usize);
    }
    matrix.mean_iou()
}

/// Counts of (true class, predicted class) pixel pairs.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts:      Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes, counts: vec![0; num_classes * num_classes] }
    }

    pub fn record(&mut self, truth: usize, pred: usize) {
        if truth < self.num_classes && pred < self.num_classes {
            self.counts[truth * self.num_classes + pred] += 1;
        }
    }

    fn count(&self, truth: usize, pred: usize) -> u64 {
        self.counts[truth * self.num_classes + pred]
    }

    /// IoU of one class, None when it appears in neither mask.
    pub fn iou(&self, class: usize) -> Option<f64> {
        let hits      = self.count(class, class);
        let as_truth  = (0..self.num_classes).map(|p| self.count(class, p)).sum::<u64>();
        let as_pred   = (0..self.num_classes).map(|t| self.count(t, class)).sum::<u64>();
        let union     = as_truth + as_pred - hits;
        (union > 0).then(|| hits as f64 / union as f64)
    }

    pub fn mean_iou(&self) -> f64 {
        let present: Vec<f64> = (0..self.num_classes).filter_map(|c| self.iou(c)).collect();
        if present.is_empty() {
            return 1.0;
        }
        present.iter().sum::<f64>() / present.len() as f64
    }
}
