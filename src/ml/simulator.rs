// ============================================================
// Layer 5 — Simulated Training Loop
// ============================================================
// Runs the training code path without changing the model:
//
//   for each epoch:
//     train:  `steps` batches → forward → focal-Tversky loss
//             → backward → Adam step with learning rate 0
//     valid:  `val_steps` batches on model.valid() (inner backend)
//     record batch-averaged loss / accuracy / dice / mean IoU
//
// With lr = 0 every Adam update is zero, and batch normalisation
// reads its frozen moving statistics in both phases. The numbers
// are therefore exactly those of a pure forward-pass evaluation,
// only routed through the same bookkeeping a real run would use.
//
// Training side:   B             (e.g. Autodiff<Wgpu>)
// Validation side: B::InnerBackend, no autodiff graph
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use crate::data::{batcher::WindowBatcher, window::WindowLoader};
use crate::domain::history::{EpochMetrics, MetricAccumulator, TrainingHistory};
use crate::error::LoaderError;
use crate::ml::{
    losses::{accuracy, dice_coef, focal_tversky_loss, mean_iou},
    model::SegmentationNet,
};

/// Learning rate of every simulated optimizer step.
pub const SIMULATED_LR: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationPlan {
    pub epochs:     usize,
    pub steps:      usize,
    pub val_steps:  usize,
    pub batch_size: usize,
}

pub fn simulate<B: AutodiffBackend>(
    mut model:    SegmentationNet<B>,
    train_loader: &mut WindowLoader,
    val_loader:   &mut WindowLoader,
    plan:         &SimulationPlan,
    device:       &B::Device,
) -> Result<TrainingHistory, LoaderError> {
    let train_batcher = WindowBatcher::<B>::new(device.clone());
    let val_batcher   = WindowBatcher::<B::InnerBackend>::new(device.clone());

    let mut optim   = AdamConfig::new().with_epsilon(1e-7).init();
    let mut history = TrainingHistory::new();

    for epoch in 1..=plan.epochs {

        // ── Training phase ────────────────────────────────────────────────────
        let mut train_acc = MetricAccumulator::default();
        for samples in train_loader.produce_batches(plan.batch_size)?.take(plan.steps) {
            let batch = train_batcher.batch(samples?);
            let pred  = model.forward(batch.images);
            let loss  = focal_tversky_loss(batch.labels.clone(), pred.clone());

            train_acc.push(&batch_metrics(
                loss.clone().inner(),
                batch.labels.inner(),
                pred.inner(),
            ));

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(SIMULATED_LR, model, grads);
        }

        // ── Validation phase ──────────────────────────────────────────────────
        let model_valid = model.valid();
        let mut val_acc = MetricAccumulator::default();
        if !val_loader.is_empty() {
            for samples in val_loader.produce_batches(plan.batch_size)?.take(plan.val_steps) {
                let batch = val_batcher.batch(samples?);
                let pred  = model_valid.forward(batch.images);
                let loss  = focal_tversky_loss(batch.labels.clone(), pred.clone());
                val_acc.push(&batch_metrics(loss, batch.labels, pred));
            }
        }

        let train = train_acc.mean();
        let val   = val_acc.mean();
        println!(
            "Epoch {:>3}/{} | loss={:.4} | accuracy={:.4} | dice_coef={:.4} | val_loss={:.4} | val_accuracy={:.4} | val_dice_coef={:.4}",
            epoch, plan.epochs,
            train.loss, train.accuracy, train.dice_coef,
            val.loss, val.accuracy, val.dice_coef,
        );
        tracing::debug!(
            "Epoch {} consumed {} train / {} val batches",
            epoch,
            train_acc.batches(),
            val_acc.batches()
        );
        history.record_epoch(&train, &val);
    }

    Ok(history)
}

fn batch_metrics<B: Backend>(loss: Tensor<B, 1>, labels: Tensor<B, 4>, pred: Tensor<B, 4>) -> EpochMetrics {
    EpochMetrics::new(
        loss.into_scalar().elem::<f64>(),
        accuracy(labels.clone(), pred.clone()).into_scalar().elem::<f64>(),
        dice_coef(labels.clone(), pred.clone()).into_scalar().elem::<f64>(),
        mean_iou(labels, pred),
    )
}
