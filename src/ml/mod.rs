// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All graph construction and tensor math lives here.
//
//   model.rs     — architecture description (arch.json), the
//                  runtime-built segmentation network, precision
//                  policy and the two reference architectures
//
//   losses.rs    — focal-Tversky loss, Dice, categorical
//                  accuracy, mean IoU
//
//   simulator.rs — zero-learning-rate training/validation loop
//                  that fills a TrainingHistory
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Declarative architecture and the network built from it
pub mod model;

/// Segmentation loss and overlap metrics
pub mod losses;

/// Simulated training epochs over two windowed loaders
pub mod simulator;
