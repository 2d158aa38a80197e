// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches files outside the dataset:
//
//   checkpoint.rs — checkpoint directory reader and writer
//                   (arch.json, weights.safetensors, metadata.json)
//
//   metrics.rs    — artifact naming under <checkpoint_parent>/plots
//                   and the final-epoch metrics text file
//
//   plot.rs       — PNG rendering of a TrainingHistory
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Checkpoint loading, validation and saving
pub mod checkpoint;

/// Metrics artifact writer
pub mod metrics;

/// Training history plot
pub mod plot;
