// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between a dataset root on disk and tensor batches.
//
//   dataset root
//       │
//       ▼
//   resolver     → (image, label) entries, stable order
//       │
//       ▼
//   splitter     → train / validation entries, whole pages only
//       │
//       ▼
//   window       → random fixed-size windows, batched, on demand
//       │            (labels decoded by labels.rs)
//       ▼
//   batcher      → burn tensors on the target device
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Discovers image/label pairs for the segnet and cvc layouts
pub mod resolver;

/// Page-level train/validation split
pub mod splitter;

/// Dense and sparse label-mask decoders
pub mod labels;

/// Burn Dataset over one side of a split
pub mod dataset;

/// Windowed sampling core and loader
pub mod window;

/// Host batches → device tensors
pub mod batcher;
