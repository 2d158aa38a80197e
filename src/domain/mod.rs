// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits describing what the
// harness works with. No burn types, no file I/O.
//
//   entry.rs   — one (image, label) pair and its page identity
//   classes.rs — the fixed set of symbol channels the model predicts
//   history.rs — per-epoch metric values for one evaluation run
//   traits.rs  — the label-decoding capability both layouts implement

pub mod entry;

pub mod classes;

pub mod history;

pub mod traits;
