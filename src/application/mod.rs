// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers for one user-level goal.
//
// Rules for this layer:
//   - No tensor math or model code here
//   - No argument parsing (that's Layer 1)
//   - File access only through data/ and infra/
//   - Only workflow coordination

/// Evaluation driver: load → split → simulate → report
pub mod evaluate_use_case;

/// Writes a freshly initialised reference checkpoint
pub mod init_use_case;
