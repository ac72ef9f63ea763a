// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal per
// command (train, evaluate).
//
// Rules for this layer:
//   - No tensor code here
//   - No presentation here (that's Layer 1)
//   - Only workflow coordination and stage attribution of errors

// The training workflow: train → plot → evaluate → cluster
pub mod train_use_case;

// Re-evaluation of a finished training run
pub mod evaluate_use_case;
