// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn network code lives here; domain and application
// code only see plain structs and anyhow results.
//
//   backbone.rs  — FeatureExtractor trait + convolutional encoder
//   model.rs     — shared backbone, three linear heads, dropout
//   loss.rs      — label-smoothed cross-entropy per head
//   schedule.rs  — step learning-rate decay
//   engine.rs    — backend-free epoch loop: checkpoint policy,
//                  early stopping, final-epoch embedding buffer
//   trainer.rs   — Burn epoch runner (Adam, loaders, backward)
//   cluster.rs   — Gaussian mixture over collected embeddings
//   evaluator.rs — best-checkpoint reload + pooled metrics

/// Image encoder behind the FeatureExtractor seam
pub mod backbone;

/// Multi-head classifier
pub mod model;

/// Label-smoothed cross-entropy
pub mod loss;

/// Learning-rate schedules
pub mod schedule;

/// Epoch loop, early stopping and checkpoint policy
pub mod engine;

/// Burn training runner
pub mod trainer;

/// Embedding cluster model
pub mod cluster;

/// Pooled evaluation report
pub mod evaluator;
