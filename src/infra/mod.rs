// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File-system concerns shared by the training and evaluation
// use cases:
//
//   checkpoint.rs — best-model snapshot (CompactRecorder),
//                   best_epoch.json, train_config.json,
//                   pretrained backbone records
//
//   metrics.rs    — per-epoch metrics CSV
//
//   plot.rs       — training_curves.svg (accuracy + loss panels)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Training curve rendering
pub mod plot;
