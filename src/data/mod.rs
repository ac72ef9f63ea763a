// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from the CSV manifest to device-ready batches:
//
//   manifest.csv
//       │
//       ▼
//   CsvManifest         → rows with missing values dropped
//       │
//       ▼
//   LabelCodec          → fit on ALL rows, raw labels → indices
//       │
//       ▼
//   split_train_val     → seeded shuffle, train / validation
//       │
//       ▼
//   SpectrogramDataset  → decode + resize + normalise (rayon)
//       │
//       ▼
//   SpectrogramBatcher  → images [B,C,H,W], labels [B,3]
//       │
//       ▼
//   DataLoader          → feeds batches to the training loop

/// Reads the labelled CSV manifest
pub mod loader;

/// Per-attribute label codecs (fit, encode, decode, persist)
pub mod codec;

/// Deterministic decode / resize / normalise
pub mod transform;

/// Implements Burn's Dataset trait for decoded spectrograms
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Seeded train / validation split
pub mod splitter;
