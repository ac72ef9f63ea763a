// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Seams the application layer programs against:
//
//   RecordSource — anything that yields labelled manifest rows
//                  (CsvManifest today)
//   Persistable  — anything whose state round-trips through a
//                  single file (label codecs, the cluster model)

use anyhow::Result;
use std::path::Path;

use crate::domain::labels::RawRecord;

// ─── RecordSource ─────────────────────────────────────────────────────────────
/// Any component that can list the labelled spectrograms of a corpus.
///
/// Implementations must already have dropped rows with missing
/// values; every returned record is complete.
pub trait RecordSource {
    fn load_all(&self) -> Result<Vec<RawRecord>>;
}

// ─── Persistable ──────────────────────────────────────────────────────────────
/// Any component whose state can be saved and restored from disk.
///
/// Implementations:
///   - CategoryCodec   → one attribute's label mapping
///   - GaussianMixture → the fitted cluster model
pub trait Persistable: Sized {
    /// Save this component's state to the given path, overwriting it
    fn save(&self, path: &Path) -> Result<()>;

    /// Load a component's state from the given path
    fn load(path: &Path) -> Result<Self>;
}
