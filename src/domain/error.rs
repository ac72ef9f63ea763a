// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Typed failures raised by the data, ml and infra layers.
// Every variant is fatal: the application layer attaches the
// pipeline Stage as anyhow context and aborts the run.
//
//   DataIntegrity     — missing/corrupt image, malformed manifest
//   UnknownCategory   — a label value the codec was never fit on
//   Configuration     — impossible hyperparameters or model shapes
//   CheckpointIo      — weights / best-epoch pointer not written or read
//   InsufficientData  — clustering with too few embeddings

use std::{fmt, path::PathBuf};
use thiserror::Error;

use crate::domain::labels::Attribute;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("unknown {attribute} category '{value}' (not seen when the label codec was fit)")]
    UnknownCategory { attribute: Attribute, value: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("checkpoint I/O failed for '{}': {reason}", .path.display())]
    CheckpointIo { path: PathBuf, reason: String },

    #[error("insufficient data: {0}")]
    InsufficientData(String),
}

impl PipelineError {
    pub fn checkpoint_io(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        PipelineError::CheckpointIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// The top-level stage a failure is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Manifest, codecs, split and image decoding
    DataPreparation,
    Training,
    Evaluation,
    Clustering,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::DataPreparation => "data preparation",
            Stage::Training => "training",
            Stage::Evaluation => "evaluation",
            Stage::Clustering => "clustering",
        };
        write!(f, "{name} stage failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_category_names_attribute_and_value() {
        let err = PipelineError::UnknownCategory {
            attribute: Attribute::Accent,
            value: "martian".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("accent"));
        assert!(msg.contains("martian"));
    }

    #[test]
    fn test_stage_context_reaches_the_top_level_message() {
        let err = anyhow::Error::from(PipelineError::InsufficientData("0 rows".into()))
            .context(Stage::Clustering);
        assert_eq!(err.to_string(), "clustering stage failed");
        assert!(format!("{err:#}").contains("insufficient data: 0 rows"));
    }
}
