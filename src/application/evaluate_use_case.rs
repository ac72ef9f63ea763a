// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Recomputes the pooled validation report from the artifacts of
// an earlier `train` run:
//
//   Step 1: Load train_config.json       (Layer 6 - infra)
//   Step 2: Load the persisted codecs    (Layer 4 - data)
//   Step 3: Rebuild the same split       (Layer 4 - data)
//   Step 4: Decode validation images     (Layer 4 - data)
//   Step 5: Reload best checkpoint + run (Layer 5 - ml)
//
// Codecs are loaded, never refit, so an unseen label in the
// manifest is an UnknownCategory error.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::application::train_use_case::{load_records, split_records, ComputeDevice};
use crate::data::{codec::LabelCodec, dataset::SpectrogramDataset};
use crate::domain::error::Stage;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::evaluator::{evaluate_best, EvaluationReport};

pub struct EvaluateUseCase {
    artifact_dir: PathBuf,
    manifest: Option<PathBuf>,
    image_root: Option<PathBuf>,
    device: Option<ComputeDevice>,
}

impl EvaluateUseCase {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            manifest: None,
            image_root: None,
            device: None,
        }
    }

    /// Evaluate against a manifest other than the one used for training
    pub fn with_manifest(mut self, manifest: Option<PathBuf>, image_root: Option<PathBuf>) -> Self {
        self.manifest = manifest;
        self.image_root = image_root;
        self
    }

    pub fn with_device(mut self, device: Option<ComputeDevice>) -> Self {
        self.device = device;
        self
    }

    pub fn execute(&self) -> Result<EvaluationReport> {
        // ── Step 1: Training config ───────────────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&self.artifact_dir)?;
        let mut cfg = ckpt_manager.load_config()?;
        if let Some(manifest) = &self.manifest {
            cfg.manifest = manifest.clone();
        }
        if self.image_root.is_some() {
            cfg.image_root = self.image_root.clone();
        }
        if let Some(device) = self.device {
            cfg.device = device;
        }
        tracing::info!("Evaluating '{}' on {}", self.artifact_dir.display(), cfg.device);

        // ── Step 2: Codecs from the training run ──────────────────────────────
        let codec = LabelCodec::load(&self.artifact_dir).context(Stage::DataPreparation)?;

        // ── Step 3: Same seeded split as training ─────────────────────────────
        let records = load_records(&cfg).context(Stage::DataPreparation)?;
        let (_, val_images) =
            split_records(&cfg, &codec, &records).context(Stage::DataPreparation)?;

        // ── Step 4: Decode validation images ──────────────────────────────────
        let val_dataset = SpectrogramDataset::decode(&val_images, &cfg.image_transform())
            .context(Stage::DataPreparation)?;

        // ── Step 5: Best checkpoint → pooled report ───────────────────────────
        let model_cfg = cfg.model_config(codec.cardinalities());
        evaluate_best(&cfg, &model_cfg, val_dataset, &ckpt_manager).context(Stage::Evaluation)
    }
}
