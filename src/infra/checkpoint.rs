// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder.
//
// Only the best snapshot is kept: every strict improvement in
// validation accuracy overwrites it before the next epoch starts.
//
// File layout inside the artifact directory:
//   best_model.mpk.gz   ← weights of the best epoch so far
//   best_epoch.json     ← { "epoch": 7, "val_accuracy": 0.81 }
//   train_config.json   ← TrainConfig, to rebuild the same model
//
// CompactRecorder serialises to MessagePack and gzips the result.
// Loading fails if the record does not match the architecture
// rebuilt from train_config.json.

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::domain::error::PipelineError;
use crate::ml::backbone::ConvBackbone;
use crate::ml::model::MultiHeadClassifier;

const BEST_MODEL: &str = "best_model";
const BEST_EPOCH: &str = "best_epoch.json";
const TRAIN_CONFIG: &str = "train_config.json";

/// Pointer to the epoch whose weights are in best_model.mpk.gz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestEpoch {
    /// 1-based, as printed in the epoch table
    pub epoch: usize,
    pub val_accuracy: f64,
}

/// Manages saving and loading of model checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create artifact directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Overwrite the best snapshot with `model`.
    ///
    /// `epoch` is the zero-based index the engine runs on.
    pub fn save_best<B: Backend>(
        &self,
        model: &MultiHeadClassifier<B>,
        epoch: usize,
        val_accuracy: f64,
    ) -> Result<(), PipelineError> {
        // recorder adds the .mpk.gz extension
        let path = self.dir.join(BEST_MODEL);
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .map_err(|e| PipelineError::checkpoint_io(&path, e))?;

        let pointer = BestEpoch {
            epoch: epoch + 1,
            val_accuracy,
        };
        let pointer_path = self.dir.join(BEST_EPOCH);
        let json = serde_json::to_string_pretty(&pointer)
            .map_err(|e| PipelineError::checkpoint_io(&pointer_path, e))?;
        fs::write(&pointer_path, json).map_err(|e| PipelineError::checkpoint_io(&pointer_path, e))?;

        tracing::debug!("Saved best checkpoint: epoch {}", epoch + 1);
        Ok(())
    }

    /// Load the best snapshot into `model`, which must have been
    /// built from the same configuration.
    pub fn load_best<B: Backend>(
        &self,
        model: MultiHeadClassifier<B>,
        device: &B::Device,
    ) -> Result<MultiHeadClassifier<B>> {
        let best = self.best_epoch()?;
        let path = self.dir.join(BEST_MODEL);

        tracing::info!(
            "Loading best checkpoint from epoch {} (val_acc={:.4})",
            best.epoch,
            best.val_accuracy
        );

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .map_err(|e| PipelineError::checkpoint_io(&path, e))?;

        Ok(model.load_record(record))
    }

    pub fn best_epoch(&self) -> Result<BestEpoch> {
        let path = self.dir.join(BEST_EPOCH);
        let json = fs::read_to_string(&path)
            .map_err(|e| PipelineError::checkpoint_io(&path, e))
            .context("Has 'train' been run for this artifact directory?")?;
        Ok(serde_json::from_str(&json).map_err(|e| PipelineError::checkpoint_io(&path, e))?)
    }

    /// Must be called before training so `evaluate` can rebuild the model.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(TRAIN_CONFIG);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(TRAIN_CONFIG);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. \
                 Make sure you have run 'train' before 'evaluate'.",
                path.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("'{}' is not a valid training config", path.display()))
    }
}

/// Replace a freshly initialised backbone's weights with a record
/// saved by CompactRecorder (path without the .mpk.gz extension).
pub fn load_backbone_weights<B: Backend>(
    backbone: ConvBackbone<B>,
    path: &Path,
    device: &B::Device,
) -> Result<ConvBackbone<B>, PipelineError> {
    let record = CompactRecorder::new()
        .load(path.to_path_buf(), device)
        .map_err(|e| PipelineError::checkpoint_io(path, e))?;
    tracing::info!("Loaded pretrained backbone weights from '{}'", path.display());
    Ok(backbone.load_record(record))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::backbone::{ConvBackboneConfig, FeatureExtractor};
    use crate::ml::model::{ForwardMode, MultiHeadClassifierConfig};
    use burn::backend::{ndarray::NdArrayDevice, NdArray};
    use burn::tensor::Distribution;

    type B = NdArray;

    fn model_config() -> MultiHeadClassifierConfig {
        MultiHeadClassifierConfig::new(ConvBackboneConfig::new(8).with_base_channels(2), 8, 2, 3, 4)
    }

    #[test]
    fn test_best_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let device = NdArrayDevice::Cpu;
        let manager = CheckpointManager::new(dir.path()).unwrap();

        let trained = model_config().init::<B>(&device).unwrap();
        manager.save_best(&trained, 3, 0.625).unwrap();

        let best = manager.best_epoch().unwrap();
        assert_eq!(best, BestEpoch { epoch: 4, val_accuracy: 0.625 });

        let fresh = model_config().init::<B>(&device).unwrap();
        let restored = manager.load_best(fresh, &device).unwrap();

        let images = Tensor::<B, 4>::random([2, 3, 16, 16], Distribution::Default, &device);
        let expected = trained.forward(images.clone(), ForwardMode::Eval).accent.into_data();
        let actual = restored.forward(images, ForwardMode::Eval).accent.into_data();
        expected.assert_approx_eq(&actual, 4);
    }

    #[test]
    fn test_missing_checkpoint_is_checkpoint_io() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let model = model_config().init::<B>(&NdArrayDevice::Cpu).unwrap();

        let err = manager.load_best(model, &NdArrayDevice::Cpu).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::CheckpointIo { .. })
        ));
    }

    #[test]
    fn test_unwritable_directory_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("artifacts")).unwrap();
        // a plain file where the directory should be
        fs::remove_dir_all(manager.dir()).unwrap();
        fs::write(manager.dir(), b"not a directory").unwrap();

        let model = model_config().init::<B>(&NdArrayDevice::Cpu).unwrap();
        assert!(matches!(
            manager.save_best(&model, 0, 0.5),
            Err(PipelineError::CheckpointIo { .. })
        ));
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let cfg = TrainConfig {
            epochs: 3,
            seed: 7,
            ..TrainConfig::default()
        };
        manager.save_config(&cfg).unwrap();
        assert_eq!(manager.load_config().unwrap(), cfg);
    }

    #[test]
    fn test_pretrained_backbone_weights_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let device = NdArrayDevice::Cpu;
        let cfg = ConvBackboneConfig::new(6).with_base_channels(2);

        let pretrained = cfg.init::<B>(&device);
        let path = dir.path().join("backbone");
        CompactRecorder::new()
            .record(pretrained.clone().into_record(), path.clone())
            .unwrap();

        let loaded = load_backbone_weights(cfg.init::<B>(&device), &path, &device).unwrap();
        let images = Tensor::<B, 4>::ones([1, 3, 16, 16], &device);
        pretrained
            .extract(images.clone())
            .into_data()
            .assert_approx_eq(&loaded.extract(images).into_data(), 4);

        assert!(load_backbone_weights(cfg.init::<B>(&device), &dir.path().join("missing"), &device).is_err());
    }
}
