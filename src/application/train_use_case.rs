// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Load the CSV manifest          (Layer 4 - data)
//   Step 2: Fit + persist label codecs     (Layer 4 - data)
//   Step 3: Seeded train/validation split  (Layer 4 - data)
//   Step 4: Decode + normalise images      (Layer 4 - data)
//   Step 5: Save config                    (Layer 6 - infra)
//   Step 6: Run training loop              (Layer 5 - ml)
//   Step 7: Plot training curves           (Layer 6 - infra)
//   Step 8: Evaluate best checkpoint       (Layer 5 - ml)
//   Step 9: Fit cluster model              (Layer 5 - ml)
//
// Evaluation runs before clustering. A clustering failure (e.g.
// early stopping emptied the embedding buffer) is carried in the
// outcome instead of discarding the finished training and
// evaluation results.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

use crate::data::{
    codec::LabelCodec,
    dataset::SpectrogramDataset,
    loader::CsvManifest,
    splitter::split_train_val,
    transform::ImageTransform,
};
use crate::domain::{
    error::{PipelineError, Stage},
    labels::{Attribute, LabeledImage, RawRecord},
    traits::{Persistable, RecordSource},
};
use crate::infra::{checkpoint::CheckpointManager, plot::render_training_curves};
use crate::ml::{
    backbone::ConvBackboneConfig,
    cluster::{ClusterFitter, GaussianMixture},
    engine::{CheckpointEvent, TrainingPhase, TrainingReport},
    evaluator::{evaluate_best, EvaluationReport},
    model::MultiHeadClassifierConfig,
    trainer::run_training,
};

pub const CLUSTER_MODEL_FILE: &str = "cluster_model.json";
pub const CURVES_FILE: &str = "training_curves.svg";

// ─── ComputeDevice ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    /// NdArray backend
    Cpu,
    /// Wgpu backend
    Gpu,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => f.write_str("cpu"),
            ComputeDevice::Gpu => f.write_str("gpu"),
        }
    }
}

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Saved next to the checkpoint so `evaluate` rebuilds the same
// model and sees the same validation split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub manifest: PathBuf,
    pub image_root: Option<PathBuf>,
    pub artifact_dir: PathBuf,
    pub batch_size: usize,
    pub epochs: usize,
    pub lr: f64,
    pub patience: usize,
    pub device: ComputeDevice,
    pub image_size: u32,
    pub embedding_dim: usize,
    pub base_channels: usize,
    pub dropout: f64,
    pub label_smoothing: f64,
    pub val_fraction: f64,
    pub seed: u64,
    pub num_workers: usize,
    pub lr_step_size: usize,
    pub lr_gamma: f64,
    pub clusters: usize,
    pub backbone_weights: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("data/spectrograms.csv"),
            image_root: None,
            artifact_dir: PathBuf::from("artifacts"),
            batch_size: 32,
            epochs: 25,
            lr: 1e-4,
            patience: 5,
            device: ComputeDevice::Cpu,
            image_size: 128,
            embedding_dim: 256,
            base_channels: 32,
            dropout: 0.3,
            label_smoothing: 0.1,
            val_fraction: 0.2,
            seed: 42,
            num_workers: 2,
            lr_step_size: 7,
            lr_gamma: 0.1,
            clusters: 5,
            backbone_weights: None,
        }
    }
}

impl TrainConfig {
    /// Reject values no run could succeed with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let positive = [
            ("batch size", self.batch_size),
            ("epochs", self.epochs),
            ("patience", self.patience),
            ("image size", self.image_size as usize),
            ("embedding dim", self.embedding_dim),
            ("base channels", self.base_channels),
            ("cluster count", self.clusters),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(PipelineError::Configuration(format!("{name} must be at least 1")));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(PipelineError::Configuration(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }
        if !(self.lr_gamma.is_finite() && self.lr_gamma > 0.0) {
            return Err(PipelineError::Configuration(format!(
                "lr gamma must be positive, got {}",
                self.lr_gamma
            )));
        }
        if !(self.val_fraction > 0.0 && self.val_fraction < 1.0) {
            return Err(PipelineError::Configuration(format!(
                "validation fraction must be in (0, 1), got {}",
                self.val_fraction
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(PipelineError::Configuration(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(0.0..1.0).contains(&self.label_smoothing) {
            return Err(PipelineError::Configuration(format!(
                "label smoothing must be in [0, 1), got {}",
                self.label_smoothing
            )));
        }
        Ok(())
    }

    /// `cardinalities` in Attribute order, from the fitted LabelCodec
    pub fn model_config(&self, cardinalities: [usize; 3]) -> MultiHeadClassifierConfig {
        let [age, gender, accent] = cardinalities;
        MultiHeadClassifierConfig::new(
            ConvBackboneConfig::new(self.embedding_dim).with_base_channels(self.base_channels),
            self.embedding_dim,
            age,
            gender,
            accent,
        )
        .with_dropout(self.dropout)
    }

    pub fn image_transform(&self) -> ImageTransform {
        ImageTransform::new(self.image_size)
    }
}

// ─── Shared pipeline steps ────────────────────────────────────────────────────
pub(crate) fn load_records(cfg: &TrainConfig) -> Result<Vec<RawRecord>> {
    tracing::info!("Loading manifest '{}'", cfg.manifest.display());
    let source = CsvManifest::new(&cfg.manifest).with_image_root(cfg.image_root.as_ref());
    let records = source.load_all()?;
    if records.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "manifest '{}' has no complete rows",
            cfg.manifest.display()
        ))
        .into());
    }
    Ok(records)
}

/// Encode with an already fitted codec and apply the seeded split.
pub(crate) fn split_records(
    cfg: &TrainConfig,
    codec: &LabelCodec,
    records: &[RawRecord],
) -> Result<(Vec<LabeledImage>, Vec<LabeledImage>)> {
    let labelled = codec.encode_all(records)?;
    let (train, val) = split_train_val(labelled, 1.0 - cfg.val_fraction, cfg.seed);
    if train.is_empty() || val.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "split of {} rows left {} for training and {} for validation",
            records.len(),
            train.len(),
            val.len()
        ))
        .into());
    }
    tracing::info!("Split: {} train, {} validation", train.len(), val.len());
    Ok((train, val))
}

// ─── Outcome ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ClusterSummary {
    pub components: usize,
    pub rows: usize,
    pub sizes: Vec<usize>,
    pub converged: bool,
    pub mean_log_likelihood: f64,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct TrainOutcome {
    pub phase: TrainingPhase,
    pub epochs_run: usize,
    pub best: Option<CheckpointEvent>,
    pub evaluation: EvaluationReport,
    /// Err carries the `Stage::Clustering` context
    pub clusters: Result<ClusterSummary>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainOutcome> {
        let cfg = &self.config;
        cfg.validate()?;

        // ── Step 1: Load manifest rows ────────────────────────────────────────
        let records = load_records(cfg).context(Stage::DataPreparation)?;

        // ── Step 2: Fit label codecs on ALL rows, before splitting ────────────
        let codec = LabelCodec::fit(&records);
        for attribute in Attribute::ALL {
            tracing::info!(
                "{} classes: {}",
                attribute,
                codec.codec(attribute).cardinality()
            );
        }
        codec.persist(&cfg.artifact_dir).context(Stage::DataPreparation)?;

        // ── Step 3: Seeded split ──────────────────────────────────────────────
        let (train_images, val_images) =
            split_records(cfg, &codec, &records).context(Stage::DataPreparation)?;

        // ── Step 4: Decode images (rayon) ─────────────────────────────────────
        let transform = cfg.image_transform();
        let train_dataset =
            SpectrogramDataset::decode(&train_images, &transform).context(Stage::DataPreparation)?;
        let val_dataset =
            SpectrogramDataset::decode(&val_images, &transform).context(Stage::DataPreparation)?;

        // ── Step 5: Save config for `evaluate` ────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.artifact_dir)?;
        ckpt_manager.save_config(cfg)?;

        // ── Step 6: Run training loop (Layer 5) ───────────────────────────────
        let model_cfg = cfg.model_config(codec.cardinalities());
        let report = run_training(cfg, &model_cfg, train_dataset, val_dataset.clone(), &ckpt_manager)
            .context(Stage::Training)?;

        // ── Step 7: Training curves (non-fatal) ───────────────────────────────
        let curves = cfg.artifact_dir.join(CURVES_FILE);
        match render_training_curves(report.state.history(), &curves) {
            Ok(()) => tracing::info!("Training curves written to '{}'", curves.display()),
            Err(e) => tracing::warn!("Could not render training curves: {e:#}"),
        }

        // ── Step 8: Evaluate the best checkpoint ──────────────────────────────
        let evaluation =
            evaluate_best(cfg, &model_cfg, val_dataset, &ckpt_manager).context(Stage::Evaluation)?;
        tracing::info!(
            "Evaluation: pooled accuracy={:.4}, macro F1={:.4}",
            evaluation.pooled.accuracy,
            evaluation.pooled.f1
        );

        // ── Step 9: Cluster the final-epoch embeddings ────────────────────────
        let clusters = fit_clusters(cfg, &report).context(Stage::Clustering);
        if let Err(e) = &clusters {
            tracing::error!("{e:#}");
        }

        Ok(TrainOutcome {
            phase: report.phase,
            epochs_run: report.epochs_run(),
            best: report.state.best_checkpoint(),
            evaluation,
            clusters,
        })
    }
}

fn fit_clusters(cfg: &TrainConfig, report: &TrainingReport) -> Result<ClusterSummary> {
    let matrix = report.embeddings.to_matrix()?;
    let model: GaussianMixture = ClusterFitter::new(cfg.clusters, cfg.seed)?.fit(matrix.view())?;

    let path = cfg.artifact_dir.join(CLUSTER_MODEL_FILE);
    model.save(&path)?;

    let mut sizes = vec![0usize; model.components()];
    for component in model.predict(matrix.view())? {
        sizes[component] += 1;
    }
    tracing::info!("Cluster sizes: {:?}", sizes);

    Ok(ClusterSummary {
        components: model.components(),
        rows: matrix.nrows(),
        sizes,
        converged: model.converged,
        mean_log_likelihood: model.lower_bound,
        path,
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_impossible_values() {
        let bad = [
            TrainConfig { batch_size: 0, ..TrainConfig::default() },
            TrainConfig { patience: 0, ..TrainConfig::default() },
            TrainConfig { lr: 0.0, ..TrainConfig::default() },
            TrainConfig { val_fraction: 1.0, ..TrainConfig::default() },
            TrainConfig { dropout: 1.0, ..TrainConfig::default() },
            TrainConfig { label_smoothing: -0.1, ..TrainConfig::default() },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(PipelineError::Configuration(_))), "{cfg:?}");
        }
    }

    #[test]
    fn test_model_config_follows_cardinalities() {
        let cfg = TrainConfig { embedding_dim: 64, ..TrainConfig::default() };
        let model_cfg = cfg.model_config([4, 2, 9]);
        assert_eq!(model_cfg.embedding_dim, 64);
        assert_eq!(model_cfg.backbone.embedding_dim, 64);
        assert_eq!(model_cfg.classes(Attribute::Accent), 9);
        assert_eq!(model_cfg.dropout, 0.3);
    }

    /// 40 tiny PNGs whose colour depends on the labels
    fn write_corpus(dir: &std::path::Path) -> PathBuf {
        let ages = ["teens", "twenties"];
        let genders = ["female", "male"];
        let accents = ["england", "scotland", "us"];
        let mut csv = String::from("age,gender,accent,filename_spectrogram\n");
        for i in 0..40 {
            let (a, g, c) = (i % 2, (i / 2) % 2, i % 3);
            let name = format!("spec_{i}.png");
            let shade = (40 * c + 20 * g + 10 * a) as u8;
            RgbImage::from_pixel(12, 12, Rgb([shade, 255 - shade, shade / 2]))
                .save(dir.join(&name))
                .unwrap();
            csv.push_str(&format!("{},{},{},{}\n", ages[a], genders[g], accents[c], name));
        }
        // dropped: missing accent
        csv.push_str("teens,female,,spec_0.png\n");
        let manifest = dir.join("manifest.csv");
        fs::write(&manifest, csv).unwrap();
        manifest
    }

    /// Small enough to train in a test: 32 train and 8 validation rows
    fn tiny_config(dir: &std::path::Path, manifest: PathBuf) -> TrainConfig {
        TrainConfig {
            manifest,
            image_root: Some(dir.to_path_buf()),
            artifact_dir: dir.join("artifacts"),
            batch_size: 8,
            epochs: 2,
            image_size: 16,
            embedding_dim: 8,
            base_channels: 2,
            num_workers: 1,
            clusters: 2,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_full_pipeline_on_tiny_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_corpus(dir.path());
        let cfg = tiny_config(dir.path(), manifest);
        let artifacts = cfg.artifact_dir.clone();

        let outcome = TrainUseCase::new(cfg).execute().unwrap();

        assert_eq!(outcome.epochs_run, 2);
        assert_eq!(outcome.phase, TrainingPhase::Completed);
        assert_eq!(outcome.evaluation.samples, 8);
        let clusters = outcome.clusters.as_ref().unwrap();
        assert_eq!(clusters.rows, 32);
        assert_eq!(clusters.sizes.iter().sum::<usize>(), 32);
        for file in [
            "age_codec.json",
            "gender_codec.json",
            "accent_codec.json",
            "best_model.mpk.gz",
            "best_epoch.json",
            "train_config.json",
            "metrics.csv",
            CLUSTER_MODEL_FILE,
        ] {
            assert!(artifacts.join(file).exists(), "missing {file}");
        }

        // `evaluate` rebuilds the same split and model
        let again = crate::application::evaluate_use_case::EvaluateUseCase::new(&artifacts)
            .execute()
            .unwrap();
        assert_eq!(again.samples, outcome.evaluation.samples);
        assert_eq!(again.pooled, outcome.evaluation.pooled);
    }

    #[test]
    fn test_clustering_failure_keeps_the_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_corpus(dir.path());
        // 17 components need 34 rows, only 32 are collected
        let cfg = TrainConfig {
            clusters: 17,
            ..tiny_config(dir.path(), manifest)
        };
        let artifacts = cfg.artifact_dir.clone();

        let outcome = TrainUseCase::new(cfg).execute().unwrap();

        assert_eq!(outcome.evaluation.samples, 8);
        assert!((0.0..=1.0).contains(&outcome.evaluation.pooled.accuracy));
        assert!(outcome.best.is_some());
        assert!(artifacts.join("best_model.mpk.gz").exists());

        let err = outcome.clusters.unwrap_err();
        assert_eq!(err.to_string(), "clustering stage failed");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InsufficientData(_))
        ));
        assert!(!artifacts.join(CLUSTER_MODEL_FILE).exists());
    }

    #[test]
    fn test_unreadable_image_fails_in_data_preparation_stage() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_corpus(dir.path());
        fs::remove_file(dir.path().join("spec_7.png")).unwrap();

        let err = TrainUseCase::new(tiny_config(dir.path(), manifest))
            .execute()
            .unwrap_err();
        assert_eq!(err.to_string(), "data preparation stage failed");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_empty_embedding_buffer_fails_in_clustering_stage() {
        use crate::ml::engine::{EmbeddingBuffer, TrainingState};

        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            artifact_dir: dir.path().to_path_buf(),
            ..TrainConfig::default()
        };
        // early stop at epoch 3 of 25: nothing was collected
        let report = TrainingReport {
            phase: TrainingPhase::EarlyStopped { epoch: 3 },
            state: TrainingState::new(3),
            embeddings: EmbeddingBuffer::default(),
        };

        let err = fit_clusters(&cfg, &report).context(Stage::Clustering).unwrap_err();
        assert_eq!(err.to_string(), "clustering stage failed");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InsufficientData(_))
        ));
        assert!(!dir.path().join(CLUSTER_MODEL_FILE).exists());
    }
}
