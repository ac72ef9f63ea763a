// ============================================================
// Layer 5 — Evaluation Reporter
// ============================================================
// Reloads the best checkpoint into a fresh classifier and scores
// it on the validation set.
//
// The headline metrics are pooled: for every sample the three
// arg-max predictions and the three true labels are appended in
// attribute order,
//
//   y_true = [age₀, gender₀, accent₀, age₁, gender₁, accent₁, …]
//   y_pred = [ … same layout … ]
//
// and one accuracy / macro precision / recall / F1 is computed
// over the combined sequence. Index 1 of the age head and index 1
// of the accent head therefore count as the same "class". This is
// kept deliberately so results stay comparable with earlier runs;
// the per-head accuracies are reported next to it.

use anyhow::Result;
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, NdArray, Wgpu},
    data::dataloader::{DataLoader, DataLoaderBuilder},
    prelude::*,
};
use std::{collections::BTreeSet, fmt, sync::Arc};

use crate::application::train_use_case::{ComputeDevice, TrainConfig};
use crate::data::{
    batcher::{SpectrogramBatch, SpectrogramBatcher},
    dataset::SpectrogramDataset,
};
use crate::domain::labels::Attribute;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::{ForwardMode, MultiHeadClassifier, MultiHeadClassifierConfig};

// ─── PooledMetrics ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PooledMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of pooled labels (samples × 3)
    pub support: usize,
}

impl PooledMetrics {
    /// Macro-averaged over the union of true and predicted classes.
    /// A class with no predictions (or no true samples) scores 0.
    pub fn compute(y_true: &[usize], y_pred: &[usize]) -> Self {
        let support = y_true.len().min(y_pred.len());
        if support == 0 {
            return Self {
                accuracy: 0.0,
                precision: 0.0,
                recall: 0.0,
                f1: 0.0,
                support,
            };
        }
        let pairs = || y_true.iter().zip(y_pred);

        let correct = pairs().filter(|(t, p)| t == p).count();
        let classes: BTreeSet<usize> = pairs().flat_map(|(&t, &p)| [t, p]).collect();

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
        for &class in &classes {
            let tp = pairs().filter(|&(&t, &p)| t == class && p == class).count();
            let predicted = pairs().filter(|&(_, &p)| p == class).count();
            let actual = pairs().filter(|&(&t, _)| t == class).count();

            let p = ratio(tp, predicted);
            let r = ratio(tp, actual);
            precision += p;
            recall += r;
            f1 += if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
        }
        let n = classes.len() as f64;

        Self {
            accuracy: correct as f64 / support as f64,
            precision: precision / n,
            recall: recall / n,
            f1: f1 / n,
            support,
        }
    }
}

// ─── EvaluationReport ─────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub pooled: PooledMetrics,
    /// Per-head accuracy, in Attribute order
    pub attribute_accuracy: [f64; 3],
    pub samples: usize,
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "── Evaluation (best checkpoint, validation set) ──")?;
        writeln!(f, "  samples          : {} ({} pooled labels)", self.samples, self.pooled.support)?;
        writeln!(f, "  pooled accuracy  : {:.4}", self.pooled.accuracy)?;
        writeln!(f, "  macro precision  : {:.4}", self.pooled.precision)?;
        writeln!(f, "  macro recall     : {:.4}", self.pooled.recall)?;
        write!(f, "  macro F1         : {:.4}", self.pooled.f1)?;
        for attribute in Attribute::ALL {
            write!(
                f,
                "\n  {:<7} accuracy : {:.4}",
                attribute.name(),
                self.attribute_accuracy[attribute.index()]
            )?;
        }
        Ok(())
    }
}

/// Sample-major flattening of per-head predictions.
/// `heads[a][i]` is the class of head `a` for sample `i`.
pub fn pool_predictions(heads: &[Vec<usize>; 3]) -> Vec<usize> {
    let samples = heads.iter().map(Vec::len).min().unwrap_or(0);
    (0..samples)
        .flat_map(|i| Attribute::ALL.map(|a| heads[a.index()][i]))
        .collect()
}

// ─── EvaluationReporter ───────────────────────────────────────────────────────
pub struct EvaluationReporter;

impl EvaluationReporter {
    /// Inference-mode pass over every batch of `loader`.
    pub fn evaluate<B: Backend>(
        model: &MultiHeadClassifier<B>,
        loader: Arc<dyn DataLoader<SpectrogramBatch<B>>>,
    ) -> EvaluationReport {
        let mut truth: [Vec<usize>; 3] = Default::default();
        let mut predicted: [Vec<usize>; 3] = Default::default();

        for batch in loader.iter() {
            let logits = model.forward(batch.images.clone(), ForwardMode::Eval);
            for triple in batch.label_triples() {
                for attribute in Attribute::ALL {
                    truth[attribute.index()].push(triple.get(attribute));
                }
            }
            for attribute in Attribute::ALL {
                let classes = logits.predictions(attribute).into_data();
                predicted[attribute.index()].extend(classes.iter::<i64>().map(|c| c as usize));
            }
        }

        let attribute_accuracy = Attribute::ALL.map(|a| {
            let (t, p) = (&truth[a.index()], &predicted[a.index()]);
            let correct = t.iter().zip(p).filter(|(x, y)| x == y).count();
            if t.is_empty() { 0.0 } else { correct as f64 / t.len() as f64 }
        });

        EvaluationReport {
            pooled: PooledMetrics::compute(&pool_predictions(&truth), &pool_predictions(&predicted)),
            attribute_accuracy,
            samples: truth[0].len(),
        }
    }
}

/// Rebuild the classifier from `model_cfg`, load the best snapshot
/// and evaluate it on `val_dataset`.
pub fn evaluate_best(
    cfg: &TrainConfig,
    model_cfg: &MultiHeadClassifierConfig,
    val_dataset: SpectrogramDataset,
    ckpt_manager: &CheckpointManager,
) -> Result<EvaluationReport> {
    match cfg.device {
        ComputeDevice::Cpu => evaluate_on::<NdArray>(cfg, model_cfg, val_dataset, ckpt_manager, NdArrayDevice::Cpu),
        ComputeDevice::Gpu => evaluate_on::<Wgpu>(cfg, model_cfg, val_dataset, ckpt_manager, WgpuDevice::default()),
    }
}

fn evaluate_on<B: Backend>(
    cfg: &TrainConfig,
    model_cfg: &MultiHeadClassifierConfig,
    val_dataset: SpectrogramDataset,
    ckpt_manager: &CheckpointManager,
    device: B::Device,
) -> Result<EvaluationReport> {
    let model: MultiHeadClassifier<B> = model_cfg.init(&device)?;
    let model = ckpt_manager.load_best(model, &device)?;

    let batcher = SpectrogramBatcher::<B>::new(device, val_dataset.shape());
    let loader = DataLoaderBuilder::new(batcher)
        .batch_size(cfg.batch_size)
        .num_workers(cfg.num_workers)
        .build(val_dataset);

    Ok(EvaluationReporter::evaluate(&model, loader))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::SpectrogramSample;
    use crate::data::transform::ImageShape;
    use crate::domain::labels::LabelTriple;
    use crate::ml::backbone::ConvBackboneConfig;
    use approx::assert_relative_eq;

    #[test]
    fn test_macro_metrics_match_reference_values() {
        let m = PooledMetrics::compute(&[0, 1, 2, 0, 1, 2], &[0, 2, 1, 0, 0, 1]);
        assert_relative_eq!(m.accuracy, 1.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(m.precision, 2.0 / 9.0, epsilon = 1e-9);
        assert_relative_eq!(m.recall, 1.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(m.f1, 0.8 / 3.0, epsilon = 1e-9);
        assert_eq!(m.support, 6);
    }

    #[test]
    fn test_class_only_in_predictions_counts_as_zero() {
        // class 3 is never true: precision 0, recall 0 for it
        let m = PooledMetrics::compute(&[0, 0, 1, 1], &[0, 0, 1, 3]);
        assert_relative_eq!(m.accuracy, 0.75);
        assert_relative_eq!(m.recall, (1.0 + 0.5 + 0.0) / 3.0, epsilon = 1e-9);
        assert_relative_eq!(m.precision, (1.0 + 1.0 + 0.0) / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_input_scores_zero() {
        let m = PooledMetrics::compute(&[], &[]);
        assert_eq!(m.support, 0);
        assert_eq!(m.accuracy, 0.0);
    }

    #[test]
    fn test_pooling_is_sample_major() {
        let heads = [vec![1, 2], vec![0, 1], vec![5, 6]];
        assert_eq!(pool_predictions(&heads), vec![1, 0, 5, 2, 1, 6]);
    }

    #[test]
    fn test_reporter_covers_every_sample() {
        use burn::backend::{ndarray::NdArrayDevice, NdArray};
        let device = NdArrayDevice::Cpu;
        let shape = ImageShape::new(3, 8, 8);
        let samples: Vec<SpectrogramSample> = (0..7)
            .map(|i| SpectrogramSample {
                pixels: vec![i as f32 / 7.0; shape.len()],
                labels: LabelTriple::new(i % 2, (i + 1) % 2, i % 3),
            })
            .collect();
        let dataset = SpectrogramDataset::from_samples(samples, shape).unwrap();

        let model = MultiHeadClassifierConfig::new(ConvBackboneConfig::new(4).with_base_channels(2), 4, 2, 2, 3)
            .init::<NdArray>(&device)
            .unwrap();
        let loader = DataLoaderBuilder::new(SpectrogramBatcher::<NdArray>::new(device, shape))
            .batch_size(3)
            .build(dataset);

        let report = EvaluationReporter::evaluate(&model, loader);
        assert_eq!(report.samples, 7);
        assert_eq!(report.pooled.support, 21);
        assert!((0.0..=1.0).contains(&report.pooled.accuracy));
        assert!(report.to_string().contains("macro F1"));
    }
}
