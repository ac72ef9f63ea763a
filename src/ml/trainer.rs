// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Burn side of the training engine: one BurnEpochRunner owns the
// model, the Adam optimiser, the LR schedule and both loaders,
// and TrainingEngine (engine.rs) decides when to checkpoint,
// when to stop and when to collect embeddings.
//
// Backend notes:
//   - training runs on Autodiff<NdArray> (cpu) or Autodiff<Wgpu> (gpu)
//   - model.valid() returns the model on B::InnerBackend, so the
//     validation batcher is built for the inner backend too
//   - argmax(1) returns [batch, 1]; AttributeLogits::predictions
//     flattens it before comparing with the targets

use anyhow::Result;
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::sync::Arc;

use crate::application::train_use_case::{ComputeDevice, TrainConfig};
use crate::data::{
    batcher::{SpectrogramBatch, SpectrogramBatcher},
    dataset::SpectrogramDataset,
};
use crate::domain::labels::Attribute;
use crate::infra::{
    checkpoint::{load_backbone_weights, CheckpointManager},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    engine::{EmbeddingBuffer, EpochRunner, TrainingEngine, TrainingReport},
    loss::MultiHeadLoss,
    model::{correct_predictions, ForwardMode, MultiHeadClassifier, MultiHeadClassifierConfig},
    schedule::{LrSchedule, StepLr},
};

pub fn run_training(
    cfg: &TrainConfig,
    model_cfg: &MultiHeadClassifierConfig,
    train_dataset: SpectrogramDataset,
    val_dataset: SpectrogramDataset,
    ckpt_manager: &CheckpointManager,
) -> Result<TrainingReport> {
    match cfg.device {
        ComputeDevice::Cpu => {
            let device = NdArrayDevice::Cpu;
            tracing::info!("Using NdArray device: {:?}", device);
            train_on::<Autodiff<NdArray>>(cfg, model_cfg, train_dataset, val_dataset, ckpt_manager, device)
        }
        ComputeDevice::Gpu => {
            let device = WgpuDevice::default();
            tracing::info!("Using WGPU device: {:?}", device);
            train_on::<Autodiff<Wgpu>>(cfg, model_cfg, train_dataset, val_dataset, ckpt_manager, device)
        }
    }
}

fn train_on<B: AutodiffBackend>(
    cfg: &TrainConfig,
    model_cfg: &MultiHeadClassifierConfig,
    train_dataset: SpectrogramDataset,
    val_dataset: SpectrogramDataset,
    ckpt_manager: &CheckpointManager,
    device: B::Device,
) -> Result<TrainingReport> {
    B::seed(cfg.seed);

    // ── Build model ───────────────────────────────────────────────────────────
    let mut backbone = model_cfg.backbone.init::<B>(&device);
    if let Some(path) = &cfg.backbone_weights {
        backbone = load_backbone_weights(backbone, path, &device)?;
    }
    let model = model_cfg.init_with_backbone(backbone, &device)?;
    tracing::info!(
        "Model ready: embedding_dim={}, heads age={} gender={} accent={}",
        model.embedding_dim(),
        model_cfg.age_classes,
        model_cfg.gender_classes,
        model_cfg.accent_classes,
    );

    let loss = MultiHeadLoss::new(
        Attribute::ALL.map(|a| model_cfg.classes(a)),
        cfg.label_smoothing,
    )?;

    // ── Adam optimiser ────────────────────────────────────────────────────────
    // m = β1*m + (1-β1)*g        (mean)
    // v = β2*v + (1-β2)*g²       (variance)
    // θ = θ - lr * m / (√v + ε)  (update)
    let optim = AdamConfig::new()
        .with_epsilon(1e-8)
        .init::<B, MultiHeadClassifier<B>>();

    // ── Data loaders ──────────────────────────────────────────────────────────
    let shape = train_dataset.shape();
    let train_loader = DataLoaderBuilder::new(SpectrogramBatcher::<B>::new(device.clone(), shape))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(cfg.num_workers)
        .build(train_dataset);

    // validation order is fixed; no autodiff overhead
    let val_loader = DataLoaderBuilder::new(SpectrogramBatcher::<B::InnerBackend>::new(device, shape))
        .batch_size(cfg.batch_size)
        .num_workers(cfg.num_workers)
        .build(val_dataset);

    let mut runner = BurnEpochRunner {
        model,
        optim,
        loss,
        schedule: StepLr::new(cfg.lr, cfg.lr_step_size, cfg.lr_gamma),
        train_loader,
        val_loader,
        ckpt_manager,
        metrics: MetricsLogger::new(ckpt_manager.dir())?,
    };

    let engine = TrainingEngine::new(cfg.epochs, cfg.patience)?;
    let report = engine.run(&mut runner)?;

    tracing::info!(
        "Training finished after {} epoch(s): {:?}, best val_acc={:.4}",
        report.epochs_run(),
        report.phase,
        report.state.best_val_accuracy()
    );
    Ok(report)
}

// ─── BurnEpochRunner ──────────────────────────────────────────────────────────
struct BurnEpochRunner<'a, B: AutodiffBackend, O> {
    model: MultiHeadClassifier<B>,
    optim: O,
    loss: MultiHeadLoss,
    schedule: StepLr,
    train_loader: Arc<dyn DataLoader<SpectrogramBatch<B>>>,
    val_loader: Arc<dyn DataLoader<SpectrogramBatch<B::InnerBackend>>>,
    ckpt_manager: &'a CheckpointManager,
    metrics: MetricsLogger,
}

/// Running sums over one pass
#[derive(Default)]
struct PassTotals {
    loss: f64,
    samples: usize,
    correct: [usize; 3],
}

impl PassTotals {
    fn mean_loss(&self) -> f64 {
        if self.samples > 0 {
            self.loss / self.samples as f64
        } else {
            f64::NAN
        }
    }

    /// correct predictions / (samples × 3)
    fn joint_accuracy(&self) -> f64 {
        if self.samples > 0 {
            self.correct.iter().sum::<usize>() as f64 / (self.samples * 3) as f64
        } else {
            0.0
        }
    }

    fn attribute_accuracy(&self) -> [f64; 3] {
        self.correct.map(|c| {
            if self.samples > 0 {
                c as f64 / self.samples as f64
            } else {
                0.0
            }
        })
    }
}

impl<B, O> BurnEpochRunner<'_, B, O>
where
    B: AutodiffBackend,
    O: Optimizer<MultiHeadClassifier<B>, B>,
{
    fn train_pass(&mut self, lr: f64, mut collector: Option<&mut EmbeddingBuffer>) -> Result<PassTotals> {
        let mut totals = PassTotals::default();

        for batch in self.train_loader.iter() {
            let n = batch.size();
            let output = self.model.forward(batch.images.clone(), ForwardMode::Train);
            let loss = self.loss.total(&output, &batch);

            totals.loss += loss.clone().into_scalar().elem::<f64>() * n as f64;
            totals.samples += n;
            for attribute in Attribute::ALL {
                totals.correct[attribute.index()] +=
                    correct_predictions(output.predictions(attribute), batch.targets(attribute));
            }

            if let Some(buffer) = collector.as_deref_mut() {
                let embedding = output.embedding.clone().detach();
                let [_, width] = embedding.dims();
                let rows: Vec<f32> = embedding.into_data().iter::<f32>().collect();
                buffer.push_batch(&rows, width, &batch.label_triples())?;
            }

            // Backward pass + Adam update
            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self.optim.step(lr, self.model.clone(), grads);
        }
        Ok(totals)
    }

    fn validation_pass(&self) -> PassTotals {
        let model = self.model.valid();
        let mut totals = PassTotals::default();

        for batch in self.val_loader.iter() {
            let n = batch.size();
            let output = model.forward(batch.images.clone(), ForwardMode::Eval);
            let loss = self.loss.total(&output, &batch);

            totals.loss += loss.into_scalar().elem::<f64>() * n as f64;
            totals.samples += n;
            for attribute in Attribute::ALL {
                totals.correct[attribute.index()] +=
                    correct_predictions(output.predictions(attribute), batch.targets(attribute));
            }
        }
        totals
    }
}

impl<B, O> EpochRunner for BurnEpochRunner<'_, B, O>
where
    B: AutodiffBackend,
    O: Optimizer<MultiHeadClassifier<B>, B>,
{
    fn run_epoch(&mut self, epoch: usize, collector: Option<&mut EmbeddingBuffer>) -> Result<EpochMetrics> {
        let lr = self.schedule.lr();
        let train = self.train_pass(lr, collector)?;
        let val = self.validation_pass();

        let metrics = EpochMetrics {
            epoch,
            lr,
            train_loss: train.mean_loss(),
            val_loss: val.mean_loss(),
            train_accuracy: train.joint_accuracy(),
            val_accuracy: val.joint_accuracy(),
            val_attribute_accuracy: val.attribute_accuracy(),
        };
        self.metrics.log(&metrics)?;
        Ok(metrics)
    }

    fn save_checkpoint(&mut self, epoch: usize, val_accuracy: f64) -> Result<()> {
        self.ckpt_manager.save_best(&self.model, epoch, val_accuracy)?;
        Ok(())
    }

    fn step_schedule(&mut self) -> f64 {
        self.schedule.step()
    }
}
