// ============================================================
// Layer 5 — Training Engine
// ============================================================
// The epoch-level policy, independent of any tensor backend:
//
//   Running(0) ─▶ Running(1) ─▶ … ─▶ Running(EPOCHS) = Completed
//        │             │
//        └─────────────┴──▶ EarlyStopped { epoch }
//
// Each Running(e) step:
//   1. runner.run_epoch(e)   train pass + validation pass
//   2. TrainingState::record strictly better val accuracy?
//        yes → checkpoint now, patience counter back to 0
//        no  → patience counter + 1
//   3. runner.step_schedule()
//   4. counter == PATIENCE   → EarlyStopped
//
// Embeddings are collected only while running epoch EPOCHS - 1.
// An early stop before that epoch leaves the buffer empty.
//
// The burn-specific work lives behind the EpochRunner trait
// (see trainer.rs), so this policy is tested with a scripted
// runner and no model at all.

use anyhow::Result;
use ndarray::Array2;

use crate::domain::error::PipelineError;
use crate::domain::labels::LabelTriple;
use crate::infra::metrics::EpochMetrics;

// ─── EpochRunner ──────────────────────────────────────────────────────────────
/// One training + validation pass, plus the side effects the
/// engine triggers between epochs.
pub trait EpochRunner {
    /// Run epoch `epoch`. When `collector` is given, every training
    /// embedding and its label triple must be pushed into it.
    fn run_epoch(&mut self, epoch: usize, collector: Option<&mut EmbeddingBuffer>) -> Result<EpochMetrics>;

    /// Persist the current parameters as the new best snapshot.
    /// Must be durable when this returns.
    fn save_checkpoint(&mut self, epoch: usize, val_accuracy: f64) -> Result<()>;

    /// Advance the learning-rate schedule; returns the new rate
    fn step_schedule(&mut self) -> f64;
}

// ─── EmbeddingBuffer ──────────────────────────────────────────────────────────
/// Host-side embeddings collected during the final scheduled epoch.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBuffer {
    values: Vec<f64>,
    width: Option<usize>,
    labels: Vec<LabelTriple>,
}

impl EmbeddingBuffer {
    /// `rows` is a row-major [labels.len(), width] block.
    pub fn push_batch(&mut self, rows: &[f32], width: usize, labels: &[LabelTriple]) -> Result<(), PipelineError> {
        if rows.len() != width * labels.len() {
            return Err(PipelineError::DataIntegrity(format!(
                "embedding block has {} values, expected {} rows × {}",
                rows.len(),
                labels.len(),
                width
            )));
        }
        match self.width {
            Some(w) if w != width => {
                return Err(PipelineError::DataIntegrity(format!(
                    "embedding width changed from {w} to {width} within one epoch"
                )))
            }
            _ => self.width = Some(width),
        }
        self.values.extend(rows.iter().map(|&v| v as f64));
        self.labels.extend_from_slice(labels);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width.unwrap_or(0)
    }

    pub fn labels(&self) -> &[LabelTriple] {
        &self.labels
    }

    /// Copy into an [len, width] matrix for the cluster fitter.
    pub fn to_matrix(&self) -> Result<Array2<f64>, PipelineError> {
        Array2::from_shape_vec((self.len(), self.width()), self.values.clone())
            .map_err(|e| PipelineError::DataIntegrity(format!("embedding buffer shape: {e}")))
    }
}

// ─── TrainingState ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointEvent {
    pub epoch: usize,
    pub val_accuracy: f64,
}

/// Outcome of recording one epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub improved: bool,
    pub stop: bool,
}

/// Everything the epoch loop mutates, threaded through explicitly.
#[derive(Debug, Clone)]
pub struct TrainingState {
    patience: usize,
    best_val_accuracy: f64,
    epochs_without_improvement: usize,
    history: Vec<EpochMetrics>,
    checkpoints: Vec<CheckpointEvent>,
}

impl TrainingState {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            // the first epoch always checkpoints
            best_val_accuracy: f64::NEG_INFINITY,
            epochs_without_improvement: 0,
            history: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    pub fn record(&mut self, metrics: EpochMetrics) -> Verdict {
        let improved = metrics.val_accuracy > self.best_val_accuracy;
        if improved {
            self.best_val_accuracy = metrics.val_accuracy;
            self.epochs_without_improvement = 0;
        } else {
            self.epochs_without_improvement += 1;
        }
        self.history.push(metrics);

        Verdict {
            improved,
            stop: self.epochs_without_improvement >= self.patience,
        }
    }

    pub fn best_val_accuracy(&self) -> f64 {
        self.best_val_accuracy
    }

    pub fn epochs_without_improvement(&self) -> usize {
        self.epochs_without_improvement
    }

    pub fn history(&self) -> &[EpochMetrics] {
        &self.history
    }

    pub fn checkpoints(&self) -> &[CheckpointEvent] {
        &self.checkpoints
    }

    pub fn best_checkpoint(&self) -> Option<CheckpointEvent> {
        self.checkpoints.last().copied()
    }
}

// ─── TrainingEngine ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Running(usize),
    EarlyStopped { epoch: usize },
    Completed,
}

#[derive(Debug)]
pub struct TrainingReport {
    pub phase: TrainingPhase,
    pub state: TrainingState,
    pub embeddings: EmbeddingBuffer,
}

impl TrainingReport {
    pub fn epochs_run(&self) -> usize {
        self.state.history().len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrainingEngine {
    epochs: usize,
    patience: usize,
}

impl TrainingEngine {
    pub fn new(epochs: usize, patience: usize) -> Result<Self, PipelineError> {
        if epochs == 0 {
            return Err(PipelineError::Configuration("epochs must be at least 1".into()));
        }
        if patience == 0 {
            return Err(PipelineError::Configuration("patience must be at least 1".into()));
        }
        Ok(Self { epochs, patience })
    }

    /// The only epoch whose training embeddings are buffered
    pub fn collection_epoch(&self) -> usize {
        self.epochs - 1
    }

    pub fn run<R: EpochRunner>(&self, runner: &mut R) -> Result<TrainingReport> {
        let mut state = TrainingState::new(self.patience);
        let mut embeddings = EmbeddingBuffer::default();
        let mut phase = TrainingPhase::Running(0);

        while let TrainingPhase::Running(epoch) = phase {
            if epoch == self.epochs {
                phase = TrainingPhase::Completed;
                break;
            }

            let collector = (epoch == self.collection_epoch()).then_some(&mut embeddings);
            let metrics = runner.run_epoch(epoch, collector)?;
            println!("{}", metrics.summary(self.epochs));

            let val_accuracy = metrics.val_accuracy;
            let verdict = state.record(metrics);

            if verdict.improved {
                runner.save_checkpoint(epoch, val_accuracy)?;
                state.checkpoints.push(CheckpointEvent { epoch, val_accuracy });
                println!("  ↳ checkpoint saved (val_acc={:.2}%)", val_accuracy * 100.0);
                tracing::info!("New best validation accuracy {:.4} at epoch {}", val_accuracy, epoch + 1);
            }

            let next_lr = runner.step_schedule();
            tracing::debug!("Learning rate for next epoch: {:.3e}", next_lr);

            phase = if verdict.stop {
                println!(
                    "Early stopping at epoch {}: no improvement for {} epochs",
                    epoch + 1,
                    self.patience
                );
                TrainingPhase::EarlyStopped { epoch }
            } else {
                TrainingPhase::Running(epoch + 1)
            };
        }

        if embeddings.is_empty() {
            tracing::warn!(
                "No embeddings collected: epoch {} was never reached",
                self.collection_epoch() + 1
            );
        } else {
            tracing::info!("Collected {} embeddings of width {}", embeddings.len(), embeddings.width());
        }

        Ok(TrainingReport { phase, state, embeddings })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    /// Replays a fixed list of validation accuracies.
    struct ScriptedRunner {
        val_accuracies: Vec<f64>,
        collected_at: Vec<usize>,
        saved: Vec<(usize, f64)>,
        schedule_steps: usize,
        fail_checkpoint: bool,
    }

    impl ScriptedRunner {
        fn new(val_accuracies: &[f64]) -> Self {
            Self {
                val_accuracies: val_accuracies.to_vec(),
                collected_at: Vec::new(),
                saved: Vec::new(),
                schedule_steps: 0,
                fail_checkpoint: false,
            }
        }
    }

    impl EpochRunner for ScriptedRunner {
        fn run_epoch(&mut self, epoch: usize, collector: Option<&mut EmbeddingBuffer>) -> Result<EpochMetrics> {
            if let Some(buffer) = collector {
                self.collected_at.push(epoch);
                let labels = [LabelTriple::new(0, 1, 2), LabelTriple::new(1, 0, 0)];
                buffer.push_batch(&[0.5, 1.5, 2.5, 3.5], 2, &labels)?;
            }
            let val_accuracy = self.val_accuracies[epoch];
            Ok(EpochMetrics {
                epoch,
                lr: 0.1,
                train_loss: 1.0,
                val_loss: 1.0,
                train_accuracy: val_accuracy,
                val_accuracy,
                val_attribute_accuracy: [val_accuracy; 3],
            })
        }

        fn save_checkpoint(&mut self, epoch: usize, val_accuracy: f64) -> Result<()> {
            if self.fail_checkpoint {
                bail!("disk full");
            }
            self.saved.push((epoch, val_accuracy));
            Ok(())
        }

        fn step_schedule(&mut self) -> f64 {
            self.schedule_steps += 1;
            0.1
        }
    }

    #[test]
    fn test_patience_three_stops_after_epoch_five() {
        let mut runner = ScriptedRunner::new(&[0.1, 0.2, 0.3, 0.3, 0.25, 0.29, 0.9, 0.9, 0.9, 0.9]);
        let report = TrainingEngine::new(10, 3).unwrap().run(&mut runner).unwrap();

        assert_eq!(report.phase, TrainingPhase::EarlyStopped { epoch: 5 });
        assert_eq!(report.epochs_run(), 6);
        assert_eq!(runner.schedule_steps, 6);
    }

    #[test]
    fn test_embeddings_collected_only_in_last_scheduled_epoch() {
        let accuracies: Vec<f64> = (0..10).map(|e| e as f64 / 10.0).collect();
        let mut runner = ScriptedRunner::new(&accuracies);
        let report = TrainingEngine::new(10, 3).unwrap().run(&mut runner).unwrap();

        assert_eq!(report.phase, TrainingPhase::Completed);
        assert_eq!(runner.collected_at, vec![9]);
        assert_eq!(report.embeddings.len(), 2);
        assert_eq!(report.embeddings.width(), 2);
        assert_eq!(report.embeddings.labels()[0], LabelTriple::new(0, 1, 2));

        let matrix = report.embeddings.to_matrix().unwrap();
        assert_eq!(matrix.dim(), (2, 2));
        assert_eq!(matrix[[1, 0]], 2.5);
    }

    #[test]
    fn test_early_stop_before_collection_epoch_collects_nothing() {
        let mut runner = ScriptedRunner::new(&[0.5, 0.4, 0.4, 0.4, 0.4, 0.4, 0.4, 0.4, 0.4, 0.4]);
        let report = TrainingEngine::new(10, 7).unwrap().run(&mut runner).unwrap();

        assert_eq!(report.phase, TrainingPhase::EarlyStopped { epoch: 7 });
        assert!(runner.collected_at.is_empty());
        assert!(report.embeddings.is_empty());
        assert_eq!(report.embeddings.to_matrix().unwrap().nrows(), 0);
    }

    #[test]
    fn test_checkpointed_accuracies_strictly_increase() {
        let mut runner = ScriptedRunner::new(&[0.3, 0.1, 0.5, 0.5, 0.4, 0.6]);
        let report = TrainingEngine::new(6, 10).unwrap().run(&mut runner).unwrap();

        assert_eq!(runner.saved, vec![(0, 0.3), (2, 0.5), (5, 0.6)]);
        let saved: Vec<f64> = report.state.checkpoints().iter().map(|c| c.val_accuracy).collect();
        assert!(saved.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(report.state.best_checkpoint().map(|c| c.epoch), Some(5));
    }

    #[test]
    fn test_ties_do_not_reset_patience() {
        let mut runner = ScriptedRunner::new(&[0.5, 0.5, 0.5, 0.9]);
        let report = TrainingEngine::new(4, 2).unwrap().run(&mut runner).unwrap();

        assert_eq!(report.phase, TrainingPhase::EarlyStopped { epoch: 2 });
        assert_eq!(runner.saved.len(), 1);
    }

    #[test]
    fn test_runs_every_epoch_without_early_stop() {
        let mut runner = ScriptedRunner::new(&[0.1, 0.2, 0.3]);
        let report = TrainingEngine::new(3, 1).unwrap().run(&mut runner).unwrap();

        assert_eq!(report.phase, TrainingPhase::Completed);
        assert_eq!(report.epochs_run(), 3);
        assert_eq!(runner.collected_at, vec![2]);
        assert_eq!(report.state.epochs_without_improvement(), 0);
    }

    #[test]
    fn test_checkpoint_failure_aborts_training() {
        let mut runner = ScriptedRunner::new(&[0.1, 0.2]);
        runner.fail_checkpoint = true;
        let err = TrainingEngine::new(2, 1).unwrap().run(&mut runner).unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_zero_epochs_or_patience_is_rejected() {
        assert!(TrainingEngine::new(0, 3).is_err());
        assert!(TrainingEngine::new(3, 0).is_err());
    }

    #[test]
    fn test_buffer_rejects_ragged_blocks() {
        let mut buffer = EmbeddingBuffer::default();
        let label = [LabelTriple::new(0, 0, 0)];
        assert!(buffer.push_batch(&[1.0, 2.0, 3.0], 2, &label).is_err());
        buffer.push_batch(&[1.0, 2.0], 2, &label).unwrap();
        assert!(buffer.push_batch(&[1.0, 2.0, 3.0], 3, &label).is_err());
    }
}
