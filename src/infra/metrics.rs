// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:          1-based epoch number
//   - lr:             learning rate used for the epoch
//   - train_loss:     mean summed head loss over training samples
//   - val_loss:       same, on the validation set
//   - train_acc:      joint accuracy, correct predictions / (samples × 3)
//   - val_acc:        joint accuracy on the validation set
//   - val_{attr}_acc: per-head validation accuracy
//
// Output file: {artifact_dir}/metrics.csv, truncated at the start
// of every training run.
//
// Example CSV output:
//   epoch,lr,train_loss,val_loss,train_acc,val_acc,val_age_acc,val_gender_acc,val_accent_acc
//   1,0.000100,3.912000,3.701500,0.412000,0.455000,0.301000,0.712000,0.352000

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::labels::Attribute;

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Zero-based epoch index
    pub epoch: usize,

    pub lr: f64,

    pub train_loss: f64,

    pub val_loss: f64,

    /// Range: [0.0, 1.0]
    pub train_accuracy: f64,

    /// Range: [0.0, 1.0]. Drives checkpointing and early stopping.
    pub val_accuracy: f64,

    /// Validation accuracy of each head, in Attribute order
    pub val_attribute_accuracy: [f64; 3],
}

impl EpochMetrics {
    /// The one-line console summary
    pub fn summary(&self, total_epochs: usize) -> String {
        format!(
            "Epoch {:>3}/{} | lr={:.2e} | train_loss={:.4} | val_loss={:.4} | train_acc={:.1}% | val_acc={:.1}%",
            self.epoch + 1,
            total_epochs,
            self.lr,
            self.train_loss,
            self.val_loss,
            self.train_accuracy * 100.0,
            self.val_accuracy * 100.0,
        )
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the logger and (re)write the header row.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        let mut f = fs::File::create(&csv_path)
            .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;

        let per_head: Vec<String> = Attribute::ALL
            .iter()
            .map(|a| format!("val_{a}_acc"))
            .collect();
        writeln!(
            f,
            "epoch,lr,train_loss,val_loss,train_acc,val_acc,{}",
            per_head.join(",")
        )?;
        tracing::debug!("Created metrics CSV: '{}'", csv_path.display());

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;

        let [age, gender, accent] = m.val_attribute_accuracy;
        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            m.epoch + 1,
            m.lr,
            m.train_loss,
            m.val_loss,
            m.train_accuracy,
            m.val_accuracy,
            age,
            gender,
            accent,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: age={:.3} gender={:.3} accent={:.3}",
            m.epoch + 1,
            age,
            gender,
            accent,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
