// ============================================================
// Layer 5 — Label-Smoothed Cross-Entropy
// ============================================================
// Soft target for a sample whose true class is y, with K classes
// and smoothing s:
//
//   q_j = 1 - s          if j == y
//   q_j = s / (K - 1)    otherwise
//
// Loss = mean over the batch of  -Σ_j q_j · log p_j,
// where log p comes from a numerically stable log-softmax.
// Expanding the sum avoids materialising a one-hot matrix:
//
//   -Σ_j q_j log p_j = -( off · Σ_j log p_j + (on - off) · log p_y )
//
// The three head losses are summed with equal weight.

use burn::prelude::*;

use crate::data::batcher::SpectrogramBatch;
use crate::domain::error::PipelineError;
use crate::domain::labels::Attribute;
use crate::ml::model::AttributeLogits;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedCrossEntropy {
    classes: usize,
    smoothing: f64,
}

impl SmoothedCrossEntropy {
    pub fn new(classes: usize, smoothing: f64) -> Result<Self, PipelineError> {
        if classes < 2 {
            return Err(PipelineError::Configuration(format!(
                "label smoothing needs at least 2 classes, got {classes}"
            )));
        }
        if !(0.0..1.0).contains(&smoothing) {
            return Err(PipelineError::Configuration(format!(
                "label smoothing must be in [0, 1), got {smoothing}"
            )));
        }
        Ok(Self { classes, smoothing })
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    /// Mass on the true class
    fn on_value(&self) -> f64 {
        1.0 - self.smoothing
    }

    /// Mass on each of the other classes
    fn off_value(&self) -> f64 {
        self.smoothing / (self.classes - 1) as f64
    }

    /// The full soft-target distribution for one true class.
    pub fn soft_target(&self, target: usize) -> Vec<f64> {
        (0..self.classes)
            .map(|j| if j == target { self.on_value() } else { self.off_value() })
            .collect()
    }

    /// logits: [batch, classes], targets: [batch] → scalar loss [1]
    pub fn forward<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let [batch, _] = logits.dims();
        let log_probs = stable_log_softmax(logits);

        let sum_log_probs = log_probs.clone().sum_dim(1);
        let true_log_probs = log_probs.gather(1, targets.reshape([batch, 1]));

        let off = self.off_value();
        let per_sample = sum_log_probs
            .mul_scalar(off)
            .add(true_log_probs.mul_scalar(self.on_value() - off))
            .neg();

        per_sample.mean()
    }
}

/// log-softmax over dim 1 with the row maximum subtracted first,
/// so large logits never overflow `exp`.
pub fn stable_log_softmax<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 2> {
    let row_max = logits.clone().detach().max_dim(1);
    let shifted = logits.sub(row_max);
    let log_norm = shifted.clone().exp().sum_dim(1).log();
    shifted.sub(log_norm)
}

// ─── MultiHeadLoss ────────────────────────────────────────────────────────────
/// One smoothed loss per attribute head.
#[derive(Debug, Clone)]
pub struct MultiHeadLoss {
    heads: [SmoothedCrossEntropy; 3],
}

impl MultiHeadLoss {
    /// `cardinalities` in Attribute order (age, gender, accent)
    pub fn new(cardinalities: [usize; 3], smoothing: f64) -> Result<Self, PipelineError> {
        Ok(Self {
            heads: [
                SmoothedCrossEntropy::new(cardinalities[0], smoothing)?,
                SmoothedCrossEntropy::new(cardinalities[1], smoothing)?,
                SmoothedCrossEntropy::new(cardinalities[2], smoothing)?,
            ],
        })
    }

    pub fn head(&self, attribute: Attribute) -> &SmoothedCrossEntropy {
        &self.heads[attribute.index()]
    }

    /// Unweighted sum of the three head losses — shape: [1]
    pub fn total<B: Backend>(&self, logits: &AttributeLogits<B>, batch: &SpectrogramBatch<B>) -> Tensor<B, 1> {
        let head_loss = |attribute: Attribute| {
            self.head(attribute)
                .forward(logits.head(attribute), batch.targets(attribute))
        };
        head_loss(Attribute::Age) + head_loss(Attribute::Gender) + head_loss(Attribute::Accent)
    }
}
