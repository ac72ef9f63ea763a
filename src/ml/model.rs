// ============================================================
// Layer 5 — Multi-Head Classifier
// ============================================================
// One shared backbone, three independent linear heads:
//
//                       ┌─ dropout ─ age_head    → [B, n_age]
//   images ─ backbone ──┼─ dropout ─ gender_head → [B, n_gender]
//              │        └─ dropout ─ accent_head → [B, n_accent]
//              └──────────────────── embedding   → [B, E]
//
// Heads only read the shared embedding, never another head's
// output. Dropout is applied only when the caller passes
// ForwardMode::Train.

use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
};

use crate::domain::error::PipelineError;
use crate::domain::labels::Attribute;
use crate::ml::backbone::{ConvBackbone, ConvBackboneConfig, FeatureExtractor};

/// Whether a forward pass belongs to an optimisation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    Train,
    Eval,
}

#[derive(Config, Debug)]
pub struct MultiHeadClassifierConfig {
    pub backbone: ConvBackboneConfig,
    /// Input width of every head; must equal the backbone's output width
    pub embedding_dim: usize,
    pub age_classes: usize,
    pub gender_classes: usize,
    pub accent_classes: usize,
    #[config(default = 0.3)]
    pub dropout: f64,
}

impl MultiHeadClassifierConfig {
    pub fn classes(&self, attribute: Attribute) -> usize {
        match attribute {
            Attribute::Age => self.age_classes,
            Attribute::Gender => self.gender_classes,
            Attribute::Accent => self.accent_classes,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<MultiHeadClassifier<B>, PipelineError> {
        self.init_with_backbone(self.backbone.init(device), device)
    }

    /// Attach fresh heads to an existing (e.g. pretrained) backbone.
    /// The width check happens here, never at the first forward pass.
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone: ConvBackbone<B>,
        device: &B::Device,
    ) -> Result<MultiHeadClassifier<B>, PipelineError> {
        if backbone.embedding_dim() != self.embedding_dim {
            return Err(PipelineError::Configuration(format!(
                "backbone produces {}-wide embeddings but the heads expect {}",
                backbone.embedding_dim(),
                self.embedding_dim
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(PipelineError::Configuration(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        for attribute in Attribute::ALL {
            if self.classes(attribute) == 0 {
                return Err(PipelineError::Configuration(format!(
                    "the {attribute} head has no classes"
                )));
            }
        }

        let head = |classes: usize| LinearConfig::new(self.embedding_dim, classes).init(device);
        Ok(MultiHeadClassifier {
            backbone,
            age_head: head(self.age_classes),
            gender_head: head(self.gender_classes),
            accent_head: head(self.accent_classes),
            dropout: DropoutConfig::new(self.dropout).init(),
        })
    }
}

#[derive(Module, Debug)]
pub struct MultiHeadClassifier<B: Backend> {
    backbone: ConvBackbone<B>,
    age_head: Linear<B>,
    gender_head: Linear<B>,
    accent_head: Linear<B>,
    dropout: Dropout,
}

/// Everything one forward pass produces.
pub struct AttributeLogits<B: Backend> {
    pub age: Tensor<B, 2>,
    pub gender: Tensor<B, 2>,
    pub accent: Tensor<B, 2>,
    /// Backbone output before dropout — shape: [batch, embedding_dim]
    pub embedding: Tensor<B, 2>,
}

impl<B: Backend> AttributeLogits<B> {
    pub fn head(&self, attribute: Attribute) -> Tensor<B, 2> {
        match attribute {
            Attribute::Age => self.age.clone(),
            Attribute::Gender => self.gender.clone(),
            Attribute::Accent => self.accent.clone(),
        }
    }

    /// Arg-max class per sample — shape: [batch]
    pub fn predictions(&self, attribute: Attribute) -> Tensor<B, 1, Int> {
        // argmax(1) returns [batch, 1]
        self.head(attribute).argmax(1).flatten::<1>(0, 1)
    }
}

impl<B: Backend> MultiHeadClassifier<B> {
    /// images: [batch, channels, height, width]
    pub fn forward(&self, images: Tensor<B, 4>, mode: ForwardMode) -> AttributeLogits<B> {
        let embedding = self.backbone.extract(images);

        let features = match mode {
            ForwardMode::Train => self.dropout.forward(embedding.clone()),
            ForwardMode::Eval => embedding.clone(),
        };

        AttributeLogits {
            age: self.age_head.forward(features.clone()),
            gender: self.gender_head.forward(features.clone()),
            accent: self.accent_head.forward(features),
            embedding,
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.backbone.embedding_dim()
    }
}

/// Number of samples whose arg-max matches the target
pub fn correct_predictions<B: Backend>(predictions: Tensor<B, 1, Int>, targets: Tensor<B, 1, Int>) -> usize {
    predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};
    use burn::tensor::Distribution;

    fn config(embedding_dim: usize) -> MultiHeadClassifierConfig {
        MultiHeadClassifierConfig::new(
            ConvBackboneConfig::new(embedding_dim).with_base_channels(4),
            embedding_dim,
            2,
            2,
            3,
        )
    }

    #[test]
    fn test_head_shapes() {
        let device = NdArrayDevice::Cpu;
        let model = config(16).init::<NdArray>(&device).unwrap();
        let images = Tensor::<NdArray, 4>::random([4, 3, 16, 16], Distribution::Default, &device);

        let out = model.forward(images, ForwardMode::Eval);
        assert_eq!(out.age.dims(), [4, 2]);
        assert_eq!(out.gender.dims(), [4, 2]);
        assert_eq!(out.accent.dims(), [4, 3]);
        assert_eq!(out.embedding.dims(), [4, 16]);
        assert_eq!(out.predictions(Attribute::Accent).dims(), [4]);
    }

    #[test]
    fn test_width_mismatch_fails_at_construction() {
        let device = NdArrayDevice::Cpu;
        let mut cfg = config(16);
        cfg.embedding_dim = 32;

        match cfg.init::<NdArray>(&device) {
            Err(PipelineError::Configuration(msg)) => assert!(msg.contains("16")),
            other => panic!("expected a configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_dropout_is_rejected() {
        let device = NdArrayDevice::Cpu;
        let cfg = config(8).with_dropout(1.0);
        assert!(cfg.init::<NdArray>(&device).is_err());
    }

    #[test]
    fn test_eval_mode_ignores_dropout_on_autodiff_backend() {
        type B = Autodiff<NdArray>;
        let device = NdArrayDevice::Cpu;
        let model = config(8).with_dropout(0.9).init::<B>(&device).unwrap();
        let images = Tensor::<B, 4>::random([3, 3, 16, 16], Distribution::Default, &device);

        let a = model.forward(images.clone(), ForwardMode::Eval).accent.into_data();
        let b = model.forward(images, ForwardMode::Eval).accent.into_data();
        a.assert_approx_eq(&b, 5);
    }

    #[test]
    fn test_correct_predictions_counts_matches() {
        let device = NdArrayDevice::Cpu;
        let preds = Tensor::<NdArray, 1, Int>::from_ints([0, 1, 2, 1].as_slice(), &device);
        let targets = Tensor::<NdArray, 1, Int>::from_ints([0, 1, 1, 1].as_slice(), &device);
        assert_eq!(correct_predictions(preds, targets), 3);
    }
}
