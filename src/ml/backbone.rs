// ============================================================
// Layer 5 — Feature Backbone
// ============================================================
// The encoder that turns a normalised image batch into one
// embedding vector per image.
//
// The rest of the crate only sees the FeatureExtractor trait:
// an output width and an `extract` call. ConvBackbone is the
// encoder shipped here. It can start from random weights or from
// a pretrained record (see infra::checkpoint::load_backbone_weights).
//
// ConvBackbone architecture:
//
//   [B, 3, H, W]
//     └─ ConvBlock  3 → c      stride 2   (conv 3×3 → batch-norm → ReLU)
//     └─ ConvBlock  c → 2c     stride 2
//     └─ ConvBlock 2c → 4c     stride 2
//     └─ ConvBlock 4c → E      stride 2
//     └─ AdaptiveAvgPool2d → [B, E, 1, 1] → flatten → [B, E]

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

/// Anything that maps an image batch to fixed-width embeddings.
pub trait FeatureExtractor<B: Backend> {
    /// Width of every embedding row this extractor produces
    fn embedding_dim(&self) -> usize;

    /// images: [batch, channels, height, width] → [batch, embedding_dim]
    fn extract(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

#[derive(Config, Debug)]
pub struct ConvBackboneConfig {
    /// Width of the output embedding
    pub embedding_dim: usize,
    #[config(default = 3)]
    pub in_channels: usize,
    /// Channels of the first block; doubled by each of the next two
    #[config(default = 32)]
    pub base_channels: usize,
}

impl ConvBackboneConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBackbone<B> {
        let c = self.base_channels;
        let widths = [
            (self.in_channels, c),
            (c, 2 * c),
            (2 * c, 4 * c),
            (4 * c, self.embedding_dim),
        ];
        let blocks = widths
            .iter()
            .map(|&(from, to)| ConvBlock::new(from, to, device))
            .collect();

        ConvBackbone {
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            embedding_dim: self.embedding_dim,
        }
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.activation.forward(self.norm.forward(self.conv.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct ConvBackbone<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
    embedding_dim: usize,
}

impl<B: Backend> FeatureExtractor<B> for ConvBackbone<B> {
    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn extract(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .blocks
            .iter()
            .fold(images, |x, block| block.forward(x));
        // [B, E, 1, 1] → [B, E]
        self.pool.forward(x).flatten::<2>(1, 3)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    #[test]
    fn test_embedding_width_matches_config() {
        let device = NdArrayDevice::Cpu;
        let backbone = ConvBackboneConfig::new(24)
            .with_base_channels(4)
            .init::<NdArray>(&device);

        let images = Tensor::<NdArray, 4>::zeros([5, 3, 16, 16], &device);
        let embedding = backbone.extract(images);

        assert_eq!(backbone.embedding_dim(), 24);
        assert_eq!(embedding.dims(), [5, 24]);
    }

    #[test]
    fn test_non_square_and_odd_inputs_pool_to_one_row() {
        let device = NdArrayDevice::Cpu;
        let backbone = ConvBackboneConfig::new(8)
            .with_base_channels(2)
            .init::<NdArray>(&device);

        let images = Tensor::<NdArray, 4>::ones([2, 3, 13, 21], &device);
        assert_eq!(backbone.extract(images).dims(), [2, 8]);
    }
}
