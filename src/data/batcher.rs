// ============================================================
// Layer 4 — Spectrogram Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec of samples into
// device tensors.
//
//   Input:  N SpectrogramSamples, each C·H·W floats + 3 labels
//   Output: images [N, C, H, W]  (float)
//           labels [N, 3]        (int; columns = age, gender, accent)
//
// N equals the configured batch size except for the final,
// possibly partial, batch of an epoch.

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::dataset::SpectrogramSample;
use crate::data::transform::ImageShape;
use crate::domain::labels::{Attribute, LabelTriple};

// ─── SpectrogramBatch ─────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SpectrogramBatch<B: Backend> {
    /// Shape: [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,

    /// Shape: [batch_size, 3], one column per Attribute
    pub labels: Tensor<B, 2, Int>,
}

impl<B: Backend> SpectrogramBatch<B> {
    pub fn size(&self) -> usize {
        self.labels.dims()[0]
    }

    /// Targets of one head — shape: [batch_size]
    pub fn targets(&self, attribute: Attribute) -> Tensor<B, 1, Int> {
        let n = self.size();
        let col = attribute.index();
        self.labels
            .clone()
            .slice([0..n, col..col + 1])
            .flatten::<1>(0, 1)
    }

    /// Host copy of the labels, row by row
    pub fn label_triples(&self) -> Vec<LabelTriple> {
        let flat: Vec<i64> = self.labels.clone().into_data().iter::<i64>().collect();
        flat.chunks_exact(3)
            .map(|row| LabelTriple::new(row[0] as usize, row[1] as usize, row[2] as usize))
            .collect()
    }
}

// ─── SpectrogramBatcher ───────────────────────────────────────────────────────
/// Holds the target device so tensors are created where the
/// model lives, and the per-sample shape used to reshape them.
#[derive(Clone, Debug)]
pub struct SpectrogramBatcher<B: Backend> {
    device: B::Device,
    shape: ImageShape,
}

impl<B: Backend> SpectrogramBatcher<B> {
    pub fn new(device: B::Device, shape: ImageShape) -> Self {
        Self { device, shape }
    }
}

impl<B: Backend> Batcher<SpectrogramSample, SpectrogramBatch<B>> for SpectrogramBatcher<B> {
    fn batch(&self, items: Vec<SpectrogramSample>) -> SpectrogramBatch<B> {
        let n = items.len();
        let ImageShape { channels, height, width } = self.shape;

        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|s| s.pixels.iter().copied())
            .collect();

        let labels: Vec<i32> = items
            .iter()
            .flat_map(|s| s.labels.as_array().map(|l| l as i32))
            .collect();

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([n, channels, height, width]);
        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device)
            .reshape([n, 3]);

        SpectrogramBatch { images, labels }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    fn sample(fill: f32, labels: LabelTriple) -> SpectrogramSample {
        SpectrogramSample {
            pixels: vec![fill; 3 * 2 * 2],
            labels,
        }
    }

    #[test]
    fn test_batch_shapes_and_label_columns() {
        let batcher = SpectrogramBatcher::<NdArray>::new(NdArrayDevice::Cpu, ImageShape::new(3, 2, 2));
        let batch = batcher.batch(vec![
            sample(0.0, LabelTriple::new(1, 0, 2)),
            sample(1.0, LabelTriple::new(0, 1, 1)),
        ]);

        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);
        assert_eq!(batch.labels.dims(), [2, 3]);
        assert_eq!(batch.size(), 2);

        let accents: Vec<i64> = batch
            .targets(Attribute::Accent)
            .into_data()
            .iter::<i64>()
            .collect();
        assert_eq!(accents, vec![2, 1]);

        assert_eq!(
            batch.label_triples(),
            vec![LabelTriple::new(1, 0, 2), LabelTriple::new(0, 1, 1)]
        );
    }

    #[test]
    fn test_sample_pixels_stay_in_their_row() {
        let batcher = SpectrogramBatcher::<NdArray>::new(NdArrayDevice::Cpu, ImageShape::new(3, 2, 2));
        let batch = batcher.batch(vec![
            sample(0.0, LabelTriple::new(0, 0, 0)),
            sample(5.0, LabelTriple::new(0, 0, 0)),
        ]);

        let second: f32 = batch.images.slice([1..2]).sum().into_scalar().elem();
        assert_eq!(second, 5.0 * 12.0);
    }
}
