// ============================================================
// Layer 4 — Spectrogram Dataset
// ============================================================
// The finite, indexable sample source behind both data loaders.
//
// Images are decoded once, up front, on a rayon pool. A single
// unreadable file aborts construction with a DataIntegrity error,
// so the training loop never meets a missing sample half-way
// through an epoch. `get` then hands out owned copies that the
// batcher consumes.

use burn::data::dataset::Dataset;
use rayon::prelude::*;

use crate::data::transform::{ImageShape, ImageTransform};
use crate::domain::error::PipelineError;
use crate::domain::labels::{LabelTriple, LabeledImage};

/// One decoded, normalised spectrogram with its labels.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramSample {
    /// Channel-major floats, `shape.len()` long
    pub pixels: Vec<f32>,
    pub labels: LabelTriple,
}

#[derive(Debug, Clone)]
pub struct SpectrogramDataset {
    samples: Vec<SpectrogramSample>,
    shape: ImageShape,
}

impl SpectrogramDataset {
    /// Decode every image referenced by `images`
    pub fn decode(images: &[LabeledImage], transform: &ImageTransform) -> Result<Self, PipelineError> {
        let samples = images
            .par_iter()
            .map(|image| {
                Ok(SpectrogramSample {
                    pixels: transform.load(&image.image_path)?,
                    labels: image.labels,
                })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        tracing::debug!("Decoded {} spectrograms", samples.len());
        Ok(Self {
            samples,
            shape: transform.shape(),
        })
    }

    /// Wrap already-decoded samples; every buffer must match `shape`
    pub fn from_samples(samples: Vec<SpectrogramSample>, shape: ImageShape) -> Result<Self, PipelineError> {
        if let Some((i, bad)) = samples
            .iter()
            .enumerate()
            .find(|(_, s)| s.pixels.len() != shape.len())
        {
            return Err(PipelineError::DataIntegrity(format!(
                "sample {i} has {} values, expected {} for {:?}",
                bad.pixels.len(),
                shape.len(),
                shape
            )));
        }
        Ok(Self { samples, shape })
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }
}

impl Dataset<SpectrogramSample> for SpectrogramDataset {
    fn get(&self, index: usize) -> Option<SpectrogramSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    #[test]
    fn test_decode_reads_every_image() {
        let dir = tempfile::tempdir().unwrap();
        let images: Vec<LabeledImage> = (0..4)
            .map(|i| {
                let path = dir.path().join(format!("{i}.png"));
                RgbImage::from_pixel(8, 8, Rgb([i as u8 * 40, 0, 0])).save(&path).unwrap();
                LabeledImage {
                    image_path: path,
                    labels: LabelTriple::new(i % 2, 0, i % 3),
                }
            })
            .collect();

        let dataset = SpectrogramDataset::decode(&images, &ImageTransform::new(4)).unwrap();
        assert_eq!(dataset.len(), 4);
        // rayon must not reorder samples
        assert_eq!(dataset.get(3).unwrap().labels, LabelTriple::new(1, 0, 0));
        assert!(dataset.get(4).is_none());
    }

    #[test]
    fn test_one_missing_image_aborts_decoding() {
        let images = vec![LabeledImage {
            image_path: PathBuf::from("/missing/spectrogram.png"),
            labels: LabelTriple::new(0, 0, 0),
        }];
        let err = SpectrogramDataset::decode(&images, &ImageTransform::new(4)).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }

    #[test]
    fn test_from_samples_checks_buffer_length() {
        let shape = ImageShape::new(3, 2, 2);
        let good = SpectrogramSample {
            pixels: vec![0.0; 12],
            labels: LabelTriple::new(0, 0, 0),
        };
        let bad = SpectrogramSample {
            pixels: vec![0.0; 11],
            labels: LabelTriple::new(0, 0, 0),
        };
        assert!(SpectrogramDataset::from_samples(vec![good.clone()], shape).is_ok());
        assert!(SpectrogramDataset::from_samples(vec![good, bad], shape).is_err());
    }
}
