// ============================================================
// Layer 4 — Image Transform
// ============================================================
// Decodes a spectrogram image and turns it into the flat,
// normalised CHW float buffer the backbone expects.
//
// Steps (deterministic — no augmentation):
//   1. decode with the `image` crate (PNG / JPEG)
//   2. resize to size × size with a triangle filter
//   3. convert to 8-bit RGB
//   4. scale to [0, 1] and normalise per channel:
//        x' = (x / 255 − mean[c]) / std[c]
//   5. lay out channel-major: [c][y][x]

use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::error::PipelineError;

/// Channel statistics of the ImageNet training set
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Shape of one decoded sample, without the batch dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self { channels, height, width }
    }

    /// Number of floats in one sample
    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }
}

#[derive(Debug, Clone)]
pub struct ImageTransform {
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImageTransform {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    pub fn shape(&self) -> ImageShape {
        ImageShape::new(3, self.size as usize, self.size as usize)
    }

    /// Decode and transform one file. Missing or undecodable files
    /// are data-integrity failures.
    pub fn load(&self, path: &Path) -> Result<Vec<f32>, PipelineError> {
        let img = image::open(path).map_err(|e| {
            PipelineError::DataIntegrity(format!(
                "cannot decode spectrogram '{}': {e}",
                path.display()
            ))
        })?;
        Ok(self.apply(&img))
    }

    pub fn apply(&self, img: &DynamicImage) -> Vec<f32> {
        let rgb = img
            .resize_exact(self.size, self.size, FilterType::Triangle)
            .to_rgb8();

        let plane = (self.size * self.size) as usize;
        let width = self.size as usize;
        let mut out = vec![0.0f32; 3 * plane];

        for (x, y, pixel) in rgb.enumerate_pixels() {
            let offset = y as usize * width + x as usize;
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.0;
                out[c * plane + offset] = (value - self.mean[c]) / self.std[c];
            }
        }
        out
    }
}
