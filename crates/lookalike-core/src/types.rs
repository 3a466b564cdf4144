use image::{imageops::FilterType, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Side length of the canonical face crop shared by gallery and query paths.
pub const CANONICAL_SIZE: u32 = 224;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Clamp the box to an image of `width` × `height`, returning integer
    /// `(x, y, w, h)`. `None` when nothing of the box lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let finite = [self.x, self.y, self.width, self.height].iter().all(|v| v.is_finite());
        if !finite {
            return None;
        }
        let x0 = self.x.floor().clamp(0.0, width as f32) as u32;
        let y0 = self.y.floor().clamp(0.0, height as f32) as u32;
        let x1 = (self.x + self.width).ceil().clamp(0.0, width as f32) as u32;
        let y1 = (self.y + self.height).ceil().clamp(0.0, height as f32) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Identity embedding produced by one embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "w600k_r50").
    pub model_id: String,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model_id: impl Into<String>) -> Self {
        Self {
            values,
            model_id: model_id.into(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// A face region resized to `CANONICAL_SIZE` × `CANONICAL_SIZE` RGB.
///
/// Constructors enforce the resolution, so every crop that reaches an
/// embedder is geometrically comparable to every other.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalCrop {
    image: RgbImage,
}

impl CanonicalCrop {
    /// Resize an arbitrary face region to the canonical resolution.
    pub fn from_region(region: &RgbImage) -> Self {
        let image = if region.dimensions() == (CANONICAL_SIZE, CANONICAL_SIZE) {
            region.clone()
        } else {
            image::imageops::resize(region, CANONICAL_SIZE, CANONICAL_SIZE, FilterType::Lanczos3)
        };
        Self { image }
    }

    /// Wrap an image that is already canonical. `None` on any other size.
    pub fn from_canonical(image: RgbImage) -> Option<Self> {
        (image.dimensions() == (CANONICAL_SIZE, CANONICAL_SIZE)).then_some(Self { image })
    }

    /// Load a persisted crop, rejecting files at a different resolution.
    pub fn load(path: &Path) -> Result<Self, CropError> {
        let image = image::open(path)?.to_rgb8();
        let (width, height) = image.dimensions();
        Self::from_canonical(image).ok_or(CropError::Resolution { width, height })
    }

    /// Persist the crop; the format follows the file extension.
    pub fn save(&self, path: &Path) -> Result<(), CropError> {
        self.image.save(path)?;
        Ok(())
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Per-channel mean in 0.0–255.0.
    pub fn mean_rgb(&self) -> [f32; 3] {
        let mut sum = [0f64; 3];
        for px in self.image.pixels() {
            for c in 0..3 {
                sum[c] += px.0[c] as f64;
            }
        }
        let n = (CANONICAL_SIZE * CANONICAL_SIZE) as f64;
        [(sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32]
    }
}

#[derive(Error, Debug)]
pub enum CropError {
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("crop is {width}x{height}, expected {CANONICAL_SIZE}x{CANONICAL_SIZE}")]
    Resolution { width: u32, height: u32 },
}
