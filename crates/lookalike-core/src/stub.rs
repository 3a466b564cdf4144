//! Deterministic detector and embedder that need no model files.
//!
//! Used to exercise normalization, gallery and matching logic in tests and
//! offline dry runs.

use crate::embedder::{EmbedError, Embedder, ModelProfile};
use crate::metric::DistanceMetric;
use crate::normalizer::FaceDetect;
use crate::types::{BoundingBox, CanonicalCrop, Embedding};
use image::RgbImage;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Any channel above this counts as "face" for [`StubDetector::bright_region`].
const BRIGHT_LEVEL: u8 = 16;
const STUB_CONFIDENCE: f32 = 0.99;

/// Detector that either reports a fixed list of boxes or treats the bounding
/// box of all non-dark pixels as the only face.
pub struct StubDetector {
    fixed: Option<Vec<BoundingBox>>,
}

impl StubDetector {
    pub fn fixed(boxes: Vec<BoundingBox>) -> Self {
        Self { fixed: Some(boxes) }
    }

    pub fn bright_region() -> Self {
        Self { fixed: None }
    }
}

impl FaceDetect for StubDetector {
    type Error = Infallible;

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, Infallible> {
        if let Some(boxes) = &self.fixed {
            return Ok(boxes.clone());
        }

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, px) in image.enumerate_pixels() {
            if px.0.iter().all(|&c| c <= BRIGHT_LEVEL) {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }

        Ok(bounds
            .map(|(x0, y0, x1, y1)| {
                vec![BoundingBox {
                    x: x0 as f32,
                    y: y0 as f32,
                    width: (x1 - x0 + 1) as f32,
                    height: (y1 - y0 + 1) as f32,
                    confidence: STUB_CONFIDENCE,
                    landmarks: None,
                }]
            })
            .unwrap_or_default())
    }

    fn confidence_floor(&self) -> f32 {
        0.5
    }
}

type RejectFn = dyn Fn(&CanonicalCrop) -> bool + Send + Sync;

/// Embeds a crop as its mean colour scaled to [0, 1] (3 dimensions).
pub struct StubEmbedder {
    profile: ModelProfile,
    reject: Option<Arc<RejectFn>>,
    calls: Arc<AtomicUsize>,
}

impl StubEmbedder {
    pub fn new(model_id: &str) -> Self {
        Self {
            profile: ModelProfile {
                model_id: model_id.to_string(),
                metric: DistanceMetric::Euclidean,
                default_threshold: 1.0,
                dimension: 3,
            },
            reject: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail with `NoFaceAtInference` for crops matching `pred`.
    pub fn rejecting(
        mut self,
        pred: impl Fn(&CanonicalCrop) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.reject = Some(Arc::new(pred));
        self
    }

    /// Shared counter of `embed` invocations.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Embedder for StubEmbedder {
    fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    fn embed(&mut self, crop: &CanonicalCrop) -> Result<Embedding, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.as_ref().is_some_and(|reject| reject(crop)) {
            return Err(EmbedError::NoFaceAtInference);
        }
        let [r, g, b] = crop.mean_rgb();
        Ok(Embedding::new(
            vec![r / 255.0, g / 255.0, b / 255.0],
            self.profile.model_id.clone(),
        ))
    }
}
