//! Face normalization: detect, pick one face, crop, resize to canonical form.

use crate::types::{BoundingBox, CanonicalCrop};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Detector(String),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// A face detection backend.
pub trait FaceDetect {
    type Error: std::fmt::Display;

    /// Detect candidate faces. Order is not significant.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, Self::Error>;

    /// Minimum confidence this backend considers a real face.
    fn confidence_floor(&self) -> f32;
}

/// Turns raw images into canonical crops using a single-face policy: the
/// highest-confidence detection wins, every other detection is discarded.
pub struct FaceNormalizer<D> {
    detector: D,
    min_confidence: f32,
}

impl<D: FaceDetect> FaceNormalizer<D> {
    pub fn new(detector: D) -> Self {
        let min_confidence = detector.confidence_floor();
        Self {
            detector,
            min_confidence,
        }
    }

    /// Raise (or lower) the acceptance floor above the detector's own.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Decode encoded image bytes (JPEG, PNG, ...) and normalize them.
    pub fn normalize_bytes(&mut self, bytes: &[u8]) -> Result<CanonicalCrop, NormalizeError> {
        let image = decode_rgb(bytes)?;
        self.normalize(&image)
    }

    pub fn normalize(&mut self, image: &RgbImage) -> Result<CanonicalCrop, NormalizeError> {
        let detections = self
            .detector
            .detect(image)
            .map_err(|e| NormalizeError::Detector(e.to_string()))?;

        let face = select_face(&detections).ok_or(NormalizeError::NoFaceDetected)?;
        if face.confidence < self.min_confidence {
            tracing::debug!(
                confidence = face.confidence,
                floor = self.min_confidence,
                "best detection below acceptance floor"
            );
            return Err(NormalizeError::NoFaceDetected);
        }

        let (x, y, w, h) = face
            .clamp_to(image.width(), image.height())
            .ok_or(NormalizeError::NoFaceDetected)?;

        tracing::debug!(
            candidates = detections.len(),
            confidence = face.confidence,
            x, y, w, h,
            "face selected"
        );

        let region = image::imageops::crop_imm(image, x, y, w, h).to_image();
        Ok(CanonicalCrop::from_region(&region))
    }
}

pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, NormalizeError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Highest-confidence detection; the earliest one wins a tie.
fn select_face(detections: &[BoundingBox]) -> Option<&BoundingBox> {
    detections
        .iter()
        .filter(|d| d.confidence.is_finite())
        .fold(None, |best: Option<&BoundingBox>, d| match best {
            Some(b) if b.confidence >= d.confidence => Some(b),
            _ => Some(d),
        })
}
