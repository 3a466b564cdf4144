//! The embedding capability: canonical crop in, identity vector out.

use crate::metric::DistanceMetric;
use crate::types::{CanonicalCrop, Embedding};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model file not found: {0} — download from insightface and place in models/")]
    ModelNotFound(String),
    #[error("no usable face at inference")]
    NoFaceAtInference,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Calibration that travels with an embedding model.
///
/// The metric, threshold and similarity mapping are only meaningful for the
/// model they were calibrated on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelProfile {
    pub model_id: String,
    pub metric: DistanceMetric,
    pub default_threshold: f32,
    pub dimension: usize,
}

/// Maps a canonical crop to a fixed-length identity vector.
pub trait Embedder {
    fn profile(&self) -> &ModelProfile;

    fn embed(&mut self, crop: &CanonicalCrop) -> Result<Embedding, EmbedError>;

    fn model_id(&self) -> &str {
        &self.profile().model_id
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn profile(&self) -> &ModelProfile {
        (**self).profile()
    }

    fn embed(&mut self, crop: &CanonicalCrop) -> Result<Embedding, EmbedError> {
        (**self).embed(crop)
    }
}
