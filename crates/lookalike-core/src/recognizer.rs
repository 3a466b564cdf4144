//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional identity embeddings from canonical face crops,
//! using the w600k_r50 ArcFace model.

use crate::embedder::{EmbedError, Embedder, ModelProfile};
use crate::metric::DistanceMetric;
use crate::types::{CanonicalCrop, Embedding};
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- Named constants (different from SCRFD!) ---
const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0 — ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_ID: &str = "w600k_r50";
/// Calibrated for L2 distance between unit vectors, which lies in [0, 2].
const ARCFACE_DEFAULT_THRESHOLD: f32 = 1.0;

/// ArcFace-based embedder.
pub struct FaceRecognizer {
    session: Session,
    profile: ModelProfile,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session,
            profile: Self::default_profile(),
        })
    }

    /// Calibration of the bundled ArcFace model.
    pub fn default_profile() -> ModelProfile {
        ModelProfile {
            model_id: ARCFACE_MODEL_ID.to_string(),
            metric: DistanceMetric::Euclidean,
            default_threshold: ARCFACE_DEFAULT_THRESHOLD,
            dimension: ARCFACE_EMBEDDING_DIM,
        }
    }

    /// Downscale a canonical RGB crop to 112x112 and build a NCHW float tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let resized = image::imageops::resize(crop, size as u32, size as u32, FilterType::Triangle);
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, px) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (px.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

impl Embedder for FaceRecognizer {
    fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    fn embed(&mut self, crop: &CanonicalCrop) -> Result<Embedding, EmbedError> {
        let input = Self::preprocess(crop.image());

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        finish_embedding(raw, ARCFACE_MODEL_ID)
    }
}

/// Validate and L2-normalize a raw model output.
fn finish_embedding(raw: Vec<f32>, model_id: &str) -> Result<Embedding, EmbedError> {
    if raw.len() != ARCFACE_EMBEDDING_DIM {
        return Err(EmbedError::Inference(format!(
            "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
            raw.len()
        )));
    }
    // A degenerate vector carries no identity.
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return Err(EmbedError::NoFaceAtInference);
    }

    Ok(Embedding::new(raw.iter().map(|x| x / norm).collect(), model_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let crop = RgbImage::from_pixel(224, 224, Rgb([128, 128, 128]));
        let tensor = FaceRecognizer::preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization_per_channel() {
        let crop = RgbImage::from_pixel(224, 224, Rgb([0, 128, 255]));
        let tensor = FaceRecognizer::preprocess(&crop);
        assert!((tensor[[0, 0, 5, 5]] + 1.0).abs() < 1e-6);
        let expected_g = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 1, 5, 5]] - expected_g).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_finish_embedding_normalizes() {
        let mut raw = vec![0.0f32; ARCFACE_EMBEDDING_DIM];
        raw[0] = 3.0;
        raw[1] = 4.0;
        let e = finish_embedding(raw, ARCFACE_MODEL_ID).unwrap();
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
        assert_eq!(e.model_id, ARCFACE_MODEL_ID);
    }

    #[test]
    fn test_finish_embedding_wrong_dimension() {
        assert!(matches!(
            finish_embedding(vec![1.0; 128], ARCFACE_MODEL_ID),
            Err(EmbedError::Inference(_))
        ));
    }

    #[test]
    fn test_finish_embedding_zero_vector() {
        assert!(matches!(
            finish_embedding(vec![0.0; ARCFACE_EMBEDDING_DIM], ARCFACE_MODEL_ID),
            Err(EmbedError::NoFaceAtInference)
        ));
    }

    #[test]
    fn test_finish_embedding_non_finite() {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let mut raw = vec![0.1f32; ARCFACE_EMBEDDING_DIM];
            raw[7] = bad;
            assert!(matches!(
                finish_embedding(raw, ARCFACE_MODEL_ID),
                Err(EmbedError::NoFaceAtInference)
            ));
        }
    }

    #[test]
    fn test_load_missing_model() {
        assert!(matches!(
            FaceRecognizer::load("/nonexistent/w600k_r50.onnx"),
            Err(EmbedError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_default_profile() {
        let p = FaceRecognizer::default_profile();
        assert_eq!(p.model_id, "w600k_r50");
        assert_eq!(p.metric, DistanceMetric::Euclidean);
        assert_eq!(p.dimension, 512);
        assert!((p.default_threshold - 1.0).abs() < 1e-6);
    }
}
