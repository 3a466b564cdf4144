//! One identification request, end to end.
//!
//! Received → Normalized → Embedded → Matched → Resolved. Every failure is a
//! named terminal state and skips the remaining stages.

use crate::embedder::{EmbedError, Embedder};
use crate::gallery::GalleryIndex;
use crate::matcher::{DistanceMatcher, MatchError, MatchResult, Matcher};
use crate::normalizer::{decode_rgb, FaceDetect, FaceNormalizer, NormalizeError};
use crate::resolver::{CharacterRecord, MetadataResolver, ResolveError};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentifyError {
    #[error("image could not be decoded: {0}")]
    InvalidImage(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face detection failed: {0}")]
    DetectionFailure(String),
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),
    #[error("no similar character found")]
    NoMatchFound,
    #[error("matched {0} but it has no metadata record")]
    MetadataMissing(String),
    #[error("processing timed out after {0}s")]
    Timeout(u64),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IdentifyError {
    /// Ordinary outcomes a user can act on, as opposed to system faults.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            IdentifyError::InvalidImage(_)
                | IdentifyError::NoFaceDetected
                | IdentifyError::NoMatchFound
        )
    }

    /// Stable name of the terminal state.
    pub fn kind(&self) -> &'static str {
        match self {
            IdentifyError::InvalidImage(_) => "invalid_image",
            IdentifyError::NoFaceDetected => "no_face_detected",
            IdentifyError::DetectionFailure(_) => "detection_failure",
            IdentifyError::EmbeddingFailure(_) => "embedding_failure",
            IdentifyError::NoMatchFound => "no_match_found",
            IdentifyError::MetadataMissing(_) => "metadata_missing",
            IdentifyError::Timeout(_) => "timeout",
            IdentifyError::Internal(_) => "internal",
        }
    }
}

impl From<NormalizeError> for IdentifyError {
    fn from(e: NormalizeError) -> Self {
        match e {
            NormalizeError::NoFaceDetected => IdentifyError::NoFaceDetected,
            NormalizeError::Detector(msg) => IdentifyError::DetectionFailure(msg),
            NormalizeError::Decode(e) => IdentifyError::InvalidImage(e.to_string()),
        }
    }
}

impl From<EmbedError> for IdentifyError {
    fn from(e: EmbedError) -> Self {
        IdentifyError::EmbeddingFailure(e.to_string())
    }
}

impl From<MatchError> for IdentifyError {
    fn from(e: MatchError) -> Self {
        match e {
            MatchError::NoMatchFound { .. } => IdentifyError::NoMatchFound,
            other => IdentifyError::Internal(other.to_string()),
        }
    }
}

/// A confident match together with its catalog metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identification {
    pub result: MatchResult,
    pub record: CharacterRecord,
}

/// Per-worker request processor. Owns its detector and embedder; the gallery
/// and metadata are borrowed read-only per call.
pub struct Pipeline<D, E, M = DistanceMatcher> {
    normalizer: FaceNormalizer<D>,
    embedder: E,
    matcher: M,
}

impl<D: FaceDetect, E: Embedder> Pipeline<D, E> {
    pub fn new(normalizer: FaceNormalizer<D>, embedder: E) -> Self {
        Self {
            normalizer,
            embedder,
            matcher: DistanceMatcher,
        }
    }
}

impl<D: FaceDetect, E: Embedder, M: Matcher> Pipeline<D, E, M> {
    pub fn with_matcher<M2: Matcher>(self, matcher: M2) -> Pipeline<D, E, M2> {
        Pipeline {
            normalizer: self.normalizer,
            embedder: self.embedder,
            matcher,
        }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Identify the face in encoded image bytes.
    pub fn identify_bytes(
        &mut self,
        bytes: &[u8],
        index: &GalleryIndex,
        resolver: &dyn MetadataResolver,
        threshold: f32,
    ) -> Result<Identification, IdentifyError> {
        let image = decode_rgb(bytes)?;
        self.identify(&image, index, resolver, threshold)
    }

    pub fn identify(
        &mut self,
        image: &RgbImage,
        index: &GalleryIndex,
        resolver: &dyn MetadataResolver,
        threshold: f32,
    ) -> Result<Identification, IdentifyError> {
        let crop = self.normalizer.normalize(image)?;

        let embedding = self.embedder.embed(&crop).map_err(|e| {
            tracing::error!(error = %e, model = %self.embedder.model_id(), "embedding failed");
            IdentifyError::from(e)
        })?;

        let result = self.matcher.best(&embedding, index, threshold)?;
        tracing::info!(
            query_id = %result.query_id,
            identity = %result.identity_key,
            distance = result.distance,
            similarity = result.similarity,
            "match found"
        );

        let record = match resolver.lookup(&result.identity_key) {
            Ok(record) => record,
            Err(ResolveError::NotFound(key)) => {
                tracing::error!(
                    query_id = %result.query_id,
                    identity = %key,
                    "gallery and metadata out of sync: matched identity has no record"
                );
                return Err(IdentifyError::MetadataMissing(key));
            }
            Err(e) => return Err(IdentifyError::Internal(e.to_string())),
        };

        Ok(Identification { result, record })
    }
}
