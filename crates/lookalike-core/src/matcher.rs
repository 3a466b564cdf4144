//! Gallery search: rank entries by distance, apply the threshold, pick the best.

use crate::gallery::GalleryIndex;
use crate::types::Embedding;
use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("no gallery entry within distance threshold {threshold}")]
    NoMatchFound { threshold: f32 },
    #[error("query embedding has {got} dimensions, gallery has {expected}")]
    Dimension { expected: usize, got: usize },
    #[error("query embedding from model {query}, gallery built with {gallery}")]
    ModelMismatch { gallery: String, query: String },
}

/// Outcome of one query against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub query_id: Uuid,
    pub identity_key: String,
    /// File name of the gallery crop that represents the identity.
    pub image_file: String,
    pub distance: f32,
    /// Percentage in [0, 100] derived from `distance`.
    pub similarity: f32,
    /// 0 for the best match.
    pub rank: usize,
    pub model_id: String,
}

/// Map a distance to a percentage: `clamp((1 - d) * 100, 0, 100)`.
///
/// Calibrated for unit-normalized embeddings compared with L2 distance;
/// other models need their own mapping.
pub fn similarity_percent(distance: f32) -> f32 {
    ((1.0 - distance) * 100.0).clamp(0.0, 100.0)
}

/// Strategy for comparing a query embedding against a gallery.
pub trait Matcher {
    /// Every entry within `threshold`, best first.
    fn rank(
        &self,
        query: &Embedding,
        index: &GalleryIndex,
        threshold: f32,
    ) -> Result<Vec<MatchResult>, MatchError>;

    /// The single best entry within `threshold`.
    fn best(
        &self,
        query: &Embedding,
        index: &GalleryIndex,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        self.rank(query, index, threshold)?
            .into_iter()
            .next()
            .ok_or(MatchError::NoMatchFound { threshold })
    }
}

/// Exhaustive matcher using the gallery model's native metric.
///
/// Ties on distance go to the entry inserted into the gallery first.
#[derive(Debug, Default, Clone, Copy)]
pub struct DistanceMatcher;

impl Matcher for DistanceMatcher {
    fn rank(
        &self,
        query: &Embedding,
        index: &GalleryIndex,
        threshold: f32,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let profile = index.profile();
        if query.model_id != profile.model_id {
            return Err(MatchError::ModelMismatch {
                gallery: profile.model_id.clone(),
                query: query.model_id.clone(),
            });
        }
        if query.dimension() != profile.dimension {
            return Err(MatchError::Dimension {
                expected: profile.dimension,
                got: query.dimension(),
            });
        }

        // `d <= threshold` is false for NaN, so NaN never survives the filter.
        let mut candidates: Vec<(usize, f32)> = index
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, profile.metric.distance(&query.values, &entry.embedding.values)))
            .filter(|&(_, d)| d <= threshold)
            .collect();

        candidates.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let query_id = Uuid::new_v4();
        tracing::debug!(
            %query_id,
            gallery = index.len(),
            within_threshold = candidates.len(),
            threshold,
            "gallery ranked"
        );

        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(rank, (i, distance))| {
                let entry = &index.entries()[i];
                MatchResult {
                    query_id,
                    identity_key: entry.identity_key.clone(),
                    image_file: entry.image_file.clone(),
                    distance,
                    similarity: similarity_percent(distance),
                    rank,
                    model_id: profile.model_id.clone(),
                }
            })
            .collect())
    }
}
