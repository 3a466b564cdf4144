//! lookalike-core — Face identification against a catalog of movie characters.
//!
//! Normalizes faces with SCRFD, embeds them with ArcFace (both via ONNX
//! Runtime), and ranks a precomputed gallery by embedding distance.

pub mod detector;
pub mod embedder;
pub mod ensemble;
pub mod gallery;
pub mod matcher;
pub mod metric;
pub mod normalizer;
pub mod pipeline;
pub mod recognizer;
pub mod resolver;
pub mod stub;
pub mod types;

pub use embedder::{EmbedError, Embedder, ModelProfile};
pub use gallery::{BuildReport, GalleryBuilder, GalleryEntry, GalleryIndex, SharedGallery};
pub use matcher::{DistanceMatcher, MatchError, MatchResult, Matcher};
pub use metric::DistanceMetric;
pub use normalizer::{FaceDetect, FaceNormalizer, NormalizeError};
pub use pipeline::{Identification, IdentifyError, Pipeline};
pub use resolver::{CharacterRecord, InMemoryResolver, MetadataResolver, ResolveError};
pub use types::{BoundingBox, CanonicalCrop, Embedding, CANONICAL_SIZE};

use unicode_normalization::UnicodeNormalization;

/// File extensions accepted as reference or gallery images.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Whether `path` carries one of the accepted image extensions (case-insensitive).
pub fn has_image_extension(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ok| e.eq_ignore_ascii_case(ok)))
        .unwrap_or(false)
}

/// Canonical form of an identity key: `/`-separated, trimmed, empty segments
/// dropped, each segment in Unicode NFKC.
///
/// Gallery folders read back from disk and keys from the mapping file meet
/// here, so "Cafe\u{301}" and "Caf\u{e9}" name the same identity.
pub fn normalize_identity_key(raw: &str) -> String {
    raw.split(['/', '\\'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.nfkc().collect::<String>())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_image_extension_case_insensitive() {
        assert!(has_image_extension(Path::new("a/b/face.JPG")));
        assert!(has_image_extension(Path::new("face.jpeg")));
        assert!(has_image_extension(Path::new("face.png")));
        assert!(!has_image_extension(Path::new("face.gif")));
        assert!(!has_image_extension(Path::new("README")));
    }

    #[test]
    fn test_normalize_identity_key() {
        assert_eq!(normalize_identity_key("/Movie//Hero (Actor)/"), "Movie/Hero (Actor)");
        assert_eq!(normalize_identity_key("Movie\\Hero"), "Movie/Hero");
        assert_eq!(normalize_identity_key(" / "), "");
    }

    #[test]
    fn test_normalize_identity_key_composes() {
        // Decomposed and composed forms of the same Korean and Latin names.
        assert_eq!(
            normalize_identity_key("\u{1100}\u{1161}/Cafe\u{301}"),
            normalize_identity_key("\u{ac00}/Caf\u{e9}")
        );
        assert_eq!(normalize_identity_key("Movie/Cafe\u{301}"), "Movie/Caf\u{e9}");
        // Compatibility forms fold too.
        assert_eq!(normalize_identity_key("\u{ff21}ct"), "Act");
    }
}
