use super::relative_key;
use crate::embedder::{Embedder, ModelProfile};
use crate::{has_image_extension, normalize_identity_key};
use crate::types::{CanonicalCrop, Embedding};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum IndexBuildError {
    #[error("gallery root unreadable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("gallery root {0} contains no canonical crops")]
    EmptyGallery(PathBuf),
    #[error("no gallery crop could be embedded")]
    NoUsableEntries,
    #[error("entry {identity_key} embedded with model {found}, gallery uses {expected}")]
    ModelMismatch {
        identity_key: String,
        expected: String,
        found: String,
    },
    #[error("entry {identity_key} has {found} dimensions, gallery uses {expected}")]
    DimensionMismatch {
        identity_key: String,
        expected: usize,
        found: usize,
    },
    #[error("identity key {0} appears more than once")]
    DuplicateKey(String),
}

/// One searchable identity.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    /// Folder of the identity, relative to the gallery root, `/`-separated.
    pub identity_key: String,
    /// File name of the representative crop inside that folder.
    pub image_file: String,
    pub embedding: Embedding,
}

/// Immutable set of gallery embeddings produced by a single model.
///
/// Entry order is the insertion order and doubles as the tie-break key.
#[derive(Debug)]
pub struct GalleryIndex {
    entries: Vec<GalleryEntry>,
    profile: ModelProfile,
    built_at: DateTime<Utc>,
}

impl GalleryIndex {
    /// Assemble an index, rejecting entries from another model or dimension.
    pub fn new(profile: ModelProfile, entries: Vec<GalleryEntry>) -> Result<Self, IndexBuildError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if entry.embedding.model_id != profile.model_id {
                return Err(IndexBuildError::ModelMismatch {
                    identity_key: entry.identity_key.clone(),
                    expected: profile.model_id.clone(),
                    found: entry.embedding.model_id.clone(),
                });
            }
            if entry.embedding.dimension() != profile.dimension {
                return Err(IndexBuildError::DimensionMismatch {
                    identity_key: entry.identity_key.clone(),
                    expected: profile.dimension,
                    found: entry.embedding.dimension(),
                });
            }
            if !seen.insert(entry.identity_key.as_str()) {
                return Err(IndexBuildError::DuplicateKey(entry.identity_key.clone()));
            }
        }

        Ok(Self {
            entries,
            profile,
            built_at: Utc::now(),
        })
    }

    /// Embed the representative crop of every identity folder under `gallery_root`.
    ///
    /// Crops that fail to load or embed are logged and left out. Fails only
    /// when the root is unreadable, holds no crops, or nothing embeds.
    pub fn load<E: Embedder + ?Sized>(
        gallery_root: &Path,
        embedder: &mut E,
    ) -> Result<Self, IndexBuildError> {
        std::fs::read_dir(gallery_root).map_err(|source| IndexBuildError::Unreadable {
            path: gallery_root.to_path_buf(),
            source,
        })?;

        let representatives = representatives(gallery_root);
        if representatives.is_empty() {
            return Err(IndexBuildError::EmptyGallery(gallery_root.to_path_buf()));
        }

        let profile = embedder.profile().clone();
        tracing::info!(
            root = %gallery_root.display(),
            identities = representatives.len(),
            model = %profile.model_id,
            "embedding gallery"
        );

        let mut entries = Vec::with_capacity(representatives.len());
        for (identity_key, chosen) in representatives {
            let path = chosen.path;
            let crop = match CanonicalCrop::load(&path) {
                Ok(crop) => crop,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "gallery crop unreadable; excluded"
                    );
                    continue;
                }
            };
            match embedder.embed(&crop) {
                Ok(embedding) => entries.push(GalleryEntry {
                    identity_key,
                    image_file: chosen.file,
                    embedding,
                }),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "gallery crop failed to embed; excluded"
                    );
                }
            }
        }

        if entries.is_empty() {
            return Err(IndexBuildError::NoUsableEntries);
        }

        let index = Self::new(profile, entries)?;
        tracing::info!(entries = index.len(), "gallery index built");
        Ok(index)
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    pub fn model_id(&self) -> &str {
        &self.profile.model_id
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, identity_key: &str) -> Option<&GalleryEntry> {
        self.entries.iter().find(|e| e.identity_key == identity_key)
    }
}

/// Representative crop of one identity folder.
struct Representative {
    /// File name inside the folder.
    file: String,
    /// On-disk location, byte-for-byte as enumerated.
    path: PathBuf,
}

/// Normalized identity key → lexicographically first image file in that
/// folder, ordered by identity key. Files directly under the root belong to
/// no identity. Folders whose names differ only in Unicode form share a key.
fn representatives(root: &Path) -> BTreeMap<String, Representative> {
    let mut chosen: BTreeMap<String, Representative> = BTreeMap::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable gallery path");
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_image_extension(entry.path()) {
            continue;
        }

        let Some(parent) = entry.path().parent() else {
            continue;
        };
        let identity_key = match relative_key(root, parent).map(|k| normalize_identity_key(&k)) {
            Some(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!(
                    path = %entry.path().display(),
                    "crop outside any identity folder; ignored"
                );
                continue;
            }
        };
        let candidate = Representative {
            file: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path().to_path_buf(),
        };

        match chosen.get_mut(&identity_key) {
            Some(current) if candidate.file < current.file => *current = candidate,
            Some(_) => {}
            None => {
                chosen.insert(identity_key, candidate);
            }
        }
    }

    chosen
}

/// The active gallery for serving, replaced wholesale on rebuild.
///
/// Readers take an `Arc` snapshot and keep using it even while a newer index
/// is published; a half-built index is never visible.
pub struct SharedGallery {
    current: RwLock<Arc<GalleryIndex>>,
}

impl SharedGallery {
    pub fn new(index: GalleryIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn snapshot(&self) -> Arc<GalleryIndex> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a fully built index, returning the one it replaced.
    pub fn publish(&self, index: GalleryIndex) -> Arc<GalleryIndex> {
        let next = Arc::new(index);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(
            previous = current.len(),
            next = next.len(),
            model = %next.model_id(),
            "publishing gallery index"
        );
        std::mem::replace(&mut *current, next)
    }
}
