use super::relative_key;
use crate::has_image_extension;
use crate::normalizer::{FaceDetect, FaceNormalizer, NormalizeError};
use crate::types::CropError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("catalog root not found: {0}")]
    CatalogMissing(PathBuf),
    #[error("catalog root {0} contains no reference images")]
    EmptyCatalog(PathBuf),
    #[error("gallery builder needs at least one worker")]
    NoWorkers,
    #[error("every reference image failed ({} skipped)", .0.skipped.len())]
    AllFailed(BuildReport),
}

/// Per-image failure, reported but never fatal.
#[derive(Error, Debug)]
enum ItemError {
    #[error("read failed: {0}")]
    Read(#[from] image::ImageError),
    #[error("{0}")]
    Normalize(#[from] NormalizeError),
    #[error("create directory failed: {0}")]
    CreateDir(#[from] std::io::Error),
    #[error("write failed: {0}")]
    Write(#[from] CropError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    /// Path relative to the catalog root.
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub succeeded: usize,
    /// Sorted by path.
    pub skipped: Vec<SkippedItem>,
}

/// Normalizes every reference image under the catalog into a canonical crop
/// at the same relative path under the gallery root.
///
/// Existing crops are overwritten; crops whose reference image disappeared
/// are left in place (see [`GalleryBuilder::list_stale`]).
pub struct GalleryBuilder {
    catalog_root: PathBuf,
    gallery_root: PathBuf,
}

impl GalleryBuilder {
    pub fn new(catalog_root: impl Into<PathBuf>, gallery_root: impl Into<PathBuf>) -> Self {
        Self {
            catalog_root: catalog_root.into(),
            gallery_root: gallery_root.into(),
        }
    }

    /// Reference images under the catalog, relative and sorted.
    pub fn discover(&self) -> Result<Vec<String>, BuildError> {
        if !self.catalog_root.is_dir() {
            return Err(BuildError::CatalogMissing(self.catalog_root.clone()));
        }
        Ok(image_files(&self.catalog_root))
    }

    /// Run the build, one thread per normalizer.
    ///
    /// Each worker owns its normalizer, so detection sessions are never shared.
    pub fn build<D>(&self, workers: &mut [FaceNormalizer<D>]) -> Result<BuildReport, BuildError>
    where
        D: FaceDetect + Send,
    {
        if workers.is_empty() {
            return Err(BuildError::NoWorkers);
        }

        let items = self.discover()?;
        if items.is_empty() {
            return Err(BuildError::EmptyCatalog(self.catalog_root.clone()));
        }

        tracing::info!(
            catalog = %self.catalog_root.display(),
            gallery = %self.gallery_root.display(),
            images = items.len(),
            workers = workers.len(),
            "building gallery"
        );

        let next = AtomicUsize::new(0);
        let skipped = Mutex::new(Vec::new());
        let succeeded = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            let (next, skipped, succeeded, items) = (&next, &skipped, &succeeded, &items);
            for normalizer in workers.iter_mut() {
                scope.spawn(move || loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(rel) = items.get(i) else {
                        break;
                    };
                    match self.process(normalizer, rel) {
                        Ok(()) => {
                            tracing::debug!(path = %rel, "crop written");
                            succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::warn!(path = %rel, error = %e, "reference image skipped");
                            skipped
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner)
                                .push(SkippedItem {
                                    path: rel.clone(),
                                    reason: e.to_string(),
                                });
                        }
                    }
                });
            }
        });

        let mut skipped = skipped.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
        skipped.sort_by(|a, b| a.path.cmp(&b.path));
        let report = BuildReport {
            succeeded: succeeded.into_inner(),
            skipped,
        };

        tracing::info!(
            succeeded = report.succeeded,
            skipped = report.skipped.len(),
            "gallery build finished"
        );

        if report.succeeded == 0 {
            return Err(BuildError::AllFailed(report));
        }
        Ok(report)
    }

    fn process<D: FaceDetect>(
        &self,
        normalizer: &mut FaceNormalizer<D>,
        rel: &str,
    ) -> Result<(), ItemError> {
        let image = image::open(self.catalog_root.join(rel))?.to_rgb8();
        let crop = normalizer.normalize(&image)?;

        let out = self.gallery_root.join(rel);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        crop.save(&out)?;
        Ok(())
    }

    /// Gallery crops whose reference image no longer exists. Nothing is deleted.
    pub fn list_stale(&self) -> Vec<String> {
        if !self.gallery_root.is_dir() {
            return Vec::new();
        }
        image_files(&self.gallery_root)
            .into_iter()
            .filter(|rel| !self.catalog_root.join(rel).is_file())
            .collect()
    }
}

/// Accepted image files under `root`, as sorted `/`-separated relative paths.
fn image_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable path");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && has_image_extension(entry.path()))
        .filter_map(|entry| relative_key(root, entry.path()))
        .collect();
    files.sort();
    files
}
