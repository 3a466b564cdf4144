//! Reference gallery: offline crop builder and the in-memory search index.

mod builder;
mod index;

pub use builder::{BuildError, BuildReport, GalleryBuilder, SkippedItem};
pub use index::{GalleryEntry, GalleryIndex, IndexBuildError, SharedGallery};

use std::path::Path;

/// `/`-joined path of `path` relative to `root`, independent of the host separator.
pub(crate) fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
