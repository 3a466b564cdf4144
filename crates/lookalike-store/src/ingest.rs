//! Recreate character metadata from a `movie,character,actor,path` CSV.

use crate::store::{MetadataStore, NewCharacter, StoreError};
use lookalike_core::{has_image_extension, normalize_identity_key};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("mapping file unreadable: {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("mapping header: {0}")]
    Header(#[from] csv::Error),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Deserialize)]
struct MappingRow {
    movie: String,
    character: String,
    actor: String,
    path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    Malformed(String),
    FolderMissing(String),
    NoImages(String),
    Duplicate,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Malformed(e) => write!(f, "malformed row: {e}"),
            SkipReason::FolderMissing(p) => write!(f, "folder not found: {p}"),
            SkipReason::NoImages(p) => write!(f, "no images in {p}"),
            SkipReason::Duplicate => f.write_str("duplicate path"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    /// 1-based line in the mapping file, header included.
    pub line: u64,
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub skipped: Vec<SkippedRow>,
}

/// Ingest the mapping CSV at `csv_path` into `store`.
pub fn ingest(
    csv_path: &Path,
    catalog_root: &Path,
    store: &MetadataStore,
) -> Result<IngestReport, IngestError> {
    let text = std::fs::read_to_string(csv_path).map_err(|source| IngestError::Read {
        path: csv_path.to_path_buf(),
        source,
    })?;
    ingest_reader(text.as_bytes(), catalog_root, store)
}

/// Ingest mapping rows from any reader. A leading UTF-8 BOM is ignored.
///
/// Rows whose folder is missing or holds no accepted image are skipped, as
/// are malformed and duplicate rows; only store failures abort.
pub fn ingest_reader<R: std::io::Read>(
    mut reader: R,
    catalog_root: &Path,
    store: &MetadataStore,
) -> Result<IngestReport, IngestError> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw).map_err(|source| IngestError::Read {
        path: PathBuf::from("<reader>"),
        source,
    })?;
    let text = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    csv.headers()?;

    let mut report = IngestReport::default();

    for (i, row) in csv.deserialize::<MappingRow>().enumerate() {
        let line = i as u64 + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(line, error = %e, "malformed mapping row skipped");
                report.skipped.push(SkippedRow {
                    line,
                    path: String::new(),
                    reason: SkipReason::Malformed(e.to_string()),
                });
                continue;
            }
        };

        let segments = path_segments(&row.path);
        let identity_key = normalize_identity_key(&row.path);
        let mut skip = |reason: SkipReason| {
            tracing::warn!(line, path = %identity_key, %reason, "mapping row skipped");
            report.skipped.push(SkippedRow {
                line,
                path: identity_key.clone(),
                reason,
            });
        };

        if identity_key.is_empty() {
            skip(SkipReason::Malformed("empty path".into()));
            continue;
        }

        // The folder is located with the segments as written; only the key is normalized.
        let folder = segments.iter().fold(catalog_root.to_path_buf(), |p, seg| p.join(seg));
        if !folder.is_dir() {
            skip(SkipReason::FolderMissing(folder.display().to_string()));
            continue;
        }
        let Some(image_file) = representative_image(&folder) else {
            skip(SkipReason::NoImages(folder.display().to_string()));
            continue;
        };

        let new = NewCharacter {
            identity_key: identity_key.clone(),
            movie: row.movie,
            character: row.character,
            actor: row.actor,
            image_file,
        };
        match store.insert(&new) {
            Ok(_) => report.inserted += 1,
            Err(StoreError::Duplicate(_)) => skip(SkipReason::Duplicate),
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(
        inserted = report.inserted,
        skipped = report.skipped.len(),
        "metadata ingestion finished"
    );
    Ok(report)
}

/// Non-empty, trimmed segments of a mapping path: "/a//b/" → ["a", "b"].
fn path_segments(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lexicographically first accepted image file directly inside `folder`.
fn representative_image(folder: &Path) -> Option<String> {
    std::fs::read_dir(folder)
        .ok()?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| has_image_extension(&e.path()))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segments() {
        assert_eq!(path_segments("/Movie//Hero (Actor)/"), ["Movie", "Hero (Actor)"]);
        assert_eq!(path_segments("Movie\\Hero"), ["Movie", "Hero"]);
        assert!(path_segments(" / ").is_empty());
    }

    #[test]
    fn test_representative_image_lexicographic() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.JPG", "0.txt", "c.jpeg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("0-subdir.png")).unwrap();
        assert_eq!(representative_image(dir.path()).as_deref(), Some("a.JPG"));
    }

    #[test]
    fn test_representative_image_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), b"x").unwrap();
        assert_eq!(representative_image(dir.path()), None);
        assert_eq!(representative_image(&dir.path().join("absent")), None);
    }
}
