use lookalike_core::ModelProfile;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Root of the raw reference images (one folder per character).
    pub catalog_dir: PathBuf,
    /// Root of the canonical crops, mirroring `catalog_dir`.
    pub gallery_dir: PathBuf,
    /// Path to the SQLite metadata store.
    pub db_path: PathBuf,
    /// `movie,character,actor,path` mapping used by `ingest`.
    pub mapping_csv: PathBuf,
    /// Maximum match distance; `None` uses the embedding model's default.
    pub distance_threshold: Option<f32>,
    /// Parallel builders / identification workers.
    pub workers: usize,
    /// Per-request budget for detection, embedding and search.
    pub request_timeout_secs: u64,
    /// Minimum detector confidence for a face to count.
    pub detection_confidence: f32,
}

impl Config {
    /// Load configuration from `LOOKALIKE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: PathBuf| get(key).map(PathBuf::from).unwrap_or(default);

        let model_dir = path("LOOKALIKE_MODEL_DIR", default_model_dir(&get));

        Self {
            model_dir,
            catalog_dir: path("LOOKALIKE_CATALOG_DIR", PathBuf::from("characters")),
            gallery_dir: path("LOOKALIKE_GALLERY_DIR", PathBuf::from("characters_preprocessed")),
            db_path: path("LOOKALIKE_DB_PATH", PathBuf::from("characters.db")),
            mapping_csv: path("LOOKALIKE_MAPPING_CSV", PathBuf::from("mapping.csv")),
            distance_threshold: get("LOOKALIKE_DISTANCE_THRESHOLD").and_then(|v| v.parse().ok()),
            workers: parse_or(&get, "LOOKALIKE_WORKERS", 2usize).max(1),
            request_timeout_secs: parse_or(&get, "LOOKALIKE_REQUEST_TIMEOUT_SECS", 30),
            detection_confidence: parse_or(&get, "LOOKALIKE_DETECTION_CONFIDENCE", 0.5),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// The configured threshold, or the model's calibrated default.
    pub fn threshold_for(&self, profile: &ModelProfile) -> f32 {
        self.distance_threshold.unwrap_or(profile.default_threshold)
    }
}

fn default_model_dir(get: &impl Fn(&str) -> Option<String>) -> PathBuf {
    get("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("lookalike/models")
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
