use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lookalike_core::detector::FaceDetector;
use lookalike_core::recognizer::FaceRecognizer;
use lookalike_core::{
    Embedder, FaceNormalizer, GalleryBuilder, GalleryIndex, Identification, IdentifyError,
    MetadataResolver, Pipeline, SharedGallery,
};
use lookalike_store::MetadataStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;

#[derive(Parser)]
#[command(name = "lookalike", version, about = "Find the movie character a face looks like")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recreate the metadata store from the mapping CSV
    Ingest {
        /// Mapping file with movie,character,actor,path columns
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Catalog root the mapping paths are relative to
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// SQLite metadata store to recreate
        #[arg(long)]
        db: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Normalize every catalog image into the gallery
    BuildGallery {
        #[arg(long)]
        catalog: Option<PathBuf>,
        #[arg(long)]
        gallery: Option<PathBuf>,
        /// Parallel workers (each loads its own detector)
        #[arg(short, long)]
        workers: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Identify the character each image looks like
    Identify {
        /// Images to identify
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[arg(long)]
        gallery: Option<PathBuf>,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Maximum match distance (defaults to the model's calibrated value)
        #[arg(short, long)]
        threshold: Option<f32>,
        #[arg(long)]
        json: bool,
    },
    /// List cataloged characters
    List {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Show configuration, model and catalog status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Ingest {
            csv,
            catalog,
            db,
            json,
        } => {
            let csv = csv.unwrap_or_else(|| config.mapping_csv.clone());
            let catalog = catalog.unwrap_or_else(|| config.catalog_dir.clone());
            let db = db.unwrap_or_else(|| config.db_path.clone());
            run_ingest(&csv, &catalog, &db, json)
        }
        Commands::BuildGallery {
            catalog,
            gallery,
            workers,
            json,
        } => {
            let catalog = catalog.unwrap_or_else(|| config.catalog_dir.clone());
            let gallery = gallery.unwrap_or_else(|| config.gallery_dir.clone());
            let workers = workers.unwrap_or(config.workers).max(1);
            run_build(&config, &catalog, &gallery, workers, json)
        }
        Commands::Identify {
            images,
            gallery,
            db,
            threshold,
            json,
        } => {
            let gallery = gallery.unwrap_or_else(|| config.gallery_dir.clone());
            let db = db.unwrap_or_else(|| config.db_path.clone());
            run_identify(&config, &images, &gallery, &db, threshold, json).await
        }
        Commands::List { db, json } => {
            let db = db.unwrap_or_else(|| config.db_path.clone());
            run_list(&db, json)
        }
        Commands::Status => run_status(&config),
    }
}

fn run_ingest(csv: &Path, catalog: &Path, db: &Path, json: bool) -> Result<()> {
    let store =
        MetadataStore::recreate(db).with_context(|| format!("recreating {}", db.display()))?;
    let report = lookalike_store::ingest(csv, catalog, &store)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Inserted {} characters into {}", report.inserted, db.display());
    for skip in &report.skipped {
        println!("  skipped line {} ({}): {}", skip.line, skip.path, skip.reason);
    }
    Ok(())
}

fn run_build(
    config: &Config,
    catalog: &Path,
    gallery: &Path,
    workers: usize,
    json: bool,
) -> Result<()> {
    let builder = GalleryBuilder::new(catalog, gallery);

    let scrfd = config.scrfd_model_path();
    let mut normalizers = Vec::with_capacity(workers);
    for _ in 0..workers {
        let detector = FaceDetector::load(&scrfd)
            .with_context(|| format!("loading detector {scrfd}"))?
            .with_confidence_threshold(config.detection_confidence);
        let normalizer =
            FaceNormalizer::new(detector).with_min_confidence(config.detection_confidence);
        normalizers.push(normalizer);
    }
    tracing::info!(workers, path = %scrfd, "SCRFD detectors loaded");

    let report = builder.build(&mut normalizers)?;
    let stale = builder.list_stale();

    if json {
        #[derive(Serialize)]
        struct BuildOutput<'a> {
            #[serde(flatten)]
            report: &'a lookalike_core::BuildReport,
            stale: &'a [String],
        }
        let out = BuildOutput {
            report: &report,
            stale: &stale,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Normalized {} images into {}", report.succeeded, gallery.display());
    for skip in &report.skipped {
        println!("  skipped {}: {}", skip.path, skip.reason);
    }
    if !stale.is_empty() {
        println!("{} gallery crops have no reference image:", stale.len());
        for path in &stale {
            println!("  {path}");
        }
    }
    Ok(())
}

/// Per-image output of `identify`.
#[derive(Serialize)]
struct Outcome {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    found: Option<Identification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn run_identify(
    config: &Config,
    images: &[PathBuf],
    gallery_dir: &Path,
    db: &Path,
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    let arcface = config.arcface_model_path();
    let scrfd = config.scrfd_model_path();

    let mut recognizer = FaceRecognizer::load(&arcface)
        .with_context(|| format!("loading recognizer {arcface}"))?;
    let index = GalleryIndex::load(gallery_dir, &mut recognizer)
        .with_context(|| format!("loading gallery {}", gallery_dir.display()))?;
    let threshold = threshold.unwrap_or_else(|| config.threshold_for(recognizer.profile()));

    let store = MetadataStore::open(db).with_context(|| format!("opening {}", db.display()))?;
    let resolver = store.load_resolver()?;
    if resolver.len() < index.len() {
        tracing::warn!(
            records = resolver.len(),
            identities = index.len(),
            "fewer metadata records than gallery identities"
        );
    }
    let resolver: Arc<dyn MetadataResolver> = Arc::new(resolver);

    let mut pipelines = Vec::with_capacity(config.workers);
    let mut spare = Some(recognizer);
    for _ in 0..config.workers {
        let detector = FaceDetector::load(&scrfd)
            .with_context(|| format!("loading detector {scrfd}"))?
            .with_confidence_threshold(config.detection_confidence);
        let embedder = match spare.take() {
            Some(r) => r,
            None => FaceRecognizer::load(&arcface)?,
        };
        let normalizer =
            FaceNormalizer::new(detector).with_min_confidence(config.detection_confidence);
        pipelines.push(Pipeline::new(normalizer, embedder));
    }

    let engine = engine::spawn_engine(
        pipelines,
        Arc::new(SharedGallery::new(index)),
        resolver,
        threshold,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    let tasks: Vec<_> = images
        .iter()
        .map(|path| {
            let engine = engine.clone();
            let path = path.clone();
            tokio::spawn(async move {
                let result = match tokio::fs::read(&path).await {
                    Ok(bytes) => engine.identify(bytes).await,
                    Err(e) => Err(IdentifyError::InvalidImage(e.to_string())),
                };
                (path, result)
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(tasks.len());
    for task in tasks {
        let (path, result) = task.await?;
        let image = path.display().to_string();
        outcomes.push(match result {
            Ok(found) => Outcome {
                image,
                found: Some(found),
                error: None,
                message: None,
            },
            Err(e) => Outcome {
                image,
                found: None,
                error: Some(e.kind()),
                message: Some(e.to_string()),
            },
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(());
    }

    for outcome in &outcomes {
        match (&outcome.found, &outcome.message) {
            (Some(found), _) => {
                let record = &found.record;
                println!(
                    "{}: {} in {} ({:.2}% similar)",
                    outcome.image,
                    record.character_actor(),
                    record.movie,
                    found.result.similarity
                );
                let reference =
                    config.catalog_dir.join(&record.identity_key).join(&record.image_file);
                println!("    reference: {}", reference.display());
            }
            (None, Some(message)) => println!("{}: {message}", outcome.image),
            (None, None) => {}
        }
    }
    Ok(())
}

fn run_list(db: &Path, json: bool) -> Result<()> {
    let store = MetadataStore::open(db).with_context(|| format!("opening {}", db.display()))?;
    let records = store.list_all()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No characters cataloged");
        return Ok(());
    }
    for record in &records {
        println!("{}  {}  [{}]", record.movie, record.character_actor(), record.identity_key);
    }
    Ok(())
}

fn run_status(config: &Config) -> Result<()> {
    let builder = GalleryBuilder::new(&config.catalog_dir, &config.gallery_dir);
    let catalog_images = builder.discover().map(|images| images.len()).ok();
    let records = if config.db_path.is_file() {
        MetadataStore::open(&config.db_path)?.count().ok()
    } else {
        None
    };

    let scrfd = config.scrfd_model_path();
    let arcface = config.arcface_model_path();
    let status = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "models": {
            "detector": {
                "path": &scrfd,
                "present": Path::new(&scrfd).is_file(),
            },
            "recognizer": {
                "path": &arcface,
                "present": Path::new(&arcface).is_file(),
            },
        },
        "catalog_dir": config.catalog_dir,
        "catalog_images": catalog_images,
        "gallery_dir": config.gallery_dir,
        "stale_crops": builder.list_stale().len(),
        "db_path": config.db_path,
        "records": records,
        "distance_threshold": config.distance_threshold,
        "workers": config.workers,
        "request_timeout_secs": config.request_timeout_secs,
        "detection_confidence": config.detection_confidence,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
