//! Identification worker pool.
//!
//! Each worker is a dedicated OS thread that owns one [`Pipeline`] (detector
//! and embedder sessions are not shared). Requests arrive over a bounded
//! channel; callers await the reply with a per-request timeout.

use lookalike_core::{
    Embedder, FaceDetect, Identification, IdentifyError, MetadataResolver, Pipeline, SharedGallery,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Queued requests per worker before `identify` callers wait for a slot.
const QUEUE_DEPTH_PER_WORKER: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine needs at least one worker")]
    NoWorkers,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct EngineRequest {
    image: Vec<u8>,
    reply: oneshot::Sender<Result<Identification, IdentifyError>>,
}

/// Clone-safe handle to the worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Identify the face in encoded image bytes.
    ///
    /// A request that outlives the timeout resolves to
    /// [`IdentifyError::Timeout`]; the worker finishes it and drops the reply.
    pub async fn identify(&self, image: Vec<u8>) -> Result<Identification, IdentifyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = EngineRequest { image, reply: reply_tx };

        let work = async {
            self.tx
                .send(request)
                .await
                .map_err(|_| IdentifyError::Internal("engine stopped".into()))?;
            reply_rx
                .await
                .map_err(|_| IdentifyError::Internal("engine worker exited".into()))?
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "identification timed out");
                Err(IdentifyError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

/// Start one worker thread per pipeline.
///
/// Workers read the gallery through `gallery.snapshot()` per request, so a
/// published rebuild is picked up without restarting the pool.
pub fn spawn_engine<D, E>(
    pipelines: Vec<Pipeline<D, E>>,
    gallery: Arc<SharedGallery>,
    resolver: Arc<dyn MetadataResolver>,
    threshold: f32,
    timeout: Duration,
) -> Result<EngineHandle, EngineError>
where
    D: FaceDetect + Send + 'static,
    E: Embedder + Send + 'static,
{
    if pipelines.is_empty() {
        return Err(EngineError::NoWorkers);
    }

    let (tx, rx) = mpsc::channel::<EngineRequest>(pipelines.len() * QUEUE_DEPTH_PER_WORKER);
    let rx = Arc::new(Mutex::new(rx));

    for (worker, mut pipeline) in pipelines.into_iter().enumerate() {
        let rx = Arc::clone(&rx);
        let gallery = Arc::clone(&gallery);
        let resolver = Arc::clone(&resolver);

        std::thread::Builder::new()
            .name(format!("lookalike-worker-{worker}"))
            .spawn(move || {
                tracing::info!(worker, "engine worker started");
                loop {
                    let next = rx.lock().unwrap_or_else(PoisonError::into_inner).blocking_recv();
                    let Some(req) = next else { break };

                    let index = gallery.snapshot();
                    let result =
                        pipeline.identify_bytes(&req.image, &index, resolver.as_ref(), threshold);
                    if let Err(e) = &result {
                        if e.is_user_facing() {
                            tracing::debug!(worker, outcome = e.kind(), "request finished");
                        } else {
                            tracing::warn!(
                                worker,
                                outcome = e.kind(),
                                error = %e,
                                "request failed"
                            );
                        }
                    }
                    let _ = req.reply.send(result);
                }
                tracing::info!(worker, "engine worker exiting");
            })?;
    }

    Ok(EngineHandle { tx, timeout })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use lookalike_core::stub::{StubDetector, StubEmbedder};
    use lookalike_core::{
        CanonicalCrop, CharacterRecord, EmbedError, Embedding, FaceNormalizer, GalleryEntry,
        GalleryIndex, InMemoryResolver, ModelProfile,
    };
    use std::io::Cursor;
    use std::sync::Condvar;

    /// Holds red crops inside `embed` until opened; reports each hold on `entered`.
    #[derive(Clone)]
    struct Gate {
        entered: mpsc::UnboundedSender<()>,
        open: Arc<(Mutex<bool>, Condvar)>,
    }

    impl Gate {
        fn new() -> (Self, mpsc::UnboundedReceiver<()>) {
            let (entered, rx) = mpsc::unbounded_channel();
            let gate = Self {
                entered,
                open: Arc::new((Mutex::new(false), Condvar::new())),
            };
            (gate, rx)
        }

        fn open(&self) {
            let (lock, cvar) = &*self.open;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }

        fn hold(&self) {
            let _ = self.entered.send(());
            let (lock, cvar) = &*self.open;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
        }
    }

    struct GatedOnRed {
        inner: StubEmbedder,
        gate: Option<Gate>,
    }

    impl Embedder for GatedOnRed {
        fn profile(&self) -> &ModelProfile {
            self.inner.profile()
        }

        fn embed(&mut self, crop: &CanonicalCrop) -> Result<Embedding, EmbedError> {
            let [r, g, _] = crop.mean_rgb();
            if let Some(gate) = self.gate.as_ref().filter(|_| r > 2.0 * g) {
                gate.hold();
            }
            self.inner.embed(crop)
        }
    }

    fn png(rgb: [u8; 3]) -> Vec<u8> {
        let mut image = RgbImage::new(100, 100);
        for y in 20..80 {
            for x in 20..80 {
                image.put_pixel(x, y, Rgb(rgb));
            }
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn entry(key: &str, rgb: [f32; 3]) -> GalleryEntry {
        GalleryEntry {
            identity_key: key.into(),
            image_file: "01.png".into(),
            embedding: Embedding::new(rgb.to_vec(), "stub"),
        }
    }

    fn record(key: &str) -> CharacterRecord {
        CharacterRecord {
            identity_key: key.into(),
            movie: "Heist".into(),
            character: key.rsplit('/').next().unwrap().into(),
            actor: "A. Actor".into(),
            image_file: "01.png".into(),
            added_at: "2024-05-01T12:00:00+00:00".into(),
        }
    }

    fn fixtures() -> (Arc<SharedGallery>, Arc<dyn MetadataResolver>) {
        let profile = StubEmbedder::new("stub").profile().clone();
        let entries = vec![
            entry("Heist/Red", [0.9, 0.1, 0.1]),
            entry("Heist/Green", [0.1, 0.9, 0.1]),
        ];
        let index = GalleryIndex::new(profile, entries).unwrap();
        let resolver = InMemoryResolver::from_records([record("Heist/Red"), record("Heist/Green")]);
        (Arc::new(SharedGallery::new(index)), Arc::new(resolver))
    }

    fn pipelines(n: usize, gate: Option<&Gate>) -> Vec<Pipeline<StubDetector, GatedOnRed>> {
        (0..n)
            .map(|_| {
                Pipeline::new(
                    FaceNormalizer::new(StubDetector::bright_region()),
                    GatedOnRed {
                        inner: StubEmbedder::new("stub"),
                        gate: gate.cloned(),
                    },
                )
            })
            .collect()
    }

    fn start(
        n: usize,
        gate: Option<&Gate>,
        timeout: Duration,
    ) -> (EngineHandle, Arc<SharedGallery>) {
        let (gallery, resolver) = fixtures();
        let handle = spawn_engine(pipelines(n, gate), Arc::clone(&gallery), resolver, 1.0, timeout);
        (handle.unwrap(), gallery)
    }

    #[tokio::test]
    async fn test_identify_through_pool() {
        let (engine, _) = start(2, None, Duration::from_secs(5));

        let found = engine.identify(png([30, 220, 30])).await.unwrap();
        assert_eq!(found.result.identity_key, "Heist/Green");
        assert_eq!(found.record.character, "Green");

        let dark = engine.identify(png([0, 0, 0])).await.unwrap_err();
        assert_eq!(dark, IdentifyError::NoFaceDetected);

        let garbage = engine.identify(b"not an image".to_vec()).await.unwrap_err();
        assert!(matches!(garbage, IdentifyError::InvalidImage(_)));
    }

    #[tokio::test]
    async fn test_held_request_does_not_block_others() {
        let (gate, mut entered) = Gate::new();
        let (engine, _) = start(2, Some(&gate), Duration::from_secs(30));

        let held_engine = engine.clone();
        let held = tokio::spawn(async move { held_engine.identify(png([220, 30, 30])).await });
        entered.recv().await.unwrap();

        // One worker is parked on the gate; the other must serve this request.
        let other = engine.identify(png([30, 220, 30])).await.unwrap();
        assert_eq!(other.result.identity_key, "Heist/Green");
        assert!(!held.is_finished());

        gate.open();
        let held = held.await.unwrap().unwrap();
        assert_eq!(held.result.identity_key, "Heist/Red");
    }

    #[tokio::test]
    async fn test_timeout_reported() {
        let (gate, mut entered) = Gate::new();
        let (engine, _) = start(1, Some(&gate), Duration::from_secs(1));

        let err = engine.identify(png([220, 30, 30])).await.unwrap_err();
        assert_eq!(err, IdentifyError::Timeout(1));
        assert!(!err.is_user_facing());

        entered.recv().await.unwrap();
        gate.open();
    }

    #[tokio::test]
    async fn test_published_gallery_is_used() {
        let (engine, gallery) = start(1, None, Duration::from_secs(5));

        let found = engine.identify(png([30, 220, 30])).await.unwrap();
        assert_eq!(found.result.identity_key, "Heist/Green");

        let profile = StubEmbedder::new("stub").profile().clone();
        let entries = vec![entry("Heist/Red", [0.9, 0.1, 0.1])];
        gallery.publish(GalleryIndex::new(profile, entries).unwrap());

        // Green is now ~1.09 from the only entry, beyond the threshold.
        let err = engine.identify(png([30, 220, 30])).await.unwrap_err();
        assert_eq!(err, IdentifyError::NoMatchFound);
    }

    #[test]
    fn test_no_workers() {
        let (gallery, resolver) = fixtures();
        let timeout = Duration::from_secs(1);
        let result = spawn_engine(pipelines(0, None), gallery, resolver, 1.0, timeout);
        assert!(matches!(result, Err(EngineError::NoWorkers)));
    }
}
