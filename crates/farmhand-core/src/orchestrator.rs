//! Submission pipeline: validate, fingerprint, consult the history log,
//! and call the remote service only on a miss.
//!
//! Each submission moves through
//! `Validating -> Hashing -> CacheCheck -> {HitPath | MissPath}` and back to
//! idle. Only one submission runs at a time; a second one arriving while the
//! first is in flight is rejected with [`FarmhandError::Busy`].
//!
//! The history log is only mutated by a successful miss (insert), a hit
//! (promote), or an explicit delete. After each mutation the whole log is
//! written back to the store. A failed write is logged and the in-memory log
//! stays authoritative.

use crate::analysis::{AnalysisClient, build_prompt};
use crate::data_url::{parse_data_url, to_data_url};
use crate::error::ValidationError;
use crate::fingerprint::fingerprint;
use crate::history::HistoryLog;
use crate::normalize::NormalizeOptions;
use crate::store::HistoryStore;
use crate::{FarmhandError, Result};
use farmhand_types::{AnalysisResult, HistoryEntry, Language, SubmissionOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Where the submitted image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Raw bytes. An empty `mime_type` is sniffed from the bytes.
    Bytes { data: Vec<u8>, mime_type: String },
    /// A file on disk.
    Path(PathBuf),
    /// A base64 `data:` URL.
    DataUrl(String),
}

struct LoadedImage {
    bytes: Vec<u8>,
    mime_type: String,
}

impl ImageSource {
    async fn load(self) -> Result<LoadedImage> {
        let (bytes, mime_type) = match self {
            ImageSource::Bytes { data, mime_type } => (data, mime_type),
            ImageSource::Path(path) => {
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    FarmhandError::Hashing(format!("{}: {}", path.display(), e))
                })?;
                let mime = image::ImageFormat::from_path(&path)
                    .map(|f| f.to_mime_type().to_string())
                    .unwrap_or_default();
                (bytes, mime)
            }
            ImageSource::DataUrl(url) => {
                let data = parse_data_url(&url).ok_or_else(|| {
                    FarmhandError::Hashing("image is not a base64 data URL".to_string())
                })?;
                (data.bytes, data.mime_type)
            }
        };

        if bytes.is_empty() {
            return Err(FarmhandError::Hashing("image is empty".to_string()));
        }

        let mime_type = if mime_type.trim().is_empty() {
            image::guess_format(&bytes)
                .map(|f| f.to_mime_type().to_string())
                .unwrap_or_else(|_| FALLBACK_MIME.to_string())
        } else {
            mime_type
        };

        Ok(LoadedImage { bytes, mime_type })
    }
}

/// One user request: an image, a question, and the answer language.
#[derive(Debug, Clone)]
pub struct Submission {
    pub image: Option<ImageSource>,
    pub question: String,
    pub language: Language,
}

/// Clears the busy flag when the submission ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs submissions against the history log and the analysis client.
pub struct Orchestrator {
    client: Arc<dyn AnalysisClient>,
    store: Option<Arc<HistoryStore>>,
    history: RwLock<HistoryLog>,
    normalize: NormalizeOptions,
    busy: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator, loading the persisted log if a store is given.
    ///
    /// A store that cannot be read yields an empty log.
    pub fn new(
        client: Arc<dyn AnalysisClient>,
        store: Option<HistoryStore>,
        capacity: usize,
        normalize: NormalizeOptions,
    ) -> Self {
        let entries = match &store {
            Some(store) => store.load_history().unwrap_or_else(|e| {
                warn!(target: "farmhand::store", "Failed to read history, starting empty: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        let history = HistoryLog::from_entries(entries, capacity);
        info!(
            target: "farmhand::cache",
            "History log ready ({} of {} entries)",
            history.len(),
            history.capacity()
        );

        Self {
            client,
            store: store.map(Arc::new),
            history: RwLock::new(history),
            normalize,
            busy: AtomicBool::new(false),
        }
    }

    /// True while a submission is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FarmhandError::Busy)?;
        Ok(BusyGuard(&self.busy))
    }

    /// Run a submission on its own task and wait for it.
    ///
    /// Dropping the returned future does not cancel the submission: the
    /// remote call runs to completion and its result still lands in the log.
    pub async fn submit_detached(
        self: &Arc<Self>,
        submission: Submission,
    ) -> Result<SubmissionOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.submit(submission).await })
            .await
            .map_err(|e| FarmhandError::Task(e.to_string()))?
    }

    /// Run one submission through the pipeline.
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionOutcome> {
        let _guard = self.begin()?;
        let Submission {
            image,
            question,
            language,
        } = submission;

        debug!(target: "farmhand::submit", phase = "validating");
        let image = image.ok_or(ValidationError::MissingImage)?;
        if question.trim().is_empty() {
            return Err(ValidationError::MissingQuestion.into());
        }

        debug!(target: "farmhand::submit", phase = "hashing");
        let image = image.load().await?;
        let image_fingerprint = fingerprint(&image.bytes);

        debug!(target: "farmhand::submit", phase = "cache_check", fingerprint = %image_fingerprint);
        {
            let mut history = self.history.write().await;
            let hit = history.lookup(&image_fingerprint, &question).map(|e| e.id);
            if let Some(id) = hit {
                let outcome = history.promote(id).map(|entry| SubmissionOutcome {
                    entry_id: entry.id,
                    result: entry.result.clone(),
                    cached: true,
                });
                if let Some(outcome) = outcome {
                    info!(target: "farmhand::cache", entry = %id, "Cache hit, promoted entry");
                    self.persist(history).await;
                    return Ok(outcome);
                }
            }
        }

        debug!(target: "farmhand::submit", phase = "miss_path");
        let prompt = build_prompt(&question, language);
        let preview = to_data_url(&image.mime_type, &image.bytes);
        let (analysis, preview) = tokio::join!(
            self.client.analyze(&image.bytes, &image.mime_type, &prompt),
            normalize_off_thread(self.normalize, preview),
        );
        let analysis = analysis.map_err(|e| {
            warn!(target: "farmhand::remote", "Analysis failed: {}", e);
            FarmhandError::RemoteService(e.to_string())
        })?;

        let stored_image = match &analysis.image {
            Some(img) => Some(normalize_off_thread(self.normalize, img.clone()).await),
            None => None,
        };
        let entry = HistoryEntry::new(
            image_fingerprint,
            question,
            preview,
            AnalysisResult {
                text: analysis.text.clone(),
                image: stored_image,
            },
        );
        let entry_id = entry.id;

        let mut history = self.history.write().await;
        let evicted = history.insert(entry);
        for old in &evicted {
            debug!(target: "farmhand::cache", entry = %old.id, "Evicted history entry");
        }
        info!(
            target: "farmhand::cache",
            entry = %entry_id,
            evicted = evicted.len(),
            "Cache miss, stored new entry"
        );
        self.persist(history).await;

        Ok(SubmissionOutcome {
            entry_id,
            result: analysis,
            cached: false,
        })
    }

    /// Look up an entry for display. Does not touch recency.
    pub async fn select(&self, id: Uuid) -> Option<HistoryEntry> {
        self.history.read().await.get(id).cloned()
    }

    /// Remove an entry. Returns whether anything was removed.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        if self.is_busy() {
            return Err(FarmhandError::Busy);
        }

        let mut history = self.history.write().await;
        let removed = history.delete_by_id(id).is_some();
        if removed {
            debug!(target: "farmhand::cache", entry = %id, "Deleted history entry");
            self.persist(history).await;
        }
        Ok(removed)
    }

    /// Snapshot of the log, most recent first.
    pub async fn entries(&self) -> Vec<HistoryEntry> {
        self.history.read().await.entries().to_vec()
    }

    /// Write the log back to the store.
    ///
    /// Readers proceed during the write; other mutations wait for it, so
    /// saves land in mutation order.
    async fn persist(&self, history: RwLockWriteGuard<'_, HistoryLog>) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let history = history.downgrade();
        let snapshot = history.entries().to_vec();

        let saved = tokio::task::spawn_blocking(move || store.save_history(&snapshot))
            .await
            .map_err(|e| FarmhandError::Task(e.to_string()))
            .and_then(|saved| saved);
        if let Err(e) = saved {
            warn!(
                target: "farmhand::store",
                "Failed to persist history, keeping in-memory state: {}",
                e
            );
        }
        drop(history);
    }
}

async fn normalize_off_thread(options: NormalizeOptions, encoded: String) -> String {
    let fallback = encoded.clone();
    tokio::task::spawn_blocking(move || options.apply(&encoded))
        .await
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisError;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    /// Scripted analysis client that records every call.
    struct StubClient {
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
        reply: std::result::Result<AnalysisResult, String>,
        gate: Option<Semaphore>,
    }

    impl StubClient {
        fn replying(result: AnalysisResult) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
                reply: Ok(result),
                gate: None,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                ..Self::replying(AnalysisResult::default())
            }
        }

        fn gated(result: AnalysisResult) -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::replying(result)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisClient for StubClient {
        async fn analyze(
            &self,
            _image: &[u8],
            _mime_type: &str,
            prompt: &str,
        ) -> std::result::Result<AnalysisResult, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            self.reply.clone().map_err(AnalysisError::Other)
        }
    }

    fn orchestrator(client: Arc<StubClient>) -> Orchestrator {
        Orchestrator::new(client, None, 20, NormalizeOptions::default())
    }

    fn image(bytes: &[u8]) -> Option<ImageSource> {
        Some(ImageSource::Bytes {
            data: bytes.to_vec(),
            mime_type: "image/png".to_string(),
        })
    }

    fn submission(bytes: &[u8], question: &str) -> Submission {
        Submission {
            image: image(bytes),
            question: question.to_string(),
            language: Language::En,
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([90, 140, 30]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    fn dimensions(url: &str) -> (u32, u32) {
        let data = parse_data_url(url).unwrap();
        let img = image::load_from_memory(&data.bytes).unwrap();
        (img.width(), img.height())
    }

    #[tokio::test]
    async fn test_first_submission_is_a_miss_and_is_stored() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("Leaf blight")));
        let orch = orchestrator(client.clone());

        let outcome = orch
            .submit(submission(b"image-a", "What disease is this?"))
            .await
            .unwrap();

        assert!(!outcome.cached);
        assert_eq!(outcome.result, AnalysisResult::text("Leaf blight"));
        assert_eq!(client.calls(), 1);

        let entries = orch.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, outcome.entry_id);
        assert_eq!(entries[0].question, "What disease is this?");
        assert_eq!(entries[0].result, AnalysisResult::text("Leaf blight"));
        assert_eq!(entries[0].image_fingerprint, fingerprint(b"image-a"));
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn test_same_pair_with_different_case_is_a_hit() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("Leaf blight")));
        let orch = orchestrator(client.clone());

        let first = orch
            .submit(submission(b"image-a", "What disease is this?"))
            .await
            .unwrap();
        let touched = orch.entries().await[0].last_touched_at;

        let second = orch
            .submit(submission(b"image-a", "  what disease is this?"))
            .await
            .unwrap();

        assert!(second.cached);
        assert_eq!(second.entry_id, first.entry_id);
        assert_eq!(second.result, AnalysisResult::text("Leaf blight"));
        assert_eq!(client.calls(), 1);

        let entries = orch.entries().await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].last_touched_at >= touched);
    }

    #[tokio::test]
    async fn test_hit_promotes_entry_to_front() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = orchestrator(client.clone());

        let a = orch.submit(submission(b"a", "q")).await.unwrap();
        orch.submit(submission(b"b", "q")).await.unwrap();
        orch.submit(submission(b"c", "q")).await.unwrap();
        assert_eq!(orch.entries().await[2].id, a.entry_id);

        orch.submit(submission(b"a", "Q")).await.unwrap();
        assert_eq!(orch.entries().await[0].id, a.entry_id);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_same_image_different_question_is_a_miss() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = orchestrator(client.clone());

        orch.submit(submission(b"a", "What disease is this?")).await.unwrap();
        let outcome = orch.submit(submission(b"a", "How do I treat it?")).await.unwrap();

        assert!(!outcome.cached);
        assert_eq!(client.calls(), 2);
        assert_eq!(orch.entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_twenty_one_misses_keep_the_twenty_most_recent() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = orchestrator(client.clone());

        for i in 0..21 {
            orch.submit(submission(format!("image-{}", i).as_bytes(), "q"))
                .await
                .unwrap();
        }

        let entries = orch.entries().await;
        assert_eq!(entries.len(), 20);
        let fingerprints: Vec<_> = entries.iter().map(|e| e.image_fingerprint.clone()).collect();
        let expected: Vec<_> = (1..21)
            .rev()
            .map(|i| fingerprint(format!("image-{}", i).as_bytes()))
            .collect();
        assert_eq!(fingerprints, expected);
        assert_eq!(client.calls(), 21);
    }

    #[tokio::test]
    async fn test_remote_failure_leaves_log_untouched() {
        let client = Arc::new(StubClient::failing("Quota exceeded"));
        let orch = orchestrator(client.clone());

        let err = orch.submit(submission(b"a", "q")).await.unwrap_err();
        assert!(matches!(err, FarmhandError::RemoteService(_)));
        assert_eq!(err.to_string(), "Failed to analyze image: Quota exceeded");
        assert!(orch.entries().await.is_empty());
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_remote_call() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = orchestrator(client.clone());

        let err = orch
            .submit(Submission {
                image: None,
                question: "q".to_string(),
                language: Language::En,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FarmhandError::Validation(ValidationError::MissingImage)
        ));

        let err = orch.submit(submission(b"a", "  \n ")).await.unwrap_err();
        assert!(matches!(
            err,
            FarmhandError::Validation(ValidationError::MissingQuestion)
        ));
        assert!(err.is_validation());

        assert_eq!(client.calls(), 0);
        assert!(orch.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_images_fail_in_hashing() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = orchestrator(client.clone());
        let temp_dir = TempDir::new().unwrap();

        for source in [
            ImageSource::DataUrl("not a data url".to_string()),
            ImageSource::Path(temp_dir.path().join("missing.jpg")),
            ImageSource::Bytes {
                data: Vec::new(),
                mime_type: "image/png".to_string(),
            },
        ] {
            let err = orch
                .submit(Submission {
                    image: Some(source),
                    question: "q".to_string(),
                    language: Language::En,
                })
                .await
                .unwrap_err();
            assert!(matches!(err, FarmhandError::Hashing(_)), "got {:?}", err);
        }
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_path_and_bytes_of_same_file_share_a_cache_entry() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = orchestrator(client.clone());
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("leaf.png");
        let bytes = png_bytes(10, 10);
        std::fs::write(&path, &bytes).unwrap();

        orch.submit(Submission {
            image: Some(ImageSource::Path(path)),
            question: "q".to_string(),
            language: Language::En,
        })
        .await
        .unwrap();
        let outcome = orch
            .submit(Submission {
                image: Some(ImageSource::DataUrl(to_data_url("image/png", &bytes))),
                question: "q".to_string(),
                language: Language::En,
            })
            .await
            .unwrap();

        assert!(outcome.cached);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_prompt_carries_language_directive() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = orchestrator(client.clone());

        orch.submit(Submission {
            image: image(b"a"),
            question: "Is this rust?".to_string(),
            language: Language::Fr,
        })
        .await
        .unwrap();

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(
            prompts[0],
            "Please respond in French. Here is the user's question: \"Is this rust?\""
        );
    }

    #[tokio::test]
    async fn test_stored_images_are_normalized() {
        let returned = to_data_url("image/png", &png_bytes(1600, 1200));
        let client = Arc::new(StubClient::replying(AnalysisResult {
            text: None,
            image: Some(returned.clone()),
        }));
        let orch = orchestrator(client.clone());

        let outcome = orch
            .submit(Submission {
                image: Some(ImageSource::Bytes {
                    data: png_bytes(900, 1800),
                    mime_type: String::new(),
                }),
                question: "Mark the damaged leaves".to_string(),
                language: Language::En,
            })
            .await
            .unwrap();

        // The caller gets the full-size result; the log keeps the compact copy.
        assert_eq!(outcome.result.image.as_deref(), Some(returned.as_str()));

        let entry = &orch.entries().await[0];
        let stored = entry.result.image.as_deref().unwrap();
        assert!(stored.starts_with("data:image/jpeg;base64,"));
        assert_eq!(dimensions(stored), (800, 600));
        assert!(entry.preview_image.starts_with("data:image/jpeg;base64,"));
        assert_eq!(dimensions(&entry.preview_image), (400, 800));
    }

    #[tokio::test]
    async fn test_undecodable_preview_is_kept_as_is() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = orchestrator(client.clone());

        orch.submit(submission(b"not really a png", "q")).await.unwrap();
        let entry = &orch.entries().await[0];
        assert_eq!(entry.preview_image, to_data_url("image/png", b"not really a png"));
    }

    #[tokio::test]
    async fn test_concurrent_submission_is_rejected() {
        let client = Arc::new(StubClient::gated(AnalysisResult::text("ok")));
        let orch = Arc::new(orchestrator(client.clone()));

        let in_flight = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.submit(submission(b"a", "q")).await })
        };
        while client.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(orch.is_busy());

        let err = orch.submit(submission(b"b", "q")).await.unwrap_err();
        assert!(matches!(err, FarmhandError::Busy));
        let err = orch.delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, FarmhandError::Busy));

        client.gate.as_ref().unwrap().add_permits(1);
        let outcome = in_flight.await.unwrap().unwrap();
        assert!(!outcome.cached);
        assert!(!orch.is_busy());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_select_does_not_promote_and_delete_is_idempotent() {
        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = orchestrator(client.clone());

        let a = orch.submit(submission(b"a", "q")).await.unwrap();
        let b = orch.submit(submission(b"b", "q")).await.unwrap();

        let selected = orch.select(a.entry_id).await.unwrap();
        assert_eq!(selected.result, AnalysisResult::text("ok"));
        assert_eq!(orch.entries().await[0].id, b.entry_id);
        assert!(orch.select(Uuid::new_v4()).await.is_none());

        assert!(orch.delete(a.entry_id).await.unwrap());
        assert!(!orch.delete(a.entry_id).await.unwrap());
        assert_eq!(orch.entries().await.len(), 1);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_log_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("history.db");

        let first_client = Arc::new(StubClient::replying(AnalysisResult::text("Leaf blight")));
        {
            let orch = Orchestrator::new(
                first_client.clone(),
                Some(HistoryStore::open(&db_path).unwrap()),
                20,
                NormalizeOptions::default(),
            );
            orch.submit(submission(b"a", "What disease is this?")).await.unwrap();
            orch.submit(submission(b"b", "q")).await.unwrap();
            let b_id = orch.entries().await[0].id;
            orch.delete(b_id).await.unwrap();
        }

        let second_client = Arc::new(StubClient::replying(AnalysisResult::text("different")));
        let orch = Orchestrator::new(
            second_client.clone(),
            Some(HistoryStore::open(&db_path).unwrap()),
            20,
            NormalizeOptions::default(),
        );
        assert_eq!(orch.entries().await.len(), 1);

        let outcome = orch
            .submit(submission(b"a", "what disease is this?"))
            .await
            .unwrap();
        assert!(outcome.cached);
        assert_eq!(outcome.result, AnalysisResult::text("Leaf blight"));
        assert_eq!(second_client.calls(), 0);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_lose_the_answer() {
        let client = Arc::new(StubClient::gated(AnalysisResult::text("Leaf blight")));
        let orch = Arc::new(orchestrator(client.clone()));

        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            orch.submit_detached(submission(b"a", "What disease is this?")),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(client.calls(), 1);
        assert!(orch.is_busy());

        client.gate.as_ref().unwrap().add_permits(1);
        while orch.is_busy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let entries = orch.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result, AnalysisResult::text("Leaf blight"));

        let outcome = orch
            .submit_detached(submission(b"a", "what disease is this?"))
            .await
            .unwrap();
        assert!(outcome.cached);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_in_memory_log() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("history.db");
        let store = HistoryStore::open(&db_path).unwrap();
        rusqlite::Connection::open(&db_path)
            .unwrap()
            .execute_batch("DROP TABLE slots")
            .unwrap();

        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = Orchestrator::new(client.clone(), Some(store), 20, NormalizeOptions::default());

        let first = orch.submit(submission(b"a", "q")).await.unwrap();
        assert!(!first.cached);
        assert_eq!(orch.entries().await.len(), 1);

        let second = orch.submit(submission(b"a", "Q")).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.entry_id, first.entry_id);
        assert_eq!(client.calls(), 1);

        assert!(orch.delete(first.entry_id).await.unwrap());
        assert!(orch.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_loaded_log_is_cut_to_capacity() {
        let store = HistoryStore::open_in_memory().unwrap();
        let entries: Vec<_> = (0..5)
            .map(|i| {
                HistoryEntry::new(
                    format!("fp-{}", i),
                    "q".to_string(),
                    String::new(),
                    AnalysisResult::text("ok"),
                )
            })
            .collect();
        store.save_history(&entries).unwrap();

        let client = Arc::new(StubClient::replying(AnalysisResult::text("ok")));
        let orch = Orchestrator::new(client, Some(store), 3, NormalizeOptions::default());
        let loaded = orch.entries().await;
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].image_fingerprint, "fp-0");
    }
}
