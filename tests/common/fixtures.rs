//! Collaborator fakes and controller setup for integration tests

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ocr_batch::{
    Config, Database, Document, DocumentId, Error, ImageArtifact, PageId, PageRenderer,
    ProcessingController, RecognitionProvider, Result,
};
use tempfile::TempDir;

/// Name of the document every fixture controller works on
pub const DOCUMENT: &str = "invoice-batch.pdf";

/// Renderer producing a tiny fake PNG per page
#[derive(Default)]
pub struct StubRenderer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl PageRenderer for StubRenderer {
    async fn render(&self, page: PageId) -> Result<ImageArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ImageArtifact::png(page, vec![0x89, b'P', b'N', b'G', page.get() as u8]))
    }
}

/// Recognizer that fails selected pages a fixed number of times
#[derive(Default)]
pub struct FlakyRecognizer {
    failures: Mutex<HashMap<PageId, (u32, &'static str)>>,
    calls: Mutex<HashMap<PageId, u32>>,
    delay: Option<Duration>,
}

impl FlakyRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self, page: u32, times: u32, message: &'static str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(PageId(page), (times, message));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls_for(&self, page: u32) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&PageId(page))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecognitionProvider for FlakyRecognizer {
    async fn recognize(&self, image: &ImageArtifact) -> Result<String> {
        *self.calls.lock().unwrap().entry(image.page).or_insert(0) += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = self.failures.lock().unwrap();
        if let Some((remaining, message)) = failures.get_mut(&image.page) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Recognition {
                    page: image.page.get(),
                    reason: message.to_string(),
                });
            }
        }
        Ok(format!("page {} words", image.page))
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Config with fast, deterministic retries
pub fn fast_retry_config() -> Config {
    let mut config = Config::default();
    config.retry.max_retries = 2;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config
}

/// Controller backed by a SQLite database in a temp directory
pub struct SqliteFixture {
    pub controller: ProcessingController,
    pub db: Arc<Database>,
    pub document: Arc<Document>,
    pub renderer: Arc<StubRenderer>,
    pub recognizer: Arc<FlakyRecognizer>,
    pub _dir: TempDir,
}

pub async fn sqlite_fixture(config: Config, pages: u32, recognizer: FlakyRecognizer) -> SqliteFixture {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::new(&dir.path().join("ocr.db")).await.unwrap());
    let renderer = Arc::new(StubRenderer::default());
    let recognizer = Arc::new(recognizer);

    let controller = ProcessingController::builder(config)
        .renderer(renderer.clone())
        .recognizer(recognizer.clone())
        .store(db.clone())
        .build()
        .unwrap();
    let document = Arc::new(Document::new(DocumentId::new(DOCUMENT), pages));
    controller.set_document(document.clone()).await;

    SqliteFixture {
        controller,
        db,
        document,
        renderer,
        recognizer,
        _dir: dir,
    }
}

pub fn page_range(range: std::ops::RangeInclusive<u32>) -> Vec<PageId> {
    range.map(PageId).collect()
}
