//! Shared test doubles for exercising the controller without real providers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, broadcast};
use tokio::time::Instant;

use crate::config::Config;
use crate::document::Document;
use crate::engine::ProcessingController;
use crate::error::{Error, Result};
use crate::providers::{ImageArtifact, PageRenderer, RecognitionProvider, TextTransformProvider};
use crate::store::MemoryStore;
use crate::types::{DocumentId, Event, PageId};

/// Renderer that encodes the page number as the image bytes
#[derive(Default)]
pub(crate) struct FakeRenderer {
    pub(crate) calls: AtomicUsize,
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render(&self, page: PageId) -> Result<ImageArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ImageArtifact::png(page, page.get().to_le_bytes().to_vec()))
    }
}

/// Recognizer with per-page scripted failures, an optional gate, and call accounting
///
/// Returns `"text of page N"` on success.
#[derive(Default)]
pub(crate) struct ScriptedRecognizer {
    /// Page -> (remaining failures, message)
    transient: Mutex<HashMap<PageId, (u32, String)>>,
    /// Pages that always fail with a permanent error
    fatal: HashMap<PageId, String>,
    /// Pages that wait on `gate` before answering
    gated: HashSet<PageId>,
    gate: Option<Arc<Semaphore>>,
    /// Artificial latency for every call
    delay: Option<Duration>,
    calls: Mutex<HashMap<PageId, u32>>,
    completed_at: Mutex<HashMap<PageId, Instant>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRecognizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the first `times` calls for `page` with `message`
    pub(crate) fn fail_times(self, page: u32, times: u32, message: &str) -> Self {
        self.transient
            .lock()
            .unwrap()
            .insert(PageId(page), (times, message.to_string()));
        self
    }

    /// Always fail `page` with `message`
    pub(crate) fn fatal(mut self, page: u32, message: &str) -> Self {
        self.fatal.insert(PageId(page), message.to_string());
        self
    }

    /// Hold calls for `pages` until the returned semaphore hands out a permit each
    pub(crate) fn gated(mut self, pages: &[u32]) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gated = pages.iter().copied().map(PageId).collect();
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls_for(&self, page: u32) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&PageId(page))
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn completed_at(&self, page: u32) -> Option<Instant> {
        self.completed_at.lock().unwrap().get(&PageId(page)).copied()
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionProvider for ScriptedRecognizer {
    async fn recognize(&self, image: &ImageArtifact) -> Result<String> {
        let page = image.page;
        *self.calls.lock().unwrap().entry(page).or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.gated.contains(&page) {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = self.fatal.get(&page) {
            return Err(Error::Recognition {
                page: page.get(),
                reason: message.clone(),
            });
        }
        {
            let mut transient = self.transient.lock().unwrap();
            if let Some((remaining, message)) = transient.get_mut(&page) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::Recognition {
                        page: page.get(),
                        reason: message.clone(),
                    });
                }
            }
        }

        self.completed_at.lock().unwrap().insert(page, Instant::now());
        Ok(format!("text of page {}", page))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Transformer that returns `"<instruction>|<text>"`
#[derive(Default)]
pub(crate) struct FakeTransformer {
    pub(crate) calls: AtomicUsize,
    delay: Option<Duration>,
    /// Free-form failure returned for every call
    error: Option<String>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeTransformer {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Fail every call with an untyped error carrying `message`
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextTransformProvider for FakeTransformer {
    async fn transform(&self, text: &str, instruction: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(message) = &self.error {
            return Err(Error::Other(message.clone()));
        }
        Ok(format!("{}|{}", instruction, text))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Controller wired to fakes
pub(crate) struct TestHarness {
    pub(crate) controller: ProcessingController,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) document: Arc<Document>,
    pub(crate) renderer: Arc<FakeRenderer>,
    pub(crate) recognizer: Arc<ScriptedRecognizer>,
    pub(crate) transformer: Arc<FakeTransformer>,
}

/// Config with short, deterministic retry delays
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_delay = Duration::from_secs(1);
    config.retry.max_delay = Duration::from_secs(30);
    config.retry.max_retries = 2;
    config.retry.jitter = false;
    config
}

/// Helper to create a controller over a `pages`-page document
pub(crate) async fn create_test_harness(
    config: Config,
    pages: u32,
    recognizer: ScriptedRecognizer,
    transformer: FakeTransformer,
) -> TestHarness {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(FakeRenderer::default());
    let recognizer = Arc::new(recognizer);
    let transformer = Arc::new(transformer);

    let controller = ProcessingController::builder(config)
        .renderer(renderer.clone())
        .recognizer(recognizer.clone())
        .transformer(transformer.clone())
        .store(store.clone())
        .build()
        .unwrap();

    let document = Arc::new(Document::new(DocumentId::new("scan"), pages));
    controller.set_document(document.clone()).await;

    TestHarness {
        controller,
        store,
        document,
        renderer,
        recognizer,
        transformer,
    }
}

pub(crate) fn pages(range: std::ops::RangeInclusive<u32>) -> Vec<PageId> {
    range.map(PageId).collect()
}

/// Collect events until (and including) the next BatchComplete
pub(crate) async fn collect_until_complete(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(60), rx.recv()).await {
            Ok(Ok(event)) => {
                let done = matches!(event, Event::BatchComplete { .. });
                events.push(event);
                if done {
                    return events;
                }
            }
            Ok(Err(e)) => panic!("event stream failed: {e}"),
            Err(_) => panic!("timed out waiting for BatchComplete"),
        }
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            std::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
