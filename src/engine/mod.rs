//! Batch processing engine split into focused submodules.
//!
//! The [`ProcessingController`] struct and its methods are organized by domain:
//! - [`control`] - State machine transitions (pause/resume/cancel/query)
//! - [`batch`] - Batch start, the driver task, and drain back to Idle
//! - [`executor`] - Bounded worker pool shared by both batch kinds
//! - [`pipeline`] - Per-page render/recognize/transform path
//! - [`cache_gate`] - Cache-first short-circuit for a single page
//! - [`aggregator`] - Result stream to progress events and the run record

mod aggregator;
mod batch;
mod cache_gate;
mod control;
mod executor;
mod pipeline;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use batch::BatchHandle;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::document::Document;
use crate::error::Result;
use crate::providers::{PageRenderer, RecognitionProvider, TextTransformProvider};
use crate::rate_limiter::RequestLimiter;
use crate::store::{CacheStore, HistoryStore, MemoryStore};
use crate::types::{Event, ProcessingState, RunId, TaskKind};

/// External services the engine calls into
#[derive(Clone)]
pub(crate) struct Collaborators {
    /// Page image renderer (required for recognition batches)
    pub(crate) renderer: Option<Arc<dyn PageRenderer>>,
    /// OCR provider (required for recognition batches)
    pub(crate) recognizer: Option<Arc<dyn RecognitionProvider>>,
    /// AI text provider (required for transform batches)
    pub(crate) transformer: Option<Arc<dyn TextTransformProvider>>,
    /// Per-page result cache
    pub(crate) cache: Arc<dyn CacheStore>,
    /// Run history
    pub(crate) history: Arc<dyn HistoryStore>,
}

/// Bookkeeping for the batch that currently owns the controller
pub(crate) struct ActiveBatch {
    pub(crate) run_id: RunId,
    pub(crate) kind: TaskKind,
    pub(crate) total: usize,
    /// Incremented by workers as each page produces a result
    pub(crate) processed: Arc<AtomicUsize>,
    /// Fired by `cancel()`; aborts backoff sleeps, limiter waits, and paused workers
    pub(crate) cancel: CancellationToken,
}

/// Controller for page batches (cloneable - all fields are Arc-wrapped)
///
/// At most one batch is active at a time. State lives in a single
/// [`watch`] channel: transitions are atomic check-and-set operations on the
/// sender, and paused workers wait on a receiver instead of polling.
///
/// # Examples
///
/// ```no_run
/// use ocr_batch::{Config, Document, DocumentId, PageId, ProcessingController};
/// use ocr_batch::providers::OpenAiProvider;
/// use std::sync::Arc;
///
/// # async fn example(renderer: Arc<dyn ocr_batch::providers::PageRenderer>) -> ocr_batch::Result<()> {
/// let config = Config::default();
/// let provider = Arc::new(OpenAiProvider::new(config.provider.clone())?);
///
/// let controller = ProcessingController::builder(config)
///     .renderer(renderer)
///     .recognizer(provider.clone())
///     .transformer(provider)
///     .build()?;
///
/// controller
///     .set_document(Arc::new(Document::new(DocumentId::new("scan"), 12)))
///     .await;
///
/// let handle = controller
///     .start_recognition((1..=12).map(PageId).collect(), false)
///     .await?;
/// let summary = handle.wait().await?;
/// println!("{}/{} pages recognized", summary.succeeded, summary.total);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProcessingController {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Current state; the single source of truth for every transition
    pub(crate) state: Arc<watch::Sender<ProcessingState>>,
    /// Active batch bookkeeping (None while Idle)
    pub(crate) batch: Arc<Mutex<Option<ActiveBatch>>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// External services
    pub(crate) collaborators: Collaborators,
    /// Request limiter shared by every worker of every batch
    pub(crate) limiter: RequestLimiter,
    /// Document whose pages batches operate on
    pub(crate) document: Arc<RwLock<Option<Arc<Document>>>>,
}

impl ProcessingController {
    /// Start building a controller
    pub fn builder(config: Config) -> ControllerBuilder {
        ControllerBuilder::new(config)
    }

    /// Subscribe to engine events
    ///
    /// Returns a receiver that will receive all events emitted after this
    /// call. Multiple subscribers can be active simultaneously. A subscriber
    /// that falls more than `event_buffer` events behind observes
    /// [`broadcast::error::RecvError::Lagged`] and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Engine events as a [`Stream`]
    ///
    /// Like [`subscribe`](Self::subscribe), but a lagging consumer skips the
    /// missed events (logged at warn) instead of seeing an error.
    pub fn events(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event stream lagged, events dropped");
                None
            }
        })
    }

    /// Get the current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Request limiter shared by all workers
    ///
    /// The rate can be changed at runtime with
    /// [`RequestLimiter::set_requests_per_minute`].
    pub fn limiter(&self) -> &RequestLimiter {
        &self.limiter
    }

    /// Make `document` the active document for subsequent batches
    ///
    /// A running batch keeps the document it started with.
    pub async fn set_document(&self, document: Arc<Document>) {
        tracing::info!(document_id = %document.id(), "active document changed");
        *self.document.write().await = Some(document);
    }

    /// Clear the active document
    pub async fn clear_document(&self) {
        *self.document.write().await = None;
    }

    /// The active document, if any
    pub async fn document(&self) -> Option<Arc<Document>> {
        self.document.read().await.clone()
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Builder for [`ProcessingController`]
///
/// Cache and history default to a fresh [`MemoryStore`]; pass a
/// [`crate::db::Database`] to [`ControllerBuilder::store`] to persist them.
pub struct ControllerBuilder {
    config: Config,
    renderer: Option<Arc<dyn PageRenderer>>,
    recognizer: Option<Arc<dyn RecognitionProvider>>,
    transformer: Option<Arc<dyn TextTransformProvider>>,
    cache: Option<Arc<dyn CacheStore>>,
    history: Option<Arc<dyn HistoryStore>>,
}

impl ControllerBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            recognizer: None,
            transformer: None,
            cache: None,
            history: None,
        }
    }

    /// Page renderer used by recognition batches
    pub fn renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// OCR provider used by recognition batches
    pub fn recognizer(mut self, recognizer: Arc<dyn RecognitionProvider>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Text provider used by transform batches
    pub fn transformer(mut self, transformer: Arc<dyn TextTransformProvider>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Cache store
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// History store
    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Use one store for both cache and history
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: CacheStore + HistoryStore + 'static,
    {
        self.cache(store.clone()).history(store)
    }

    /// Validate the configuration and build the controller
    ///
    /// Missing providers are not an error here: a batch that needs one
    /// fails to start with a configuration error instead.
    pub fn build(self) -> Result<ProcessingController> {
        self.config.validate()?;

        let (event_tx, _rx) = broadcast::channel(self.config.event_buffer);
        let (state, _rx) = watch::channel(ProcessingState::Idle);
        let limiter = RequestLimiter::from_config(&self.config.rate_limit);

        let (cache, history) = match (self.cache, self.history) {
            (Some(cache), Some(history)) => (cache, history),
            (cache, history) => {
                let memory = Arc::new(MemoryStore::new());
                (
                    cache.unwrap_or_else(|| memory.clone()),
                    history.unwrap_or_else(|| memory.clone()),
                )
            }
        };

        Ok(ProcessingController {
            config: Arc::new(self.config),
            state: Arc::new(state),
            batch: Arc::new(Mutex::new(None)),
            event_tx,
            collaborators: Collaborators {
                renderer: self.renderer,
                recognizer: self.recognizer,
                transformer: self.transformer,
                cache,
                history,
            },
            limiter,
            document: Arc::new(RwLock::new(None)),
        })
    }
}
