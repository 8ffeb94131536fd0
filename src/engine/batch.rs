//! Batch start, the driver task, and drain back to Idle.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::types::{
    BatchSummary, Event, NewRun, PageId, ProcessingState, RunId, RunStatus, TaskKind, WorkItem,
};

use super::aggregator::ResultAggregator;
use super::cache_gate::CacheGate;
use super::executor::BatchExecutor;
use super::pipeline::{ItemPipeline, Work};
use super::{ActiveBatch, ProcessingController};

/// Handle to a started batch
///
/// Dropping the handle does not stop the batch; use
/// [`ProcessingController::cancel`] for that.
#[derive(Debug)]
pub struct BatchHandle {
    run_id: RunId,
    kind: TaskKind,
    total: usize,
    task: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// History run recording this batch
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Kind of the batch
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Number of pages submitted
    pub fn total(&self) -> usize {
        self.total
    }

    /// Wait for the batch to drain
    ///
    /// By the time this returns the controller is already back to Idle, so a
    /// new batch can be started immediately.
    pub async fn wait(self) -> Result<BatchSummary> {
        self.task
            .await
            .map_err(|e| Error::Other(format!("batch driver task failed: {}", e)))
    }
}

impl ProcessingController {
    /// Start a recognition batch over `pages` of the active document
    ///
    /// Each page is rendered and sent to the recognition provider, unless its
    /// OCR text is already cached and `force_reprocess` is false. Runs on
    /// `workers.recognition_workers` workers.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if there is no active document, no renderer or
    ///   recognizer, or the page list is unusable (also reported as an
    ///   [`Event::ConfigurationError`])
    /// - [`Error::AlreadyRunning`] if a batch is Running, Paused, or still
    ///   Cancelling; checked before anything else, so nothing is reported to
    ///   the active batch's subscribers
    /// - [`Error::Persistence`] if the history run cannot be created
    pub async fn start_recognition(
        &self,
        pages: Vec<PageId>,
        force_reprocess: bool,
    ) -> Result<BatchHandle> {
        self.ensure_idle()?;
        let work = match (
            &self.collaborators.renderer,
            &self.collaborators.recognizer,
        ) {
            (Some(renderer), Some(recognizer)) => Work::Recognition {
                renderer: Arc::clone(renderer),
                recognizer: Arc::clone(recognizer),
            },
            (None, _) => {
                return Err(self.configuration_error("no page renderer configured", "renderer"));
            }
            (_, None) => {
                return Err(self.configuration_error(
                    "no recognition provider configured",
                    "recognizer",
                ));
            }
        };
        self.start_batch(TaskKind::Recognition, pages, force_reprocess, work)
            .await
    }

    /// Start a transform batch over `pages` of the active document
    ///
    /// Each page's recognized text is rewritten according to `instruction`,
    /// unless a transformation is already cached and `force_reprocess` is
    /// false. A page without recognized text fails without any provider
    /// call. Runs on `workers.transform_workers` workers.
    ///
    /// # Errors
    ///
    /// Same as [`start_recognition`](Self::start_recognition); an empty
    /// instruction or a missing transform provider is a configuration error.
    pub async fn start_transform(
        &self,
        pages: Vec<PageId>,
        instruction: impl Into<String>,
        force_reprocess: bool,
    ) -> Result<BatchHandle> {
        self.ensure_idle()?;
        let instruction = instruction.into();
        if instruction.trim().is_empty() {
            return Err(self.configuration_error("transform instruction is empty", "instruction"));
        }
        let Some(transformer) = &self.collaborators.transformer else {
            return Err(self.configuration_error(
                "no text transform provider configured",
                "transformer",
            ));
        };
        let work = Work::Transform {
            transformer: Arc::clone(transformer),
            instruction: Arc::from(instruction),
        };
        self.start_batch(TaskKind::Transform, pages, force_reprocess, work)
            .await
    }

    async fn start_batch(
        &self,
        kind: TaskKind,
        pages: Vec<PageId>,
        force_reprocess: bool,
        work: Work,
    ) -> Result<BatchHandle> {
        let Some(document) = self.document().await else {
            return Err(self.configuration_error("no active document", "document"));
        };
        let pages = self.validate_pages(&document, pages).await?;
        let total = pages.len();

        let instruction = match &work {
            Work::Transform { instruction, .. } => Some(instruction.to_string()),
            Work::Recognition { .. } => None,
        };
        let run_id = self
            .collaborators
            .history
            .create_run(&NewRun {
                document_id: document.id().clone(),
                kind,
                total_items: total,
                force_reprocess,
                instruction,
            })
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to create history run, batch not started");
                Error::Persistence(format!("failed to create run: {}", e))
            })?;

        // Held across the state flip and the bookkeeping update so that
        // cancel() and query_state() never observe Running without a batch
        let mut batch = self.batch.lock().await;

        if !self.transition(|s| s == ProcessingState::Idle, ProcessingState::Running) {
            drop(batch);
            // Another start won the race after our run was created
            if let Err(e) = self
                .collaborators
                .history
                .update_run_status(run_id, RunStatus::Failed)
                .await
            {
                tracing::warn!(run_id = %run_id, error = %e, "failed to close unused run");
            }
            return Err(Error::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let processed = Arc::new(AtomicUsize::new(0));
        *batch = Some(ActiveBatch {
            run_id,
            kind,
            total,
            processed: Arc::clone(&processed),
            cancel: cancel.clone(),
        });
        drop(batch);

        let pool_size = match kind {
            TaskKind::Recognition => self.config.workers.recognition_workers,
            TaskKind::Transform => self.config.workers.transform_workers,
        };

        tracing::info!(
            run_id = %run_id,
            kind = kind.as_str(),
            document_id = %document.id(),
            pages = total,
            workers = pool_size,
            force_reprocess,
            "batch started"
        );
        self.emit_event(Event::BatchStarted {
            run_id,
            kind,
            total,
        });

        let items: Vec<WorkItem> = pages
            .into_iter()
            .map(|page| WorkItem {
                page,
                kind,
                force_reprocess,
            })
            .collect();

        let pipeline = Arc::new(ItemPipeline {
            gate: CacheGate {
                run_id,
                document,
                cache: Arc::clone(&self.collaborators.cache),
                history: Arc::clone(&self.collaborators.history),
            },
            work,
            retry: self.config.retry.clone(),
            limiter: self.limiter.clone(),
            cancel: cancel.clone(),
        });
        let executor = BatchExecutor {
            pool_size,
            state: self.state.subscribe(),
            cancel: cancel.clone(),
            processed,
        };
        let aggregator = ResultAggregator {
            run_id,
            kind,
            total,
            event_tx: self.event_tx.clone(),
            history: Arc::clone(&self.collaborators.history),
        };

        let controller = self.clone();
        let task = tokio::spawn(async move {
            let (tx, rx) = mpsc::channel(pool_size.max(1) * 2);
            let handler = move |item: WorkItem| {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.process(item).await }
            };

            let ((), tally) = tokio::join!(executor.run(items, handler, tx), aggregator.drain(rx));
            let summary = aggregator.finish(tally, cancel.is_cancelled()).await;

            controller.finish_batch().await;
            controller.emit_event(Event::BatchComplete {
                summary: summary.clone(),
            });
            summary
        });

        Ok(BatchHandle {
            run_id,
            kind,
            total,
            task,
        })
    }

    /// Refuse a start while a batch is active, before any validation runs
    ///
    /// The atomic transition in `start_batch` remains the authoritative
    /// check; this only keeps a rejected start from reporting configuration
    /// problems to the active batch's subscribers.
    fn ensure_idle(&self) -> Result<()> {
        if self.state() == ProcessingState::Idle {
            Ok(())
        } else {
            Err(Error::AlreadyRunning)
        }
    }

    /// Drop duplicate pages and reject pages outside the document
    async fn validate_pages(&self, document: &Document, pages: Vec<PageId>) -> Result<Vec<PageId>> {
        if pages.is_empty() {
            return Err(self.configuration_error("no pages selected", "pages"));
        }

        let mut seen = HashSet::with_capacity(pages.len());
        let mut unique = Vec::with_capacity(pages.len());
        for page in pages {
            if !document.contains(page).await {
                return Err(self.configuration_error(
                    format!("page {} is not part of document {}", page, document.id()),
                    "pages",
                ));
            }
            if seen.insert(page) {
                unique.push(page);
            }
        }
        Ok(unique)
    }

    /// Reset to Idle and clear batch bookkeeping
    ///
    /// Runs unconditionally when a batch drains, whether it ran out of pages
    /// or was cancelled.
    pub(crate) async fn finish_batch(&self) {
        let mut batch = self.batch.lock().await;
        *batch = None;
        self.state.send_replace(ProcessingState::Idle);
    }

    /// Report a configuration problem once and build the matching error
    fn configuration_error(&self, message: impl Into<String>, key: &str) -> Error {
        let message = message.into();
        tracing::error!(key, error = %message, "batch not started");
        self.emit_event(Event::ConfigurationError {
            message: message.clone(),
        });
        Error::config(message, key)
    }
}
