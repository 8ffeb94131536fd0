//! Per-page processing: cache gate, then the provider path under retry.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::document::PagePatch;
use crate::error::{Error, Result};
use crate::providers::{PageRenderer, RecognitionProvider, TextTransformProvider};
use crate::rate_limiter::RequestLimiter;
use crate::retry::execute_with_retry;
use crate::types::{ItemOutcome, ItemSource, PageId, ProcessResult, RunItem, TaskKind, WorkItem};

use super::cache_gate::CacheGate;

/// Provider path for one batch kind
#[derive(Clone)]
pub(crate) enum Work {
    /// Render the page, then recognize the image
    Recognition {
        renderer: Arc<dyn PageRenderer>,
        recognizer: Arc<dyn RecognitionProvider>,
    },
    /// Transform the page's recognized text
    Transform {
        transformer: Arc<dyn TextTransformProvider>,
        instruction: Arc<str>,
    },
}

/// Everything a worker needs to process one page of a batch
pub(crate) struct ItemPipeline {
    pub(crate) gate: CacheGate,
    pub(crate) work: Work,
    pub(crate) retry: RetryConfig,
    pub(crate) limiter: RequestLimiter,
    pub(crate) cancel: CancellationToken,
}

impl ItemPipeline {
    /// Process one page and describe how it ended
    ///
    /// Never fails: errors become a failed or cancelled [`ProcessResult`].
    pub(crate) async fn process(&self, item: WorkItem) -> ProcessResult {
        if self.gate.try_serve(&item).await {
            return ProcessResult::cached(item.page);
        }

        let started = Instant::now();
        let result = self.call_provider(item.page).await;
        let duration = started.elapsed();

        match result {
            Ok(text) => {
                let patch = match self.work {
                    Work::Recognition { .. } => PagePatch::Recognized(text),
                    Work::Transform { .. } => PagePatch::Transformed(text),
                };
                self.gate.document.apply(item.page, patch).await;
                self.gate.store(item.page, item.kind).await;
                self.gate
                    .record(RunItem {
                        page: item.page,
                        outcome: ItemOutcome::Processed,
                        source: ItemSource::Provider,
                        duration,
                        error: None,
                    })
                    .await;
                tracing::debug!(
                    page = %item.page,
                    elapsed_ms = duration.as_millis() as u64,
                    "page processed"
                );
                ProcessResult::processed(item.page, item.kind)
            }
            Err(e) if e.is_cancellation() => {
                tracing::debug!(page = %item.page, "page abandoned by cancellation");
                self.gate
                    .record(RunItem {
                        page: item.page,
                        outcome: ItemOutcome::Cancelled,
                        source: ItemSource::Provider,
                        duration,
                        error: None,
                    })
                    .await;
                ProcessResult::cancelled(item.page)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(page = %item.page, error = %message, "page failed");
                self.gate
                    .document
                    .apply(item.page, PagePatch::Failed(message.clone()))
                    .await;
                self.gate
                    .record(RunItem {
                        page: item.page,
                        outcome: ItemOutcome::Failed,
                        source: ItemSource::Provider,
                        duration,
                        error: Some(message.clone()),
                    })
                    .await;
                ProcessResult::failed(item.page, message)
            }
        }
    }

    /// Run the provider path for a page under the retry policy
    async fn call_provider(&self, page: PageId) -> Result<String> {
        match &self.work {
            Work::Recognition {
                renderer,
                recognizer,
            } => {
                let outcome = execute_with_retry(&self.retry, &self.cancel, || {
                    let renderer = Arc::clone(renderer);
                    let recognizer = Arc::clone(recognizer);
                    async move {
                        self.acquire_permit().await?;
                        let image = renderer.render(page).await?;
                        recognizer
                            .recognize(&image)
                            .await
                            .map_err(|e| attribute_to_page(e, page, TaskKind::Recognition))
                    }
                })
                .await;
                Ok(outcome?)
            }
            Work::Transform {
                transformer,
                instruction,
            } => {
                let source = self
                    .gate
                    .document
                    .page(page)
                    .await
                    .and_then(|p| p.ocr_text)
                    .ok_or_else(|| Error::Transform {
                        page: page.get(),
                        reason: "page has no recognized text".to_string(),
                    })?;

                let outcome = execute_with_retry(&self.retry, &self.cancel, || {
                    let transformer = Arc::clone(transformer);
                    let instruction = Arc::clone(instruction);
                    let source = source.as_str();
                    async move {
                        self.acquire_permit().await?;
                        transformer
                            .transform(source, &instruction)
                            .await
                            .map_err(|e| attribute_to_page(e, page, TaskKind::Transform))
                    }
                })
                .await;
                Ok(outcome?)
            }
        }
    }

    /// Wait for a limiter permit, giving up if the batch is cancelled
    async fn acquire_permit(&self) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = self.limiter.acquire() => Ok(()),
        }
    }
}

/// Tie a provider's free-form failure to the page and stage it happened in
///
/// Structured errors (HTTP status, network, cancellation) pass through so
/// retry classification still sees them.
fn attribute_to_page(err: Error, page: PageId, kind: TaskKind) -> Error {
    match (err, kind) {
        (Error::Other(reason), TaskKind::Recognition) => Error::Recognition {
            page: page.get(),
            reason,
        },
        (Error::Other(reason), TaskKind::Transform) => Error::Transform {
            page: page.get(),
            reason,
        },
        (other, _) => other,
    }
}
