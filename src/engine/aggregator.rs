//! Result aggregation: progress events, per-page notifications, and the run's final status.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::store::HistoryStore;
use crate::types::{BatchSummary, Event, ItemOutcome, ProcessResult, RunId, RunStatus, TaskKind};

/// Running totals over a batch's result stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Tally {
    pub(crate) processed: usize,
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
}

/// Consumes the result stream of one batch
pub(crate) struct ResultAggregator {
    pub(crate) run_id: RunId,
    pub(crate) kind: TaskKind,
    pub(crate) total: usize,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) history: Arc<dyn HistoryStore>,
}

impl ResultAggregator {
    /// Drain results until every worker has dropped its sender
    ///
    /// Each result produces one `Progress` event. Successes additionally
    /// produce `PageCompleted`; genuine failures produce `PageFailed`.
    /// Pages abandoned by cancellation produce neither.
    pub(crate) async fn drain(&self, mut results: mpsc::Receiver<ProcessResult>) -> Tally {
        let mut tally = Tally::default();

        while let Some(result) = results.recv().await {
            tally.processed += 1;

            self.emit(Event::Progress {
                run_id: self.run_id,
                total: self.total,
                processed: tally.processed,
                page: result.page,
                status: result.status.clone(),
            });

            match result.outcome {
                ItemOutcome::Processed | ItemOutcome::Cached => {
                    tally.succeeded += 1;
                    self.emit(Event::PageCompleted {
                        run_id: self.run_id,
                        page: result.page,
                        from_cache: result.outcome == ItemOutcome::Cached,
                    });
                }
                ItemOutcome::Failed => {
                    tally.failed += 1;
                    self.emit(Event::PageFailed {
                        run_id: self.run_id,
                        page: result.page,
                        error: result.error.unwrap_or_default(),
                    });
                }
                ItemOutcome::Cancelled => {}
            }
        }

        tally
    }

    /// Mark the run finished and build the batch summary
    ///
    /// A batch that observed cancellation is recorded as cancelled. Otherwise
    /// it is failed if nothing succeeded and completed if anything did, even
    /// when some pages failed.
    pub(crate) async fn finish(&self, tally: Tally, cancelled: bool) -> BatchSummary {
        let status = if cancelled {
            RunStatus::Cancelled
        } else if tally.succeeded == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        if let Err(e) = self.history.update_run_status(self.run_id, status).await {
            tracing::warn!(run_id = %self.run_id, error = %e, "failed to update run status");
        }

        tracing::info!(
            run_id = %self.run_id,
            kind = self.kind.as_str(),
            total = self.total,
            processed = tally.processed,
            succeeded = tally.succeeded,
            failed = tally.failed,
            status = ?status,
            "batch finished"
        );

        BatchSummary {
            run_id: self.run_id,
            kind: self.kind,
            total: self.total,
            processed: tally.processed,
            succeeded: tally.succeeded,
            failed: tally.failed,
            cancelled,
            status,
        }
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
