//! Batch lifecycle control: pause, resume, cancel, state queries.

use std::sync::atomic::Ordering;

use crate::types::{Event, ProcessingState, StateSnapshot};

use super::ProcessingController;

impl ProcessingController {
    /// Pause the active batch
    ///
    /// Effective only while Running. Workers finish the page they are on and
    /// then wait; no new page is dequeued until [`resume`](Self::resume) or
    /// [`cancel`](Self::cancel).
    ///
    /// Returns true if the state changed.
    pub async fn pause(&self) -> bool {
        let paused = self.transition(
            |s| s == ProcessingState::Running,
            ProcessingState::Paused,
        );
        if paused {
            tracing::info!("batch paused");
            self.emit_event(Event::Paused);
        }
        paused
    }

    /// Resume a paused batch
    ///
    /// Effective only while Paused. Returns true if the state changed.
    pub async fn resume(&self) -> bool {
        let resumed = self.transition(
            |s| s == ProcessingState::Paused,
            ProcessingState::Running,
        );
        if resumed {
            tracing::info!("batch resumed");
            self.emit_event(Event::Resumed);
        }
        resumed
    }

    /// Cancel the active batch
    ///
    /// Effective while Running or Paused. Cancellation is cooperative: pages
    /// whose provider call is already in flight run to completion, retry
    /// backoffs and limiter waits end immediately, and nothing else is
    /// dequeued. The batch then drains to Idle and its run is recorded as
    /// cancelled.
    ///
    /// Returns true if the state changed.
    pub async fn cancel(&self) -> bool {
        // Hold the bookkeeping lock so a batch that is still starting up
        // has its token in place before we fire it
        let batch = self.batch.lock().await;
        let cancelled = self.transition(|s| s.is_active(), ProcessingState::Cancelling);
        if cancelled {
            if let Some(active) = batch.as_ref() {
                active.cancel.cancel();
                tracing::info!(run_id = %active.run_id, "batch cancelling");
            }
            self.emit_event(Event::Cancelling);
        }
        cancelled
    }

    /// Current state, batch size, and processed count
    ///
    /// Safe to call concurrently with any other operation.
    pub async fn query_state(&self) -> StateSnapshot {
        let batch = self.batch.lock().await;
        let state = *self.state.borrow();
        match batch.as_ref() {
            Some(active) => StateSnapshot {
                state,
                batch_size: active.total,
                processed_count: active.processed.load(Ordering::SeqCst),
                run_id: Some(active.run_id),
                kind: Some(active.kind),
            },
            None => StateSnapshot {
                state,
                batch_size: 0,
                processed_count: 0,
                run_id: None,
                kind: None,
            },
        }
    }

    /// Current state without the batch details
    pub fn state(&self) -> ProcessingState {
        *self.state.borrow()
    }

    /// Wait until no batch is active
    ///
    /// Returns immediately when already Idle.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.state.subscribe();
        rx.wait_for(|s| *s == ProcessingState::Idle).await.ok();
    }

    /// Atomically move to `to` if the current state satisfies `allowed`
    pub(crate) fn transition(
        &self,
        allowed: impl FnOnce(ProcessingState) -> bool,
        to: ProcessingState,
    ) -> bool {
        self.state.send_if_modified(|current| {
            if allowed(*current) {
                *current = to;
                true
            } else {
                false
            }
        })
    }
}
