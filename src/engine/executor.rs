//! Bounded worker pool: a fixed number of workers pull items from a shared queue.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::types::ProcessingState;

/// Fixed-size pool that runs a handler over every queued item
///
/// Both batch kinds use this runner; only the pool size and handler differ.
/// Before each dequeue a worker consults the controller state:
///
/// - Cancelling (or a fired token): exit, leaving the rest of the queue untouched
/// - Paused: wait for resume or cancel, unless the queue is already empty
/// - Running: take the next item
pub(crate) struct BatchExecutor {
    pub(crate) pool_size: usize,
    pub(crate) state: watch::Receiver<ProcessingState>,
    pub(crate) cancel: CancellationToken,
    pub(crate) processed: Arc<AtomicUsize>,
}

impl BatchExecutor {
    /// Run `handler` over `items` and send each result to `results`
    ///
    /// Returns once every worker has exited. The results channel closes when
    /// the last worker drops its sender.
    pub(crate) async fn run<T, R, H, Fut>(self, items: Vec<T>, handler: H, results: mpsc::Sender<R>)
    where
        T: Send + 'static,
        R: Send + 'static,
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let workers = self.pool_size.max(1).min(items.len().max(1));
        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        let handler = Arc::new(handler);

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            let results = results.clone();
            let mut state = self.state.clone();
            let cancel = self.cancel.clone();
            let processed = Arc::clone(&self.processed);

            handles.push(tokio::spawn(async move {
                while let Some(item) = next_item(&queue, &mut state, &cancel).await {
                    let result = handler(item).await;
                    processed.fetch_add(1, Ordering::SeqCst);
                    if results.send(result).await.is_err() {
                        tracing::warn!(worker, "result receiver dropped, worker stopping");
                        break;
                    }
                }
                tracing::debug!(worker, "worker exited");
            }));
        }
        drop(results);

        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
    }
}

/// Wait until the worker may dequeue, then take the next item
///
/// Returns None when the worker should exit.
async fn next_item<T>(
    queue: &Mutex<VecDeque<T>>,
    state: &mut watch::Receiver<ProcessingState>,
    cancel: &CancellationToken,
) -> Option<T> {
    loop {
        if cancel.is_cancelled() {
            return None;
        }

        let current = *state.borrow_and_update();
        match current {
            ProcessingState::Running => {
                let mut queue = queue.lock().await;
                // A pause may have landed while we waited for the lock
                if *state.borrow() != ProcessingState::Running {
                    continue;
                }
                return queue.pop_front();
            }
            ProcessingState::Paused => {
                // Nothing left to resume into; let the batch drain
                if queue.lock().await.is_empty() {
                    return None;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    changed = state.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
            ProcessingState::Cancelling | ProcessingState::Idle => return None,
        }
    }
}
