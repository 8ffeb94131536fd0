//! Event collection helpers for integration tests

use std::time::Duration;

use ocr_batch::{BatchSummary, Event};
use tokio::sync::broadcast;

/// Collect events until the next BatchComplete, or panic after `timeout`
pub async fn collect_events_until_complete(
    rx: &mut broadcast::Receiver<Event>,
    timeout: Duration,
) -> (Vec<Event>, BatchSummary) {
    let mut events = Vec::new();
    let result = tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(Event::BatchComplete { summary }) => return summary,
                Ok(event) => events.push(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;

    match result {
        Ok(summary) => (events, summary),
        Err(_) => panic!("timed out waiting for BatchComplete"),
    }
}

/// Count events matching `predicate`
pub fn count_events(events: &[Event], predicate: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| predicate(e)).count()
}
