//! Request rate limiting using a token bucket
//!
//! Every worker of every batch shares one [`RequestLimiter`] and acquires a
//! permit before issuing a render, recognition, or transformation call.
//! Providers throttle per account, not per batch, so the bucket lives on the
//! controller rather than on a single pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// One permit, in the fixed-point unit the bucket counts in
const PERMIT: u64 = 1_000;

/// Shared request limiter
///
/// # Algorithm
///
/// - Tokens represent requests that may be issued now
/// - Tokens refill continuously at `requests_per_minute / 60` per second
/// - The bucket never holds more than `burst` tokens
/// - A caller without a token sleeps until the next one is due
///
/// Token counts are stored in thousandths so that partial refills between
/// calls are not lost to rounding.
#[derive(Clone)]
pub struct RequestLimiter {
    /// Requests per minute (0 = unlimited)
    per_minute: Arc<AtomicU64>,
    /// Bucket capacity in thousandths of a permit
    capacity: u64,
    /// Available tokens in thousandths of a permit
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since the limiter epoch)
    last_refill: Arc<AtomicU64>,
    /// Reference point for `last_refill`
    epoch: Instant,
}

impl RequestLimiter {
    /// Create a new limiter
    ///
    /// # Arguments
    ///
    /// * `requests_per_minute` - Sustained request rate (None = unlimited)
    /// * `burst` - Requests that may be issued back-to-back from a full bucket
    ///
    /// # Examples
    ///
    /// ```
    /// use ocr_batch::rate_limiter::RequestLimiter;
    ///
    /// // 60 requests per minute, no bursting
    /// let limiter = RequestLimiter::new(Some(60), 1);
    ///
    /// // Unlimited
    /// let unlimited = RequestLimiter::new(None, 1);
    /// ```
    #[must_use]
    pub fn new(requests_per_minute: Option<u32>, burst: u32) -> Self {
        let capacity = u64::from(burst.max(1)) * PERMIT;
        Self {
            per_minute: Arc::new(AtomicU64::new(u64::from(requests_per_minute.unwrap_or(0)))),
            capacity,
            tokens: Arc::new(AtomicU64::new(capacity)),
            last_refill: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
        }
    }

    /// Create a limiter from the rate-limit section of the configuration
    pub fn from_config(config: &crate::config::RateLimitConfig) -> Self {
        Self::new(config.requests_per_minute, config.burst)
    }

    /// Get the configured rate; None means unlimited
    pub fn requests_per_minute(&self) -> Option<u32> {
        match self.per_minute.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n as u32),
        }
    }

    /// Change the rate; takes effect on the next acquire
    pub fn set_requests_per_minute(&self, requests_per_minute: Option<u32>) {
        self.per_minute.store(
            u64::from(requests_per_minute.unwrap_or(0)),
            Ordering::SeqCst,
        );
    }

    /// Wait until a request permit is available and consume it
    ///
    /// Returns immediately when the limiter is unlimited. Callers that must
    /// stay responsive to cancellation race this future against their token.
    pub async fn acquire(&self) {
        loop {
            let per_minute = self.per_minute.load(Ordering::Relaxed);
            if per_minute == 0 {
                return;
            }

            self.refill(per_minute);

            let current = self.tokens.load(Ordering::SeqCst);
            if current >= PERMIT {
                if self
                    .tokens
                    .compare_exchange(
                        current,
                        current - PERMIT,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    return;
                }
                // Another worker took the token first
                continue;
            }

            // Time until the missing fraction of a permit has refilled
            let missing = PERMIT - current;
            let nanos_per_unit = 60_000_000_000 / (per_minute * PERMIT);
            let wait = Duration::from_nanos(missing * nanos_per_unit.max(1));
            tokio::time::sleep(wait.clamp(Duration::from_millis(1), Duration::from_secs(1))).await;
        }
    }

    /// Refill tokens based on elapsed time since the last refill
    fn refill(&self, per_minute: u64) {
        let now = self.now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed = now.saturating_sub(last);

        // thousandths of a permit accrued: per_minute * PERMIT * elapsed / 60s
        let to_add = (u128::from(per_minute) * u128::from(PERMIT) * u128::from(elapsed)
            / 60_000_000_000u128) as u64;

        if to_add > 0
            && self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            // Single read-modify-write so a concurrent take is never overwritten
            self.tokens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(current.saturating_add(to_add).min(self.capacity))
                })
                .ok();
        }
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn unlimited_acquire_returns_immediately() {
        let limiter = RequestLimiter::new(None, 1);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_rate_is_enforced() {
        // One request per second
        let limiter = RequestLimiter::new(Some(60), 1);
        let start = Instant::now();

        limiter.acquire().await; // bucket starts full
        limiter.acquire().await;
        limiter.acquire().await;

        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(2),
            "third request should wait ~2s, waited {elapsed:?}"
        );
        assert!(elapsed < Duration::from_millis(2_100));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_allows_back_to_back_requests() {
        let limiter = RequestLimiter::new(Some(60), 3);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(990));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquirers_share_one_bucket() {
        let limiter = RequestLimiter::new(Some(120), 1); // one per 500ms
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap() - start);
        }
        finished.sort();

        assert!(finished[3] >= Duration::from_millis(1_500));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_acquirers_never_exceed_the_burst() {
        // One permit per second; the burst is all that is available at once
        let limiter = RequestLimiter::new(Some(60), 3);
        let granted = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let limiter = limiter.clone();
            let granted = Arc::clone(&granted);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                granted.fetch_add(1, Ordering::SeqCst);
            }));
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(granted.load(Ordering::SeqCst), 3);

        for handle in handles {
            handle.abort();
        }
    }

    #[test]
    fn rate_can_be_changed_at_runtime() {
        let limiter = RequestLimiter::new(Some(30), 1);
        assert_eq!(limiter.requests_per_minute(), Some(30));

        limiter.set_requests_per_minute(None);
        assert_eq!(limiter.requests_per_minute(), None);
    }
}
