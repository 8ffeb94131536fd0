//! Retry logic with exponential backoff
//!
//! Every external call the engine makes (render, recognize, transform) goes
//! through [`execute_with_retry`]. The executor knows nothing about the call
//! site: it invokes the operation, classifies failures through [`IsRetryable`],
//! and sleeps `min(initial_delay × multiplier^attempt, max_delay)` between
//! attempts. The sleep is abandoned as soon as the cancellation token fires.
//!
//! # Example
//!
//! ```no_run
//! use ocr_batch::retry::{IsRetryable, execute_with_retry};
//! use ocr_batch::config::RetryConfig;
//! use ocr_batch::RetryError;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), RetryError<MyError>> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let text = execute_with_retry(&config, &cancel, || async {
//!     Ok::<_, MyError>("recognized".to_string())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, RetryError};
use rand::Rng;
use regex::Regex;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, throttling, server-side 5xx) should return `true`.
/// Permanent failures (bad request, authentication, unusable input) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Phrases that mark a failure as transient
const TRANSIENT_PHRASES: &[&str] = &[
    // network
    "timeout",
    "timed out",
    "deadline exceeded",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "dial tcp",
    "dial error",
    "failed to dial",
    // throttling
    "too many requests",
    "rate limit",
    "rate-limit",
    "ratelimit",
    // server side
    "internal server error",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
    "server overloaded",
];

/// Standalone 429 or 5xx status codes inside free-form error text
static TRANSIENT_STATUS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?:429|5\d\d)\b").ok());

/// Classify free-form error text from a provider or renderer
///
/// Matching is case-insensitive. Text mentioning a network failure, request
/// throttling, or a server-side failure is retryable; anything else is fatal.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    if TRANSIENT_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return true;
    }
    TRANSIENT_STATUS
        .as_ref()
        .is_some_and(|re| re.is_match(&lower))
}

/// Returns true for HTTP statuses worth retrying (429 and the 5xx class)
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Implementation of IsRetryable for our Error type
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| is_retryable_status(s.as_u16()))
                    || is_retryable_message(&e.to_string())
            }
            Error::Http { status, .. } => is_retryable_status(*status),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Collaborator errors carry free-form text from the underlying service
            Error::Render { reason, .. }
            | Error::Recognition { reason, .. }
            | Error::Transform { reason, .. } => is_retryable_message(reason),
            Error::Other(msg) => is_retryable_message(msg),
            // A cancelled item is never retried
            Error::Cancelled => false,
            Error::RetriesExhausted { .. } => false,
            Error::Config { .. } | Error::AlreadyRunning => false,
            Error::Persistence(_) | Error::Database(_) | Error::Sqlx(_) => false,
            Error::Serialization(_) => false,
        }
    }
}

/// Delay before retry number `attempt` (0-based), capped at `max_delay`
///
/// A multiplier below 1.0 (or NaN) is treated as 1.0, giving a constant delay.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let multiplier = if config.backoff_multiplier >= 1.0 {
        config.backoff_multiplier
    } else {
        1.0
    };
    let factor = multiplier.powi(attempt.min(i32::MAX as u32) as i32);
    let secs = config.initial_delay.as_secs_f64() * factor;
    Duration::try_from_secs_f64(secs).map_or(config.max_delay, |delay| delay.min(config.max_delay))
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry policy (max retries, delays, backoff multiplier, jitter)
/// * `cancel` - Cancellation signal; a pending backoff sleep returns immediately when it fires
/// * `operation` - Async closure that returns `Result<T, E>` where `E` implements `IsRetryable`
///
/// # Returns
///
/// The successful result, or:
/// - [`RetryError::Fatal`] with the first non-retryable error (exactly one invocation)
/// - [`RetryError::Exhausted`] with the last error after `max_retries + 1` invocations
/// - [`RetryError::Cancelled`] if cancellation fired while waiting between attempts
pub async fn execute_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                tracing::error!(error = %e, "Operation failed with non-retryable error");
                return Err(RetryError::Fatal(e));
            }
            Err(e) if attempt >= config.max_retries => {
                tracing::error!(
                    error = %e,
                    attempts = attempt + 1,
                    "Operation failed after all retry attempts exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    last: e,
                });
            }
            Err(e) => {
                let delay = backoff_delay(config, attempt);
                let delay = if config.jitter { add_jitter(delay) } else { delay };
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(attempt = attempt, "Retry backoff interrupted by cancellation");
                        return Err(RetryError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay,
/// so the actual delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
