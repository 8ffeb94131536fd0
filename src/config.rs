//! Configuration types for ocr-batch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Retry configuration for transient provider failures
///
/// The delay before retry `k` (0-based) is
/// `min(initial_delay × backoff_multiplier^k, max_delay)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Worker pool sizes per batch kind
///
/// Transformation calls are more rate-sensitive, so their pool is smaller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent workers for recognition batches (default: 3)
    #[serde(default = "default_recognition_workers")]
    pub recognition_workers: usize,

    /// Concurrent workers for text-transformation batches (default: 2)
    #[serde(default = "default_transform_workers")]
    pub transform_workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            recognition_workers: default_recognition_workers(),
            transform_workers: default_transform_workers(),
        }
    }
}

/// Request rate limiting shared by every worker of every batch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum provider requests per minute (None = unlimited)
    #[serde(default)]
    pub requests_per_minute: Option<u32>,

    /// Requests that may be issued back-to-back before throttling kicks in (default: 1)
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: None,
            burst: default_burst(),
        }
    }
}

/// OpenAI-compatible provider settings used by [`crate::providers::OpenAiProvider`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API base URL, without the `/chat/completions` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub api_key: Option<String>,

    /// Vision model used for page recognition
    #[serde(default = "default_recognition_model")]
    pub recognition_model: String,

    /// Chat model used for text transformation
    #[serde(default = "default_transform_model")]
    pub transform_model: String,

    /// Instruction sent alongside each page image
    #[serde(default = "default_recognition_prompt")]
    pub recognition_prompt: String,

    /// Per-request timeout (default: 120 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            recognition_model: default_recognition_model(),
            transform_model: default_transform_model(),
            recognition_prompt: default_recognition_prompt(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./ocr-batch.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for the processing engine
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Retry policy applied to every render/recognize/transform call
    #[serde(default)]
    pub retry: RetryConfig,

    /// Worker pool sizes
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Provider request throttling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// HTTP provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Cache and history storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            workers: WorkerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            provider: ProviderConfig::default(),
            persistence: PersistenceConfig::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Config {
    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers.recognition_workers == 0 {
            return Err(Error::config(
                "recognition worker pool must have at least one worker",
                "workers.recognition_workers",
            ));
        }
        if self.workers.transform_workers == 0 {
            return Err(Error::config(
                "transform worker pool must have at least one worker",
                "workers.transform_workers",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(Error::config(
                format!(
                    "initial delay {:?} exceeds max delay {:?}",
                    self.retry.initial_delay, self.retry.max_delay
                ),
                "retry.initial_delay",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(Error::config(
                "backoff multiplier must be at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if self.rate_limit.requests_per_minute == Some(0) {
            return Err(Error::config(
                "requests_per_minute must be positive (omit it for unlimited)",
                "rate_limit.requests_per_minute",
            ));
        }
        if self.rate_limit.burst == 0 {
            return Err(Error::config("burst must be at least 1", "rate_limit.burst"));
        }
        if self.event_buffer == 0 {
            return Err(Error::config(
                "event buffer must hold at least one event",
                "event_buffer",
            ));
        }
        Ok(())
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_recognition_workers() -> usize {
    3
}

fn default_transform_workers() -> usize {
    2
}

fn default_burst() -> u32 {
    1
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_recognition_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_transform_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_recognition_prompt() -> String {
    "Transcribe all text on this page exactly as written. Preserve line breaks. \
     Return only the transcribed text."
        .to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("ocr-batch.db")
}

fn default_event_buffer() -> usize {
    1000
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Backoff delays are often sub-second, so they travel as milliseconds
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
