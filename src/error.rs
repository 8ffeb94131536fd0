//! Error types for ocr-batch
//!
//! This module provides the error taxonomy used throughout the engine:
//! - Configuration errors that prevent a batch from starting
//! - Per-item processing errors (render, recognition, transformation)
//! - Cooperative cancellation, which is never reported as a failure
//! - Persistence errors from the cache and history stores
//! - The generic [`RetryError`] produced by the retry executor

use thiserror::Error;

/// Result type alias for ocr-batch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ocr-batch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is missing or invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "workers.recognition_workers")
        key: Option<String>,
    },

    /// A batch is already running or paused on this controller
    #[error("a batch is already active")]
    AlreadyRunning,

    /// Rendering a page image failed
    #[error("failed to render page {page}: {reason}")]
    Render {
        /// Page number that failed to render
        page: u32,
        /// The reason rendering failed
        reason: String,
    },

    /// The recognition provider failed for a page
    #[error("recognition failed for page {page}: {reason}")]
    Recognition {
        /// Page number being recognized
        page: u32,
        /// The reason recognition failed
        reason: String,
    },

    /// The text transformation provider failed for a page
    #[error("transformation failed for page {page}: {reason}")]
    Transform {
        /// Page number being transformed
        page: u32,
        /// The reason transformation failed
        reason: String,
    },

    /// Provider returned a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Work was abandoned because the batch was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Retryable failure that persisted through every attempt
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Total number of invocations, including the first one
        attempts: u32,
        /// The last error observed
        source: Box<Error>,
    },

    /// Cache or history write failed after the primary result succeeded
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error tied to a config key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Returns true if this error is a cooperative cancellation rather than a failure
    ///
    /// Looks through [`Error::RetriesExhausted`] so a wrapped abort is still recognized.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::RetriesExhausted { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Outcome of a call that went through the retry executor and did not succeed
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed with an error classified as permanent
    #[error("{0}")]
    Fatal(E),

    /// The operation kept failing with retryable errors until attempts ran out
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Total number of invocations, including the first one
        attempts: u32,
        /// The last error observed
        last: E,
    },

    /// A cancellation signal fired while waiting between attempts
    #[error("cancelled during retry backoff")]
    Cancelled,
}

impl From<RetryError<Error>> for Error {
    fn from(err: RetryError<Error>) -> Self {
        match err {
            RetryError::Fatal(e) => e,
            RetryError::Exhausted { attempts, last } => Error::RetriesExhausted {
                attempts,
                source: Box::new(last),
            },
            RetryError::Cancelled => Error::Cancelled,
        }
    }
}
