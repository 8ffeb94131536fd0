//! # ocr-batch
//!
//! Pausable, cancellable batch engine for page-level OCR and AI text
//! transformation.
//!
//! ## Design Philosophy
//!
//! ocr-batch is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Collaborator-agnostic** - Rendering, recognition, transformation, and
//!   storage are traits; an OpenAI-compatible provider and a SQLite store ship
//!   in the box
//! - **Sensible defaults** - Three recognition workers, two transform workers,
//!   exponential backoff on transient failures
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocr_batch::{Config, Database, Document, DocumentId, OpenAiProvider, PageId, ProcessingController};
//! # use ocr_batch::{ImageArtifact, PageRenderer};
//! # struct MyRenderer;
//! # #[async_trait::async_trait]
//! # impl PageRenderer for MyRenderer {
//! #     async fn render(&self, page: PageId) -> ocr_batch::Result<ImageArtifact> {
//! #         Ok(ImageArtifact::png(page, Vec::new()))
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let provider = Arc::new(OpenAiProvider::new(config.provider.clone())?);
//!     let db = Arc::new(Database::new(&config.persistence.database_path).await?);
//!
//!     let controller = ProcessingController::builder(config)
//!         .renderer(Arc::new(MyRenderer))
//!         .recognizer(provider.clone())
//!         .transformer(provider)
//!         .store(db)
//!         .build()?;
//!     controller
//!         .set_document(Arc::new(Document::new(DocumentId::new("report.pdf"), 12)))
//!         .await;
//!
//!     // Subscribe to events
//!     let mut events = controller.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let pages = (1..=12).map(PageId).collect();
//!     let summary = controller.start_recognition(pages, false).await?.wait().await?;
//!     println!("{} of {} pages recognized", summary.succeeded, summary.total);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// SQLite persistence layer
pub mod db;
/// Shared page model
pub mod document;
/// Batch processing engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Rendering, recognition, and transformation providers
pub mod providers;
/// Request rate limiting with token bucket
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// Cache and history store traits
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{
    Config, PersistenceConfig, ProviderConfig, RateLimitConfig, RetryConfig, WorkerConfig,
};
pub use db::Database;
pub use document::{Document, Page};
pub use engine::{BatchHandle, ControllerBuilder, ProcessingController};
pub use error::{DatabaseError, Error, Result, RetryError};
pub use providers::{
    ImageArtifact, OpenAiProvider, PageRenderer, RecognitionProvider, TextTransformProvider,
};
pub use rate_limiter::RequestLimiter;
pub use store::{CacheStore, HistoryStore, MemoryStore};
pub use types::{
    BatchSummary, CacheEntry, DocumentId, Event, ItemOutcome, ItemSource, PageId,
    ProcessingState, RunId, RunItem, RunRecord, RunStatus, StateSnapshot, TaskKind,
};

/// Helper function to run the controller with graceful signal handling.
///
/// Waits for a termination signal, cancels the active batch if there is one,
/// and returns once the controller is back to Idle.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use ocr_batch::{Config, ProcessingController, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let controller = ProcessingController::builder(Config::default()).build()?;
///
///     // Cancel and drain on Ctrl+C
///     run_with_shutdown(controller).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(controller: ProcessingController) {
    wait_for_signal().await;
    if controller.cancel().await {
        tracing::info!("waiting for the active batch to drain");
    }
    controller.wait_until_idle().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
