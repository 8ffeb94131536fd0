//! Core types for ocr-batch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Page number within a document (1-based)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u32);

impl PageId {
    /// Get the inner page number
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for PageId {
    fn from(page: u32) -> Self {
        Self(page)
    }
}

impl From<PageId> for u32 {
    fn from(page: PageId) -> Self {
        page.0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the document whose pages are being processed
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    /// Create a new DocumentId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a history run record
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl From<i64> for RunId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Controller state
///
/// Legal transitions:
/// Idle → Running (start), Running → Paused (pause), Paused → Running (resume),
/// Running/Paused → Cancelling (cancel), any → Idle (batch drained).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    /// No batch is active
    #[default]
    Idle,
    /// Workers are dequeuing and processing pages
    Running,
    /// Workers finish their current page and then wait for resume or cancel
    Paused,
    /// Workers stop dequeuing; the batch drains to Idle
    Cancelling,
}

impl ProcessingState {
    /// Returns true while a batch owns the controller (Running or Paused)
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessingState::Running | ProcessingState::Paused)
    }
}

/// Kind of work a batch performs on each page
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Render the page and run OCR on the image
    Recognition,
    /// Run the page's recognized text through an AI transformation
    Transform,
}

impl TaskKind {
    /// Stable string form used for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Recognition => "recognition",
            TaskKind::Transform => "transform",
        }
    }

    /// Parse the storage form back into a TaskKind
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recognition" => Some(TaskKind::Recognition),
            "transform" => Some(TaskKind::Transform),
            _ => None,
        }
    }
}

/// A single page assigned to exactly one worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    /// Page to process
    pub page: PageId,
    /// What to do with it
    pub kind: TaskKind,
    /// Skip the cache lookup and always call the provider
    pub force_reprocess: bool,
}

/// How a work item ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Provider produced a fresh result
    Processed,
    /// Result was served from the cache
    Cached,
    /// Processing failed after retries (or with a fatal error)
    Failed,
    /// Abandoned because the batch was cancelled
    Cancelled,
}

impl ItemOutcome {
    /// Returns true for outcomes that count as a success
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Processed | ItemOutcome::Cached)
    }

    /// Stable string form used for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Processed => "processed",
            ItemOutcome::Cached => "cached",
            ItemOutcome::Failed => "failed",
            ItemOutcome::Cancelled => "cancelled",
        }
    }

    /// Parse the storage form; unknown values read back as Failed
    pub fn parse(s: &str) -> Self {
        match s {
            "processed" => ItemOutcome::Processed,
            "cached" => ItemOutcome::Cached,
            "cancelled" => ItemOutcome::Cancelled,
            _ => ItemOutcome::Failed,
        }
    }
}

/// Result emitted by a worker for each completed or aborted item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Page the result belongs to
    pub page: PageId,
    /// How the item ended
    pub outcome: ItemOutcome,
    /// Human-readable status line
    pub status: String,
    /// Error message for failed items
    pub error: Option<String>,
}

impl ProcessResult {
    pub(crate) fn processed(page: PageId, kind: TaskKind) -> Self {
        let status = match kind {
            TaskKind::Recognition => format!("page {page} recognized"),
            TaskKind::Transform => format!("page {page} transformed"),
        };
        Self {
            page,
            outcome: ItemOutcome::Processed,
            status,
            error: None,
        }
    }

    pub(crate) fn cached(page: PageId) -> Self {
        Self {
            page,
            outcome: ItemOutcome::Cached,
            status: format!("page {page} loaded from cache"),
            error: None,
        }
    }

    pub(crate) fn failed(page: PageId, error: String) -> Self {
        Self {
            page,
            outcome: ItemOutcome::Failed,
            status: format!("page {page} failed"),
            error: Some(error),
        }
    }

    pub(crate) fn cancelled(page: PageId) -> Self {
        Self {
            page,
            outcome: ItemOutcome::Cancelled,
            status: format!("page {page} cancelled"),
            error: None,
        }
    }
}

/// Point-in-time view of the controller, returned by `query_state`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Current controller state
    pub state: ProcessingState,
    /// Number of pages in the active batch (0 when idle)
    pub batch_size: usize,
    /// Pages that have produced a result so far
    pub processed_count: usize,
    /// History run of the active batch
    pub run_id: Option<RunId>,
    /// Kind of the active batch
    pub kind: Option<TaskKind>,
}

/// Final status of a history run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Batch is still in progress
    Running,
    /// At least one page succeeded
    Completed,
    /// No page succeeded
    Failed,
    /// The batch was cancelled by the user
    Cancelled,
}

impl RunStatus {
    /// Convert integer status code to RunStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => RunStatus::Running,
            1 => RunStatus::Completed,
            2 => RunStatus::Failed,
            3 => RunStatus::Cancelled,
            _ => RunStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert RunStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            RunStatus::Running => 0,
            RunStatus::Completed => 1,
            RunStatus::Failed => 2,
            RunStatus::Cancelled => 3,
        }
    }
}

/// Terminal summary of a drained batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// History run the batch was recorded under
    pub run_id: RunId,
    /// Kind of work performed
    pub kind: TaskKind,
    /// Pages submitted
    pub total: usize,
    /// Pages that produced a result (including cancelled aborts)
    pub processed: usize,
    /// Pages processed or served from cache
    pub succeeded: usize,
    /// Pages that failed
    pub failed: usize,
    /// Whether the batch observed a cancel request
    pub cancelled: bool,
    /// Final run status
    pub status: RunStatus,
}

/// Previously computed text for one page
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Document the page belongs to
    pub document_id: DocumentId,
    /// Page number
    pub page: PageId,
    /// OCR output
    pub ocr_text: Option<String>,
    /// Output of the last text transformation
    pub transformed_text: Option<String>,
    /// When the row was last written
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Returns the cached field relevant to `kind`, if present
    pub fn text_for(&self, kind: TaskKind) -> Option<&str> {
        match kind {
            TaskKind::Recognition => self.ocr_text.as_deref(),
            TaskKind::Transform => self.transformed_text.as_deref(),
        }
    }
}

/// Where a run item's result came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSource {
    /// Produced by the recognition or transformation provider
    Provider,
    /// Served from the page cache
    Cache,
}

impl ItemSource {
    /// Stable string form used for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSource::Provider => "provider",
            ItemSource::Cache => "cache",
        }
    }

    /// Parse the storage form back into an ItemSource
    pub fn parse(s: &str) -> Self {
        match s {
            "cache" => ItemSource::Cache,
            _ => ItemSource::Provider,
        }
    }
}

/// Parameters for creating a history run
#[derive(Clone, Debug)]
pub struct NewRun {
    /// Document being processed
    pub document_id: DocumentId,
    /// Kind of batch
    pub kind: TaskKind,
    /// Number of pages submitted
    pub total_items: usize,
    /// Whether the cache was bypassed
    pub force_reprocess: bool,
    /// Transformation instruction (transform batches only)
    pub instruction: Option<String>,
}

/// Stored history run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier
    pub id: RunId,
    /// Document processed by the run
    pub document_id: DocumentId,
    /// Kind of batch
    pub kind: TaskKind,
    /// Current or final status
    pub status: RunStatus,
    /// Number of pages submitted
    pub total_items: usize,
    /// Whether the cache was bypassed
    pub force_reprocess: bool,
    /// Transformation instruction (transform batches only)
    pub instruction: Option<String>,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

/// One page's entry within a history run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunItem {
    /// Page number
    pub page: PageId,
    /// How the page ended
    pub outcome: ItemOutcome,
    /// Provider or cache
    pub source: ItemSource,
    /// Wall-clock processing time (zero for cache hits)
    pub duration: Duration,
    /// Error message for failed pages
    pub error: Option<String>,
}

/// Event emitted during the batch lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A batch was accepted and workers are starting
    BatchStarted {
        /// History run of the batch
        run_id: RunId,
        /// Kind of batch
        kind: TaskKind,
        /// Number of pages submitted
        total: usize,
    },

    /// One page produced a result
    Progress {
        /// History run of the batch
        run_id: RunId,
        /// Number of pages submitted
        total: usize,
        /// Pages that have produced a result so far
        processed: usize,
        /// Page that just finished
        page: PageId,
        /// Human-readable status line
        status: String,
    },

    /// A page finished successfully and its text is available in the document
    PageCompleted {
        /// History run of the batch
        run_id: RunId,
        /// Page number
        page: PageId,
        /// Whether the text came from the cache
        from_cache: bool,
    },

    /// A page failed; the batch continues
    PageFailed {
        /// History run of the batch
        run_id: RunId,
        /// Page number
        page: PageId,
        /// Error message
        error: String,
    },

    /// Pause request acknowledged
    Paused,

    /// Resume request acknowledged
    Resumed,

    /// Cancel request acknowledged; workers are draining
    Cancelling,

    /// The batch drained
    BatchComplete {
        /// Terminal summary
        summary: BatchSummary,
    },

    /// A batch could not start because of missing configuration
    ConfigurationError {
        /// Error message
        message: String,
    },
}
