//! Database layer for ocr-batch
//!
//! Handles SQLite persistence for the page cache and batch run history.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`cache`] - Page cache lookups and upserts
//! - [`history`] - Run records and per-page run items
//!
//! [`Database`] implements [`crate::store::CacheStore`] and
//! [`crate::store::HistoryStore`], so it can be handed straight to the
//! processing controller.

use crate::types::{
    CacheEntry, DocumentId, ItemOutcome, ItemSource, PageId, RunId, RunItem, RunRecord, RunStatus,
    TaskKind,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::time::Duration;

mod cache;
mod history;
mod migrations;

/// Page cache row from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct CacheRow {
    /// Document identifier
    pub document_id: String,
    /// Page number
    pub page: i64,
    /// OCR text
    pub ocr_text: Option<String>,
    /// Transformation output
    pub transformed_text: Option<String>,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

impl From<CacheRow> for CacheEntry {
    fn from(row: CacheRow) -> Self {
        CacheEntry {
            document_id: DocumentId(row.document_id),
            page: PageId(row.page as u32),
            ocr_text: row.ocr_text,
            transformed_text: row.transformed_text,
            updated_at: timestamp(row.updated_at),
        }
    }
}

/// Run record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct RunRow {
    /// Unique database ID
    pub id: i64,
    /// Document processed by the run
    pub document_id: String,
    /// Batch kind ("recognition" or "transform")
    pub kind: String,
    /// Status code (see [`RunStatus::to_i32`])
    pub status: i32,
    /// Number of pages submitted
    pub total_items: i64,
    /// Whether the cache was bypassed (0 = no, 1 = yes)
    pub force_reprocess: i32,
    /// Transformation instruction
    pub instruction: Option<String>,
    /// Unix timestamp when the run started
    pub started_at: i64,
    /// Unix timestamp when the run reached a terminal status
    pub finished_at: Option<i64>,
}

impl From<RunRow> for RunRecord {
    fn from(row: RunRow) -> Self {
        RunRecord {
            id: RunId(row.id),
            document_id: DocumentId(row.document_id),
            kind: TaskKind::parse(&row.kind).unwrap_or(TaskKind::Recognition),
            status: RunStatus::from_i32(row.status),
            total_items: row.total_items as usize,
            force_reprocess: row.force_reprocess != 0,
            instruction: row.instruction,
            started_at: timestamp(row.started_at),
            finished_at: row.finished_at.map(timestamp),
        }
    }
}

/// Run item record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct RunItemRow {
    /// Page number
    pub page: i64,
    /// Outcome ("processed", "cached", "failed", "cancelled")
    pub outcome: String,
    /// Source ("provider" or "cache")
    pub source: String,
    /// Processing time in milliseconds
    pub duration_ms: i64,
    /// Error message for failed pages
    pub error: Option<String>,
}

impl From<RunItemRow> for RunItem {
    fn from(row: RunItemRow) -> Self {
        RunItem {
            page: PageId(row.page as u32),
            outcome: ItemOutcome::parse(&row.outcome),
            source: ItemSource::parse(&row.source),
            duration: Duration::from_millis(row.duration_ms.max(0) as u64),
            error: row.error,
        }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Database handle for ocr-batch
pub struct Database {
    pool: SqlitePool,
}
