//! Cache and history persistence seams
//!
//! The engine talks to storage only through [`CacheStore`] and
//! [`HistoryStore`]. [`crate::db::Database`] implements both on SQLite;
//! [`MemoryStore`] keeps everything in process.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{DatabaseError, Error, Result};
use crate::types::{CacheEntry, DocumentId, NewRun, PageId, RunId, RunItem, RunRecord, RunStatus};

/// Per-page cache of previously computed text
///
/// Writes are last-write-wins: `put` replaces the whole row for
/// `(document_id, page)` without any version check.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up the cached row for a page
    async fn get(&self, document_id: &DocumentId, page: PageId) -> Result<Option<CacheEntry>>;

    /// Insert or overwrite the cached row for a page
    async fn put(&self, entry: &CacheEntry) -> Result<()>;
}

/// Record of batch runs and their per-page outcomes
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create a run in the Running status and return its id
    async fn create_run(&self, run: &NewRun) -> Result<RunId>;

    /// Append one page's outcome to a run
    async fn append_item(&self, run_id: RunId, item: &RunItem) -> Result<()>;

    /// Set the status of a run; terminal statuses also stamp the finish time
    async fn update_run_status(&self, run_id: RunId, status: RunStatus) -> Result<()>;
}

/// In-process implementation of both stores
///
/// Nothing survives the process. Useful when embedding the engine without a
/// database file, and as a lightweight store in tests.
///
/// # Examples
///
/// ```
/// use ocr_batch::store::{CacheStore, MemoryStore};
/// use ocr_batch::{CacheEntry, DocumentId, PageId};
///
/// # #[tokio::main]
/// # async fn main() -> ocr_batch::Result<()> {
/// let store = MemoryStore::new();
/// let doc = DocumentId::new("scan-01");
///
/// assert!(store.get(&doc, PageId(1)).await?.is_none());
///
/// store
///     .put(&CacheEntry {
///         document_id: doc.clone(),
///         page: PageId(1),
///         ocr_text: Some("hello".into()),
///         transformed_text: None,
///         updated_at: chrono::Utc::now(),
///     })
///     .await?;
/// assert!(store.get(&doc, PageId(1)).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    cache: RwLock<HashMap<(DocumentId, PageId), CacheEntry>>,
    runs: RwLock<Vec<(RunRecord, Vec<RunItem>)>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// All runs, oldest first
    pub async fn runs(&self) -> Vec<RunRecord> {
        self.runs.read().await.iter().map(|(run, _)| run.clone()).collect()
    }

    /// Items recorded for a run, in append order
    pub async fn items(&self, run_id: RunId) -> Vec<RunItem> {
        self.runs
            .read()
            .await
            .iter()
            .find(|(run, _)| run.id == run_id)
            .map(|(_, items)| items.clone())
            .unwrap_or_default()
    }
}

fn run_not_found(run_id: RunId) -> Error {
    Error::Database(DatabaseError::NotFound(format!("run {run_id}")))
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, document_id: &DocumentId, page: PageId) -> Result<Option<CacheEntry>> {
        Ok(self
            .cache
            .read()
            .await
            .get(&(document_id.clone(), page))
            .cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.cache
            .write()
            .await
            .insert((entry.document_id.clone(), entry.page), entry.clone());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn create_run(&self, run: &NewRun) -> Result<RunId> {
        let mut runs = self.runs.write().await;
        let id = RunId(runs.len() as i64 + 1);
        runs.push((
            RunRecord {
                id,
                document_id: run.document_id.clone(),
                kind: run.kind,
                status: RunStatus::Running,
                total_items: run.total_items,
                force_reprocess: run.force_reprocess,
                instruction: run.instruction.clone(),
                started_at: Utc::now(),
                finished_at: None,
            },
            Vec::new(),
        ));
        Ok(id)
    }

    async fn append_item(&self, run_id: RunId, item: &RunItem) -> Result<()> {
        let mut runs = self.runs.write().await;
        let (_, items) = runs
            .iter_mut()
            .find(|(run, _)| run.id == run_id)
            .ok_or_else(|| run_not_found(run_id))?;
        items.push(item.clone());
        Ok(())
    }

    async fn update_run_status(&self, run_id: RunId, status: RunStatus) -> Result<()> {
        let mut runs = self.runs.write().await;
        let (run, _) = runs
            .iter_mut()
            .find(|(run, _)| run.id == run_id)
            .ok_or_else(|| run_not_found(run_id))?;
        run.status = status;
        if status != RunStatus::Running {
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}
