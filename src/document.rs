//! In-memory page model shared between workers and external readers
//!
//! Each page is written by exactly one worker per batch, but the collection
//! itself is read concurrently (progress snapshots, the transform pipeline
//! reading recognized text), so it lives behind a `tokio::sync::RwLock`.

use crate::types::{CacheEntry, DocumentId, PageId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Text state of a single page
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// OCR output
    pub ocr_text: Option<String>,
    /// Output of the last text transformation
    pub transformed_text: Option<String>,
    /// Last error recorded for this page
    pub last_error: Option<String>,
}

/// Change applied to a page by a worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PagePatch {
    /// Fresh OCR text
    Recognized(String),
    /// Fresh transformation output
    Transformed(String),
    /// Text restored from the cache
    Cached {
        /// Cached OCR text, if any
        ocr_text: Option<String>,
        /// Cached transformation output, if any
        transformed_text: Option<String>,
    },
    /// Processing failed
    Failed(String),
}

/// A document whose pages are processed by the engine
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    pages: RwLock<BTreeMap<PageId, Page>>,
}

impl Document {
    /// Create a document with `page_count` empty pages numbered from 1
    pub fn new(id: DocumentId, page_count: u32) -> Self {
        let pages = (1..=page_count).map(|n| (PageId(n), Page::default())).collect();
        Self {
            id,
            pages: RwLock::new(pages),
        }
    }

    /// Document identifier
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Number of pages
    pub async fn page_count(&self) -> usize {
        self.pages.read().await.len()
    }

    /// Returns true if the page exists
    pub async fn contains(&self, page: PageId) -> bool {
        self.pages.read().await.contains_key(&page)
    }

    /// Copy of one page
    pub async fn page(&self, page: PageId) -> Option<Page> {
        self.pages.read().await.get(&page).cloned()
    }

    /// Copy of every page, in page order
    pub async fn snapshot(&self) -> Vec<(PageId, Page)> {
        self.pages
            .read()
            .await
            .iter()
            .map(|(id, page)| (*id, page.clone()))
            .collect()
    }

    /// Apply a worker patch to a page, creating the page if it is missing
    pub async fn apply(&self, page: PageId, patch: PagePatch) {
        let mut pages = self.pages.write().await;
        let entry = pages.entry(page).or_default();
        match patch {
            PagePatch::Recognized(text) => {
                // A transformation of different text is stale
                if entry.ocr_text.as_deref() != Some(text.as_str()) {
                    entry.transformed_text = None;
                }
                entry.ocr_text = Some(text);
                entry.last_error = None;
            }
            PagePatch::Transformed(text) => {
                entry.transformed_text = Some(text);
                entry.last_error = None;
            }
            PagePatch::Cached {
                ocr_text,
                transformed_text,
            } => {
                if ocr_text.is_some() {
                    entry.ocr_text = ocr_text;
                }
                if transformed_text.is_some() {
                    entry.transformed_text = transformed_text;
                }
                entry.last_error = None;
            }
            PagePatch::Failed(error) => {
                entry.last_error = Some(error);
            }
        }
    }

    /// Build the cache row for a page from its current text
    ///
    /// The row carries every text field, so writing it replaces the previous
    /// row wholesale.
    pub async fn cache_entry(&self, page: PageId) -> Option<CacheEntry> {
        let pages = self.pages.read().await;
        pages.get(&page).map(|p| CacheEntry {
            document_id: self.id.clone(),
            page,
            ocr_text: p.ocr_text.clone(),
            transformed_text: p.transformed_text.clone(),
            updated_at: Utc::now(),
        })
    }
}
