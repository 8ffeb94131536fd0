//! Cache-first short-circuit for a single page.

use std::sync::Arc;
use std::time::Duration;

use crate::document::{Document, PagePatch};
use crate::store::{CacheStore, HistoryStore};
use crate::types::{ItemOutcome, ItemSource, PageId, RunId, RunItem, TaskKind, WorkItem};

/// Looks up and writes the per-page cache for one batch
///
/// A page counts as cached for a batch only if the text field for that
/// batch's kind is present: a page with OCR text but no transformation is a
/// hit for recognition and a miss for transformation.
pub(crate) struct CacheGate {
    pub(crate) run_id: RunId,
    pub(crate) document: Arc<Document>,
    pub(crate) cache: Arc<dyn CacheStore>,
    pub(crate) history: Arc<dyn HistoryStore>,
}

impl CacheGate {
    /// Serve `item` from the cache if possible
    ///
    /// On a hit the cached text is applied to the document, a cache-sourced
    /// history item is appended, and true is returned; the caller must not
    /// invoke a provider. Forced items and lookup failures are misses.
    pub(crate) async fn try_serve(&self, item: &WorkItem) -> bool {
        if item.force_reprocess {
            return false;
        }

        let entry = match self.cache.get(self.document.id(), item.page).await {
            Ok(Some(entry)) if entry.text_for(item.kind).is_some() => entry,
            Ok(_) => return false,
            Err(e) => {
                tracing::warn!(page = %item.page, error = %e, "cache lookup failed, processing page");
                return false;
            }
        };

        tracing::debug!(run_id = %self.run_id, page = %item.page, "cache hit");
        self.document
            .apply(
                item.page,
                PagePatch::Cached {
                    ocr_text: entry.ocr_text,
                    transformed_text: entry.transformed_text,
                },
            )
            .await;
        self.record(RunItem {
            page: item.page,
            outcome: ItemOutcome::Cached,
            source: ItemSource::Cache,
            duration: Duration::ZERO,
            error: None,
        })
        .await;
        true
    }

    /// Write the page's current text to the cache, replacing any previous row
    pub(crate) async fn store(&self, page: PageId, kind: TaskKind) {
        let Some(entry) = self.document.cache_entry(page).await else {
            return;
        };
        if let Err(e) = self.cache.put(&entry).await {
            tracing::warn!(
                page = %page,
                kind = kind.as_str(),
                error = %e,
                "failed to persist page to cache"
            );
        }
    }

    /// Append a history item; failures are logged and otherwise ignored
    pub(crate) async fn record(&self, item: RunItem) {
        if let Err(e) = self.history.append_item(self.run_id, &item).await {
            tracing::warn!(
                run_id = %self.run_id,
                page = %item.page,
                error = %e,
                "failed to append history item"
            );
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{CacheEntry, DocumentId, NewRun};
    use chrono::Utc;

    async fn gate_with(store: Arc<MemoryStore>) -> CacheGate {
        let run_id = store
            .create_run(&NewRun {
                document_id: DocumentId::new("scan"),
                kind: TaskKind::Recognition,
                total_items: 2,
                force_reprocess: false,
                instruction: None,
            })
            .await
            .unwrap();
        CacheGate {
            run_id,
            document: Arc::new(Document::new(DocumentId::new("scan"), 2)),
            cache: store.clone(),
            history: store,
        }
    }

    fn item(page: u32, kind: TaskKind, force: bool) -> WorkItem {
        WorkItem {
            page: PageId(page),
            kind,
            force_reprocess: force,
        }
    }

    async fn seed(store: &MemoryStore, page: u32, ocr: Option<&str>, transformed: Option<&str>) {
        store
            .put(&CacheEntry {
                document_id: DocumentId::new("scan"),
                page: PageId(page),
                ocr_text: ocr.map(String::from),
                transformed_text: transformed.map(String::from),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn hit_applies_text_and_records_cache_source() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, Some("cached text"), None).await;
        let gate = gate_with(store.clone()).await;

        assert!(gate.try_serve(&item(1, TaskKind::Recognition, false)).await);

        let page = gate.document.page(PageId(1)).await.unwrap();
        assert_eq!(page.ocr_text.as_deref(), Some("cached text"));

        let items = store.items(gate.run_id).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, ItemSource::Cache);
        assert_eq!(items[0].duration, Duration::ZERO);
    }

    #[tokio::test]
    async fn force_reprocess_always_misses() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, Some("cached text"), None).await;
        let gate = gate_with(store.clone()).await;

        assert!(!gate.try_serve(&item(1, TaskKind::Recognition, true)).await);
        assert!(gate.document.page(PageId(1)).await.unwrap().ocr_text.is_none());
        assert!(store.items(gate.run_id).await.is_empty());
    }

    #[tokio::test]
    async fn hit_requires_field_for_batch_kind() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 2, Some("raw"), None).await;
        let gate = gate_with(store).await;

        assert!(!gate.try_serve(&item(2, TaskKind::Transform, false)).await);
        assert!(gate.try_serve(&item(2, TaskKind::Recognition, false)).await);
    }

    #[tokio::test]
    async fn store_overwrites_previous_row() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, Some("old"), Some("OLD")).await;
        let gate = gate_with(store.clone()).await;

        gate.document
            .apply(PageId(1), PagePatch::Recognized("new".to_string()))
            .await;
        gate.store(PageId(1), TaskKind::Recognition).await;

        let row = store
            .get(&DocumentId::new("scan"), PageId(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.ocr_text.as_deref(), Some("new"));
        assert_eq!(row.transformed_text, None);
    }
}
