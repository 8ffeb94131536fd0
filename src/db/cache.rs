//! Page cache operations.

use crate::types::{CacheEntry, DocumentId, PageId};
use crate::{Error, Result};

use super::{CacheRow, Database};

impl Database {
    /// Get the cached row for a page
    pub async fn get_cache_entry(
        &self,
        document_id: &DocumentId,
        page: PageId,
    ) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT document_id, page, ocr_text, transformed_text, updated_at
            FROM page_cache
            WHERE document_id = ? AND page = ?
            "#,
        )
        .bind(document_id.as_str())
        .bind(i64::from(page.get()))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row.map(CacheEntry::from))
    }

    /// Insert or replace the cached row for a page
    ///
    /// Every column is overwritten, including text fields the new entry
    /// leaves empty.
    pub async fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO page_cache (document_id, page, ocr_text, transformed_text, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(document_id, page) DO UPDATE SET
                ocr_text = excluded.ocr_text,
                transformed_text = excluded.transformed_text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.document_id.as_str())
        .bind(i64::from(entry.page.get()))
        .bind(&entry.ocr_text)
        .bind(&entry.transformed_text)
        .bind(entry.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(())
    }

    /// Remove every cached page of a document
    ///
    /// Returns the number of rows deleted.
    pub async fn clear_document_cache(&self, document_id: &DocumentId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM page_cache WHERE document_id = ?")
            .bind(document_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl crate::store::CacheStore for Database {
    async fn get(&self, document_id: &DocumentId, page: PageId) -> Result<Option<CacheEntry>> {
        self.get_cache_entry(document_id, page).await
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.upsert_cache_entry(entry).await
    }
}
