//! Run history operations.

use crate::error::DatabaseError;
use crate::types::{DocumentId, NewRun, RunId, RunItem, RunRecord, RunStatus};
use crate::{Error, Result};

use super::{Database, RunItemRow, RunRow};

impl Database {
    /// Insert a run in the Running status
    pub async fn insert_run(&self, run: &NewRun) -> Result<RunId> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO runs (
                document_id, kind, status, total_items, force_reprocess,
                instruction, started_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.document_id.as_str())
        .bind(run.kind.as_str())
        .bind(RunStatus::Running.to_i32())
        .bind(run.total_items as i64)
        .bind(i32::from(run.force_reprocess))
        .bind(&run.instruction)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(RunId(result.last_insert_rowid()))
    }

    /// Append one page's outcome to a run
    pub async fn insert_run_item(&self, run_id: RunId, item: &RunItem) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO run_items (run_id, page, outcome, source, duration_ms, error, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id.0)
        .bind(i64::from(item.page.get()))
        .bind(item.outcome.as_str())
        .bind(item.source.as_str())
        .bind(item.duration.as_millis() as i64)
        .bind(&item.error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(())
    }

    /// Update a run's status
    ///
    /// Any status other than Running also sets `finished_at`.
    pub async fn set_run_status(&self, run_id: RunId, status: RunStatus) -> Result<()> {
        let finished_at = (status != RunStatus::Running).then(|| chrono::Utc::now().timestamp());
        let result = sqlx::query("UPDATE runs SET status = ?, finished_at = ? WHERE id = ?")
            .bind(status.to_i32())
            .bind(finished_at)
            .bind(run_id.0)
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "run {}",
                run_id
            ))));
        }

        Ok(())
    }

    /// Get a run by ID
    pub async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, document_id, kind, status, total_items, force_reprocess,
                   instruction, started_at, finished_at
            FROM runs
            WHERE id = ?
            "#,
        )
        .bind(run_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row.map(RunRecord::from))
    }

    /// List the runs of a document, most recent first
    pub async fn list_runs(&self, document_id: &DocumentId, limit: usize) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, document_id, kind, status, total_items, force_reprocess,
                   instruction, started_at, finished_at
            FROM runs
            WHERE document_id = ?
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(document_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(RunRecord::from).collect())
    }

    /// Items recorded for a run, in insertion order
    pub async fn list_run_items(&self, run_id: RunId) -> Result<Vec<RunItem>> {
        let rows = sqlx::query_as::<_, RunItemRow>(
            r#"
            SELECT page, outcome, source, duration_ms, error
            FROM run_items
            WHERE run_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(run_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(RunItem::from).collect())
    }

    /// Delete runs that finished before the given Unix timestamp
    ///
    /// Items are removed with their run. Returns the number of runs deleted.
    pub async fn delete_runs_before(&self, before_timestamp: i64) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM runs WHERE finished_at IS NOT NULL AND finished_at < ?")
                .bind(before_timestamp)
                .execute(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl crate::store::HistoryStore for Database {
    async fn create_run(&self, run: &NewRun) -> Result<RunId> {
        self.insert_run(run).await
    }

    async fn append_item(&self, run_id: RunId, item: &RunItem) -> Result<()> {
        self.insert_run_item(run_id, item).await
    }

    async fn update_run_status(&self, run_id: RunId, status: RunStatus) -> Result<()> {
        self.set_run_status(run_id, status).await
    }
}
