//! Database lifecycle and schema migrations.

use std::path::Path;
use std::str::FromStr;

use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

/// Newest schema version this build knows how to create
pub(crate) const SCHEMA_VERSION: i64 = 2;

fn connection_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::ConnectionFailed(format!("{context}: {e}")))
}

fn migration_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::MigrationFailed(format!("{context}: {e}")))
}

impl Database {
    /// Open (or create) the SQLite database at `path`
    ///
    /// Missing parent directories are created, WAL mode and foreign keys are
    /// enabled, and the schema is brought up to [`SCHEMA_VERSION`].
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| connection_failed("cannot create database directory", e))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| connection_failed("invalid database path", e))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| connection_failed("cannot open database", e))?;

        let db = Self { pool };
        db.run_migrations().await?;
        tracing::debug!(path = %path.display(), "page cache database ready");

        Ok(db)
    }

    /// Apply every migration newer than the recorded schema version
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| connection_failed("no connection available for migrations", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("cannot create schema_version", e))?;

        let applied: i64 = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(version) FROM schema_version",
        )
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "cannot read schema version: {e}"
            )))
        })?
        .flatten()
        .unwrap_or(0);

        if applied >= SCHEMA_VERSION {
            return Ok(());
        }
        if applied < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if applied < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Run `steps` inside a transaction, rolling back on failure
    async fn in_transaction<F>(conn: &mut SqliteConnection, version: i32, steps: F) -> Result<()>
    where
        F: for<'c> FnOnce(
            &'c mut SqliteConnection,
        ) -> futures::future::BoxFuture<'c, Result<()>>,
    {
        tracing::info!(version, "Applying database migration");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("Failed to begin transaction", e))?;

        let result = async {
            steps(&mut *conn).await?;
            Self::record_migration(conn, version).await
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        migration_failed(&format!("Failed to commit migration v{version}"), e)
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!(version, "Database migration complete");
        Ok(())
    }

    /// Migration v1: page cache and run history
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        Self::in_transaction(conn, 1, |conn| {
            Box::pin(async move {
                Self::create_page_cache_table(conn).await?;
                Self::create_runs_schema(conn).await?;
                Ok(())
            })
        })
        .await
    }

    /// Migration v2: record transform instructions and cache bypass on runs
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        Self::in_transaction(conn, 2, |conn| {
            Box::pin(async move {
                sqlx::query("ALTER TABLE runs ADD COLUMN force_reprocess INTEGER NOT NULL DEFAULT 0")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| migration_failed("Failed to add force_reprocess column", e))?;
                sqlx::query("ALTER TABLE runs ADD COLUMN instruction TEXT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| migration_failed("Failed to add instruction column", e))?;
                Ok(())
            })
        })
        .await
    }

    /// Create page_cache table
    async fn create_page_cache_table(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE page_cache (
                document_id TEXT NOT NULL,
                page INTEGER NOT NULL,
                ocr_text TEXT,
                transformed_text TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (document_id, page)
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("Failed to create page_cache table", e))?;

        Ok(())
    }

    /// Create runs and run_items tables and their indexes
    async fn create_runs_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                total_items INTEGER NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("Failed to create runs table", e))?;

        sqlx::query("CREATE INDEX idx_runs_document ON runs(document_id, started_at DESC)")
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("Failed to create index", e))?;

        sqlx::query(
            r#"
            CREATE TABLE run_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                page INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                source TEXT NOT NULL,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                recorded_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("Failed to create run_items table", e))?;

        sqlx::query("CREATE INDEX idx_run_items_run ON run_items(run_id)")
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("Failed to create index", e))?;

        Ok(())
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("cannot record schema version", e))?;

        Ok(())
    }

    /// Close every pooled connection, checkpointing the WAL
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Underlying connection pool, for ad-hoc queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
