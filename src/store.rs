//! # Upload Metadata Store
//!
//! Every finalized recording gets exactly one row in `uploads`. Rows are
//! written once and never updated or deleted by the recording pipeline.

use crate::config::DatabaseConfig;
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Row to insert for one finalized session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUploadRecord {
    pub cid: String,
    pub filename: String,
    pub user_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub interrupted: bool,
    pub uploaded_at: DateTime<Utc>,
}

/// A persisted upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub id: i64,
    pub cid: String,
    pub filename: Option<String>,
    pub user_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub interrupted: bool,
    pub uploaded_at: String,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert one upload record and return its row id.
    async fn insert_upload_record(&self, record: &NewUploadRecord) -> AppResult<i64>;

    /// Most recently inserted upload, if any.
    async fn latest_upload(&self) -> AppResult<Option<UploadRecord>>;

    async fn health_check(&self) -> AppResult<()>;
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS uploads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cid TEXT NOT NULL,
    filename TEXT,
    user_id INTEGER,
    conversation_id INTEGER,
    interrupted INTEGER NOT NULL DEFAULT 0,
    uploaded_at TEXT NOT NULL
)
"#;

/// SQLite-backed store on a shared sqlx pool.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Every connection to `sqlite::memory:` is its own database
        let max_connections = if config.url.contains(":memory:") { 1 } else { config.max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url = %config.url, "Connected to upload metadata store");
        Ok(store)
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn insert_upload_record(&self, record: &NewUploadRecord) -> AppResult<i64> {
        let result = sqlx::query(
            "INSERT INTO uploads (cid, filename, user_id, conversation_id, interrupted, uploaded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&record.cid)
        .bind(&record.filename)
        .bind(record.user_id)
        .bind(record.conversation_id)
        .bind(record.interrupted)
        .bind(record.uploaded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn latest_upload(&self) -> AppResult<Option<UploadRecord>> {
        let row = sqlx::query(
            "SELECT id, cid, filename, user_id, conversation_id, interrupted, uploaded_at \
             FROM uploads ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let record = match row {
            Some(row) => Some(UploadRecord {
                id: row.try_get("id")?,
                cid: row.try_get("cid")?,
                filename: row.try_get("filename")?,
                user_id: row.try_get("user_id")?,
                conversation_id: row.try_get("conversation_id")?,
                interrupted: row.try_get("interrupted")?,
                uploaded_at: row.try_get("uploaded_at")?,
            }),
            None => None,
        };
        Ok(record)
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
