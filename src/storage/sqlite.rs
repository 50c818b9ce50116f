//! SQLite storage.
//!
//! Runs and articles live in two tables of one database file. The
//! `(url_domain, title)` dedup key is a unique index, so concurrent inserts
//! of the same article race in the database rather than in the pipeline: the
//! loser gets [`StorageError::Duplicate`].

use super::Storage;
use crate::error::{ErrorStatus, StorageError};
use crate::models::{ArticleRecord, IngestionRun, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, instrument};

const RUN_COLUMNS: &str =
    "id, start_time, end_time, status, num_processed, num_errors, parameters";
const ARTICLE_COLUMNS: &str = "id, title, url, source_url, url_domain, published_date, \
     html_content, text_content, author, article_metadata, ingestion_metadata, error_status, \
     error_message, run_id, ingested_at";

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database file at `path` and apply the schema.
    ///
    /// # Arguments
    /// * `path` - Database file. Its parent directory must already exist.
    ///
    /// # Returns
    /// A pooled store in WAL mode, or the connection/migration error.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        let (runs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ingestion_runs")
            .fetch_one(&store.pool)
            .await?;
        info!(runs, "Opened storage");
        Ok(store)
    }

    /// Ephemeral database. A single connection that never expires, since
    /// every new in-memory connection starts with an empty database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ingestion_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT NOT NULL,
                num_processed INTEGER NOT NULL DEFAULT 0,
                num_errors INTEGER NOT NULL DEFAULT 0,
                parameters TEXT NOT NULL DEFAULT 'null'
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                source_url TEXT NOT NULL,
                url_domain TEXT NOT NULL,
                published_date TEXT,
                html_content TEXT NOT NULL,
                text_content TEXT NOT NULL,
                author TEXT,
                article_metadata TEXT NOT NULL DEFAULT '{}',
                ingestion_metadata TEXT NOT NULL DEFAULT '{}',
                error_status TEXT,
                error_message TEXT,
                run_id INTEGER NOT NULL,
                ingested_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_articles_domain_title
                ON articles(url_domain, title);
            CREATE INDEX IF NOT EXISTS idx_articles_run_id ON articles(run_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_time(table: &'static str, value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            table,
            message: format!("invalid date {value:?}: {e}"),
        })
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: i64,
    start_time: String,
    end_time: Option<String>,
    status: String,
    num_processed: i64,
    num_errors: i64,
    parameters: String,
}

impl RunRow {
    fn into_run(self) -> Result<IngestionRun, StorageError> {
        let status = RunStatus::from_str(&self.status)
            .map_err(|message| StorageError::Corrupt {
                table: "ingestion_runs",
                message,
            })?;
        Ok(IngestionRun {
            id: self.id as u64,
            start_time: parse_time("ingestion_runs", &self.start_time)?,
            end_time: self
                .end_time
                .as_deref()
                .map(|t| parse_time("ingestion_runs", t))
                .transpose()?,
            status,
            num_processed: self.num_processed as u64,
            num_errors: self.num_errors as u64,
            parameters: serde_json::from_str(&self.parameters)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ArticleRow {
    id: i64,
    title: String,
    url: String,
    source_url: String,
    url_domain: String,
    published_date: Option<String>,
    html_content: String,
    text_content: String,
    author: Option<String>,
    article_metadata: String,
    ingestion_metadata: String,
    error_status: Option<String>,
    error_message: Option<String>,
    run_id: i64,
    ingested_at: String,
}

impl ArticleRow {
    fn into_record(self) -> Result<ArticleRecord, StorageError> {
        let error_status = self
            .error_status
            .as_deref()
            .map(ErrorStatus::from_str)
            .transpose()
            .map_err(|message| StorageError::Corrupt {
                table: "articles",
                message,
            })?;
        Ok(ArticleRecord {
            id: self.id as u64,
            title: self.title,
            url: self.url,
            source_url: self.source_url,
            url_domain: self.url_domain,
            published_date: self
                .published_date
                .as_deref()
                .map(|t| parse_time("articles", t))
                .transpose()?,
            html_content: self.html_content,
            text_content: self.text_content,
            author: self.author,
            article_metadata: serde_json::from_str(&self.article_metadata)?,
            ingestion_metadata: serde_json::from_str(&self.ingestion_metadata)?,
            error_status,
            error_message: self.error_message,
            run_id: self.run_id as u64,
            ingested_at: parse_time("articles", &self.ingested_at)?,
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn add_run(&self, mut run: IngestionRun) -> Result<IngestionRun, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ingestion_runs
                (start_time, end_time, status, num_processed, num_errors, parameters)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.start_time.to_rfc3339())
        .bind(run.end_time.map(|t| t.to_rfc3339()))
        .bind(run.status.to_string())
        .bind(run.num_processed as i64)
        .bind(run.num_errors as i64)
        .bind(serde_json::to_string(&run.parameters)?)
        .execute(&self.pool)
        .await?;
        run.id = result.last_insert_rowid() as u64;
        Ok(run)
    }

    async fn update_run(&self, run: &IngestionRun) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET start_time = ?, end_time = ?, status = ?, num_processed = ?, num_errors = ?,
                parameters = ?
            WHERE id = ?
            "#,
        )
        .bind(run.start_time.to_rfc3339())
        .bind(run.end_time.map(|t| t.to_rfc3339()))
        .bind(run.status.to_string())
        .bind(run.num_processed as i64)
        .bind(run.num_errors as i64)
        .bind(serde_json::to_string(&run.parameters)?)
        .bind(run.id as i64)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::RunNotFound(run.id));
        }
        Ok(())
    }

    async fn find_article_by_domain_and_title(
        &self,
        domain: &str,
        title: &str,
    ) -> Result<Option<ArticleRecord>, StorageError> {
        let sql =
            format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url_domain = ? AND title = ?");
        sqlx::query_as::<_, ArticleRow>(&sql)
            .bind(domain)
            .bind(title)
            .fetch_optional(&self.pool)
            .await?
            .map(ArticleRow::into_record)
            .transpose()
    }

    async fn add_article(&self, mut record: ArticleRecord) -> Result<ArticleRecord, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO articles (
                title, url, source_url, url_domain, published_date, html_content, text_content,
                author, article_metadata, ingestion_metadata, error_status, error_message,
                run_id, ingested_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.title)
        .bind(&record.url)
        .bind(&record.source_url)
        .bind(&record.url_domain)
        .bind(record.published_date.map(|t| t.to_rfc3339()))
        .bind(&record.html_content)
        .bind(&record.text_content)
        .bind(&record.author)
        .bind(serde_json::to_string(&record.article_metadata)?)
        .bind(serde_json::to_string(&record.ingestion_metadata)?)
        .bind(record.error_status.map(|s| s.to_string()))
        .bind(&record.error_message)
        .bind(record.run_id as i64)
        .bind(record.ingested_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                record.id = done.last_insert_rowid() as u64;
                Ok(record)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::Duplicate {
                    domain: record.url_domain,
                    title: record.title,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn count_articles_for_run(&self, run_id: u64) -> Result<u64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE run_id = ?")
            .bind(run_id as i64)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_errors_for_run(&self, run_id: u64) -> Result<u64, StorageError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM articles WHERE run_id = ? AND error_status IS NOT NULL",
        )
        .bind(run_id as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn get_run(&self, run_id: u64) -> Result<Option<IngestionRun>, StorageError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM ingestion_runs WHERE id = ?");
        sqlx::query_as::<_, RunRow>(&sql)
            .bind(run_id as i64)
            .fetch_optional(&self.pool)
            .await?
            .map(RunRow::into_run)
            .transpose()
    }

    async fn list_articles_for_run(&self, run_id: u64) -> Result<Vec<ArticleRecord>, StorageError> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE run_id = ? ORDER BY id");
        sqlx::query_as::<_, ArticleRow>(&sql)
            .bind(run_id as i64)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ArticleRow::into_record)
            .collect()
    }

    async fn list_runs(&self) -> Result<Vec<IngestionRun>, StorageError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM ingestion_runs ORDER BY id");
        sqlx::query_as::<_, RunRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(RunRow::into_run)
            .collect()
    }
}
