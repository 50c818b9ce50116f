//! Persistence of ingestion runs and article records.
//!
//! The pipeline only talks to the [`Storage`] trait. Two backends are
//! provided:
//!
//! - [`SqliteStorage`]: the on-disk database used by the CLI
//! - [`MemoryStorage`]: process-local, used by tests and dry runs
//!
//! Both enforce the `(url_domain, title)` uniqueness constraint on insert.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use crate::models::{ArticleRecord, IngestionRun};
use async_trait::async_trait;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a run and return it with its assigned id.
    async fn add_run(&self, run: IngestionRun) -> Result<IngestionRun, StorageError>;
    async fn update_run(&self, run: &IngestionRun) -> Result<(), StorageError>;
    async fn find_article_by_domain_and_title(
        &self,
        domain: &str,
        title: &str,
    ) -> Result<Option<ArticleRecord>, StorageError>;
    /// Insert a record and return it with its assigned id. Fails with
    /// [`StorageError::Duplicate`] if the dedup key is already taken.
    async fn add_article(&self, record: ArticleRecord) -> Result<ArticleRecord, StorageError>;
    async fn count_articles_for_run(&self, run_id: u64) -> Result<u64, StorageError>;
    async fn count_errors_for_run(&self, run_id: u64) -> Result<u64, StorageError>;

    async fn get_run(&self, run_id: u64) -> Result<Option<IngestionRun>, StorageError>;
    async fn list_articles_for_run(&self, run_id: u64) -> Result<Vec<ArticleRecord>, StorageError>;
    async fn list_runs(&self) -> Result<Vec<IngestionRun>, StorageError>;
}

/// Table state behind [`MemoryStorage`].
#[derive(Debug, Clone, Default)]
pub struct Database {
    pub runs: Vec<IngestionRun>,
    pub articles: Vec<ArticleRecord>,
    next_run_id: u64,
    next_article_id: u64,
}

impl Database {
    pub fn add_run(&mut self, mut run: IngestionRun) -> IngestionRun {
        let highest = self.runs.iter().map(|r| r.id).max().unwrap_or(0);
        self.next_run_id = self.next_run_id.max(highest) + 1;
        run.id = self.next_run_id;
        self.runs.push(run.clone());
        run
    }

    pub fn update_run(&mut self, run: &IngestionRun) -> Result<(), StorageError> {
        let slot = self
            .runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or(StorageError::RunNotFound(run.id))?;
        *slot = run.clone();
        Ok(())
    }

    pub fn find_article(&self, domain: &str, title: &str) -> Option<&ArticleRecord> {
        self.articles
            .iter()
            .find(|a| a.url_domain == domain && a.title == title)
    }

    pub fn add_article(
        &mut self,
        mut record: ArticleRecord,
    ) -> Result<ArticleRecord, StorageError> {
        if self.find_article(&record.url_domain, &record.title).is_some() {
            return Err(StorageError::Duplicate {
                domain: record.url_domain,
                title: record.title,
            });
        }
        self.next_article_id =
            self.next_article_id.max(self.articles.iter().map(|a| a.id).max().unwrap_or(0)) + 1;
        record.id = self.next_article_id;
        self.articles.push(record.clone());
        Ok(record)
    }

    pub fn count_articles_for_run(&self, run_id: u64) -> u64 {
        self.articles.iter().filter(|a| a.run_id == run_id).count() as u64
    }

    pub fn count_errors_for_run(&self, run_id: u64) -> u64 {
        self.articles
            .iter()
            .filter(|a| a.run_id == run_id && a.is_error())
            .count() as u64
    }

    pub fn get_run(&self, run_id: u64) -> Option<IngestionRun> {
        self.runs.iter().find(|r| r.id == run_id).cloned()
    }

    pub fn articles_for_run(&self, run_id: u64) -> Vec<ArticleRecord> {
        self.articles
            .iter()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect()
    }
}
