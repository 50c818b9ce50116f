use super::{Database, Storage};
use crate::error::StorageError;
use crate::models::{ArticleRecord, IngestionRun};
use async_trait::async_trait;
use std::sync::Mutex;

/// In-process storage. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    db: Mutex<Database>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_db<T>(&self, f: impl FnOnce(&mut Database) -> T) -> T {
        let mut db = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut db)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn add_run(&self, run: IngestionRun) -> Result<IngestionRun, StorageError> {
        Ok(self.with_db(|db| db.add_run(run)))
    }

    async fn update_run(&self, run: &IngestionRun) -> Result<(), StorageError> {
        self.with_db(|db| db.update_run(run))
    }

    async fn find_article_by_domain_and_title(
        &self,
        domain: &str,
        title: &str,
    ) -> Result<Option<ArticleRecord>, StorageError> {
        Ok(self.with_db(|db| db.find_article(domain, title).cloned()))
    }

    async fn add_article(&self, record: ArticleRecord) -> Result<ArticleRecord, StorageError> {
        self.with_db(|db| db.add_article(record))
    }

    async fn count_articles_for_run(&self, run_id: u64) -> Result<u64, StorageError> {
        Ok(self.with_db(|db| db.count_articles_for_run(run_id)))
    }

    async fn count_errors_for_run(&self, run_id: u64) -> Result<u64, StorageError> {
        Ok(self.with_db(|db| db.count_errors_for_run(run_id)))
    }

    async fn get_run(&self, run_id: u64) -> Result<Option<IngestionRun>, StorageError> {
        Ok(self.with_db(|db| db.get_run(run_id)))
    }

    async fn list_articles_for_run(&self, run_id: u64) -> Result<Vec<ArticleRecord>, StorageError> {
        Ok(self.with_db(|db| db.articles_for_run(run_id)))
    }

    async fn list_runs(&self) -> Result<Vec<IngestionRun>, StorageError> {
        Ok(self.with_db(|db| db.runs.clone()))
    }
}
