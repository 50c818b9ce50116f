//! Deduplication, minimum-length policy and persistence of finalized outcomes.

use crate::error::{ErrorStatus, StorageError};
use crate::models::{ArticleMetadata, ArticleRecord};
use crate::orchestrator::FinalizedOutcome;
use crate::storage::Storage;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Minimum content sizes, in characters, for a successful fetch to be kept
/// as a success. Zero disables a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPolicy {
    pub min_html_length: usize,
    pub min_text_length: usize,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            min_html_length: 10_000,
            min_text_length: 465,
        }
    }
}

impl ContentPolicy {
    /// Downgrade status for apparently successful content, if it is too short.
    pub fn check(&self, html: &str, text: &str) -> Option<(ErrorStatus, String)> {
        let html_len = html.chars().count();
        if self.min_html_length > 0 && html_len < self.min_html_length {
            return Some((
                ErrorStatus::HtmlTooShort,
                format!("HTML content too short: {html_len} < {} chars", self.min_html_length),
            ));
        }
        let text_len = text.chars().count();
        if self.min_text_length > 0 && text_len < self.min_text_length {
            return Some((
                ErrorStatus::TextTooShort,
                format!("Text content too short: {text_len} < {} chars", self.min_text_length),
            ));
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Stored(Box<ArticleRecord>),
    /// A record with the same `(url_domain, title)` already exists.
    DuplicateSkipped,
}

pub struct DedupAndPersist {
    storage: Arc<dyn Storage>,
    policy: ContentPolicy,
}

impl DedupAndPersist {
    /// # Arguments
    /// * `storage` - Where records are looked up and inserted.
    /// * `policy` - Minimum content lengths for a success to stay a success.
    pub fn new(storage: Arc<dyn Storage>, policy: ContentPolicy) -> Self {
        Self { storage, policy }
    }

    /// Persist `outcome` under `run_id` unless its dedup key is already taken.
    ///
    /// Successful outcomes whose content is shorter than the [`ContentPolicy`]
    /// minimums are stored with `HTML_TOO_SHORT` or `TEXT_TOO_SHORT`; an error
    /// status set earlier is never overwritten.
    ///
    /// # Arguments
    /// * `outcome` - Terminal state of one fetched candidate.
    /// * `run_id` - Id of the run the record belongs to.
    ///
    /// # Returns
    /// `Stored` with the assigned id, or `DuplicateSkipped` when the
    /// `(url_domain, title)` key exists, including when a concurrent insert
    /// won the race. Any other storage failure is returned as an error.
    #[instrument(
        level = "info",
        skip_all,
        fields(url = %outcome.candidate.url, run_id = run_id)
    )]
    pub async fn persist(
        &self,
        outcome: FinalizedOutcome,
        run_id: u64,
    ) -> Result<PersistOutcome, StorageError> {
        let domain = &outcome.candidate.url_domain;
        let title = &outcome.candidate.title;
        if let Some(existing) = self
            .storage
            .find_article_by_domain_and_title(domain, title)
            .await?
        {
            info!(
                existing_id = existing.id,
                existing_run = existing.run_id,
                "Duplicate article skipped"
            );
            return Ok(PersistOutcome::DuplicateSkipped);
        }

        let mut record = into_record(outcome, run_id);
        if record.error_status.is_none() {
            let short = self
                .policy
                .check(&record.html_content, &record.text_content);
            if let Some((status, message)) = short {
                warn!(error_status = %status, %message, "Downgrading short content");
                record.error_status = Some(status);
                record.error_message = Some(message);
            }
        }

        match self.storage.add_article(record).await {
            Ok(stored) => {
                debug!(id = stored.id, error_status = ?stored.error_status, "Article stored");
                Ok(PersistOutcome::Stored(Box::new(stored)))
            }
            Err(StorageError::Duplicate { domain, title }) => {
                info!(%domain, %title, "Duplicate article inserted concurrently; skipped");
                Ok(PersistOutcome::DuplicateSkipped)
            }
            Err(e) => Err(e),
        }
    }
}

fn into_record(outcome: FinalizedOutcome, run_id: u64) -> ArticleRecord {
    let FinalizedOutcome {
        candidate,
        html,
        text,
        error_status,
        error_message,
        metadata,
    } = outcome;
    ArticleRecord {
        id: 0,
        title: candidate.title,
        url: candidate.url,
        source_url: candidate.source_feed_url,
        url_domain: candidate.url_domain,
        published_date: candidate.published_date,
        html_content: html,
        text_content: text,
        author: candidate.author,
        article_metadata: ArticleMetadata {
            summary: candidate.summary,
            tags: candidate.tags,
        },
        ingestion_metadata: metadata,
        error_status,
        error_message,
        run_id,
        ingested_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArticleCandidate, AttemptOutcome, FetchAttempt, IngestionMetadata};
    use crate::storage::{MemoryStorage, SqliteStorage};

    fn outcome(
        title: &str,
        html: &str,
        text: &str,
        error: Option<ErrorStatus>,
    ) -> FinalizedOutcome {
        FinalizedOutcome {
            candidate: ArticleCandidate {
                title: title.to_string(),
                url: format!("https://news.example.com/{title}"),
                published_date: None,
                author: Some("Jane Doe".to_string()),
                summary: Some("A summary".to_string()),
                tags: vec!["world".to_string()],
                url_domain: "news.example.com".to_string(),
                source_feed_url: "https://news.example.com/rss".to_string(),
            },
            html: html.to_string(),
            text: text.to_string(),
            error_status: error,
            error_message: error.map(|e| e.to_string()),
            metadata: IngestionMetadata {
                scraper_name: "browser_rss".to_string(),
                ..IngestionMetadata::default()
            },
        }
    }

    fn relaxed() -> ContentPolicy {
        ContentPolicy {
            min_html_length: 0,
            min_text_length: 0,
        }
    }

    #[tokio::test]
    async fn test_persist_twice_stores_once() {
        let storage = Arc::new(MemoryStorage::new());
        let persist = DedupAndPersist::new(storage.clone(), relaxed());

        let first = persist
            .persist(outcome("same", "<p>x</p>", "x", None), 1)
            .await
            .unwrap();
        let second = persist
            .persist(outcome("same", "<p>y</p>", "y", None), 2)
            .await
            .unwrap();

        let PersistOutcome::Stored(record) = first else {
            panic!("first persist should store");
        };
        assert_eq!(record.run_id, 1);
        assert_eq!(record.author.as_deref(), Some("Jane Doe"));
        assert_eq!(record.article_metadata.tags, vec!["world"]);
        assert_eq!(second, PersistOutcome::DuplicateSkipped);
        assert_eq!(storage.count_articles_for_run(1).await.unwrap(), 1);
        assert_eq!(storage.count_articles_for_run(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_short_content_is_downgraded_but_kept() {
        let storage = Arc::new(MemoryStorage::new());
        let persist = DedupAndPersist::new(storage.clone(), ContentPolicy::default());

        let result = persist
            .persist(outcome("short", "<p>tiny</p>", "tiny", None), 1)
            .await
            .unwrap();
        let PersistOutcome::Stored(record) = result else {
            panic!("short content should still be stored");
        };
        assert_eq!(record.error_status, Some(ErrorStatus::HtmlTooShort));
        assert_eq!(record.html_content, "<p>tiny</p>");
        assert_eq!(storage.count_errors_for_run(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_existing_error_is_not_overwritten() {
        let storage = Arc::new(MemoryStorage::new());
        let persist = DedupAndPersist::new(storage, ContentPolicy::default());
        let result = persist
            .persist(outcome("gone", "", "", Some(ErrorStatus::HttpStatus(404))), 1)
            .await
            .unwrap();
        let PersistOutcome::Stored(record) = result else {
            panic!("error outcome should be stored");
        };
        assert_eq!(record.error_status, Some(ErrorStatus::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_sqlite_store_keeps_attempt_diagnostics() {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let persist = DedupAndPersist::new(storage.clone(), relaxed());

        let mut failed = outcome("flaky", "", "", Some(ErrorStatus::HttpStatus(503)));
        failed.metadata.attempts = 3;
        failed.metadata.earlier_errors = vec![ErrorStatus::Timeout, ErrorStatus::HttpStatus(503)];
        failed.metadata.last_attempt = Some(FetchAttempt {
            attempt_number: 3,
            outcome: AttemptOutcome::Failed {
                error_status: ErrorStatus::HttpStatus(503),
            },
            error_message: Some("HTTP status 503".to_string()),
        });
        let expected = failed.metadata.clone();

        let PersistOutcome::Stored(stored) = persist.persist(failed, 7).await.unwrap() else {
            panic!("failed outcome should be stored");
        };
        let again = persist
            .persist(outcome("flaky", "<p>x</p>", "x", None), 8)
            .await
            .unwrap();
        assert_eq!(again, PersistOutcome::DuplicateSkipped);

        let rows = storage.list_articles_for_run(7).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, stored.id);
        assert_eq!(rows[0].ingestion_metadata, expected);
        assert_eq!(storage.count_errors_for_run(7).await.unwrap(), 1);
    }

    #[test]
    fn test_content_policy_order() {
        let policy = ContentPolicy {
            min_html_length: 20,
            min_text_length: 10,
        };
        let long_html = "x".repeat(25);
        assert_eq!(
            policy.check("short", "also short").map(|(s, _)| s),
            Some(ErrorStatus::HtmlTooShort)
        );
        assert_eq!(
            policy.check(&long_html, "short").map(|(s, _)| s),
            Some(ErrorStatus::TextTooShort)
        );
        assert_eq!(policy.check(&long_html, "long enough text"), None);
        assert_eq!(relaxed().check("", ""), None);
    }
}
