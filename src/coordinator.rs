//! Run lifecycle: create the run record, dispatch every feed, finalize.
//!
//! Feeds run concurrently (bounded by `feed_concurrency`), and so do the
//! candidates of each feed (bounded by `article_concurrency`). A global
//! `articles_limit` stops new fetches once reached; in-flight ones finish.
//!
//! Final counts always come from storage, never from in-memory tallies, and
//! the run record is finalized even if dispatch panics or storage fails.

use crate::error::{ErrorStatus, IngestError, StorageError};
use crate::feeds::{FeedReader, fetch_feed_document};
use crate::fetchers::{Scraper, ScraperRegistry};
use crate::models::{ArticleCandidate, FeedSource, IngestionRun, RunStatus};
use crate::orchestrator::{ArticleFetchOrchestrator, Disposition};
use crate::persist::{ContentPolicy, DedupAndPersist, PersistOutcome};
use crate::storage::Storage;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub articles_limit: Option<usize>,
    pub feed_concurrency: usize,
    pub article_concurrency: usize,
    pub feed_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            articles_limit: None,
            feed_concurrency: 4,
            article_concurrency: 8,
            feed_timeout: Duration::from_secs(30),
        }
    }
}

/// In-memory tallies for reporting. Not used for the run's final counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTally {
    pub feeds_total: u64,
    pub feeds_failed: u64,
    pub candidates: u64,
    pub fetched: u64,
    pub stored: u64,
    pub duplicates: u64,
    pub date_rejected: u64,
    pub skipped_by_limit: u64,
    /// Candidates left unfetched because a storage failure stopped the run.
    pub aborted: u64,
    pub error_statuses: BTreeMap<String, u64>,
    pub domains: BTreeMap<String, u64>,
    /// First fatal failure; once set no new fetch is started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
}

impl RunTally {
    fn merge(&mut self, other: RunTally) {
        self.feeds_total += other.feeds_total;
        self.feeds_failed += other.feeds_failed;
        self.candidates += other.candidates;
        self.fetched += other.fetched;
        self.stored += other.stored;
        self.duplicates += other.duplicates;
        self.date_rejected += other.date_rejected;
        self.skipped_by_limit += other.skipped_by_limit;
        self.aborted += other.aborted;
        for (status, n) in other.error_statuses {
            *self.error_statuses.entry(status).or_default() += n;
        }
        for (domain, n) in other.domains {
            *self.domains.entry(domain).or_default() += n;
        }
        if self.fatal.is_none() {
            self.fatal = other.fatal;
        }
    }

    fn record(&mut self, result: ArticleResult) {
        match result {
            ArticleResult::DateRejected => self.date_rejected += 1,
            ArticleResult::LimitReached => self.skipped_by_limit += 1,
            ArticleResult::Aborted => self.aborted += 1,
            ArticleResult::Duplicate => {
                self.fetched += 1;
                self.duplicates += 1;
            }
            ArticleResult::Stored { domain, error_status } => {
                self.fetched += 1;
                self.stored += 1;
                *self.domains.entry(domain).or_default() += 1;
                if let Some(status) = error_status {
                    *self.error_statuses.entry(status.to_string()).or_default() += 1;
                }
            }
            ArticleResult::Fatal(e) => {
                self.fetched += 1;
                if self.fatal.is_none() {
                    self.fatal = Some(e.to_string());
                }
            }
        }
    }
}

/// Finalized run record plus reporting tallies.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run: IngestionRun,
    #[serde(flatten)]
    pub tally: RunTally,
}

enum ArticleResult {
    DateRejected,
    LimitReached,
    Aborted,
    Duplicate,
    Stored {
        domain: String,
        error_status: Option<ErrorStatus>,
    },
    Fatal(StorageError),
}

/// Shared state of one run. The only cross-candidate mutable state.
struct RunState {
    run_id: u64,
    dispatched: AtomicUsize,
    aborted: AtomicBool,
}

pub struct IngestionRunCoordinator {
    storage: Arc<dyn Storage>,
    registry: ScraperRegistry,
    orchestrator: ArticleFetchOrchestrator,
    persist: DedupAndPersist,
    client: reqwest::Client,
    settings: CoordinatorSettings,
}

impl IngestionRunCoordinator {
    /// Wire the pipeline stages together.
    ///
    /// # Arguments
    /// * `storage` - Run and article store; also backs deduplication.
    /// * `registry` - Resolves each feed source to a scraper.
    /// * `orchestrator` - Per-candidate fetch, validation and extraction.
    /// * `content_policy` - Minimum lengths applied before storing.
    /// * `settings` - Concurrency bounds, article cap and feed timeout.
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: ScraperRegistry,
        orchestrator: ArticleFetchOrchestrator,
        content_policy: ContentPolicy,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            persist: DedupAndPersist::new(Arc::clone(&storage), content_policy),
            storage,
            registry,
            orchestrator,
            client: reqwest::Client::new(),
            settings,
        }
    }

    /// Execute one run over `sources`.
    ///
    /// # Arguments
    /// * `sources` - Feeds to read, each with its scraper kind and launch options.
    /// * `parameters` - Stored verbatim on the run record.
    ///
    /// # Returns
    /// The finalized run and its tallies. `Err` when the run could not be
    /// created or finalized, or when a storage failure aborted it; in the
    /// last case the run record has still been finalized as `failed`.
    #[instrument(level = "info", skip_all, fields(feeds = sources.len()))]
    pub async fn run(
        self: Arc<Self>,
        sources: Vec<FeedSource>,
        parameters: serde_json::Value,
    ) -> Result<RunSummary, IngestError> {
        let t0 = Instant::now();
        let run = self.storage.add_run(IngestionRun::started(parameters)).await?;
        info!(run_id = run.id, "Ingestion run started");

        let state = Arc::new(RunState {
            run_id: run.id,
            dispatched: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
        });

        let dispatch = {
            let this = Arc::clone(&self);
            let state = Arc::clone(&state);
            tokio::spawn(async move { this.dispatch(sources, &state).await })
        };
        let tally = match dispatch.await {
            Ok(tally) => tally,
            Err(e) => {
                error!(run_id = run.id, error = %e, "Dispatch task failed");
                RunTally {
                    fatal: Some(format!("dispatch task failed: {e}")),
                    ..RunTally::default()
                }
            }
        };

        let run = self.finalize(run, tally.fatal.is_some()).await?;
        info!(
            run_id = run.id,
            status = %run.status,
            num_processed = run.num_processed,
            num_errors = run.num_errors,
            stored = tally.stored,
            duplicates = tally.duplicates,
            date_rejected = tally.date_rejected,
            aborted = tally.aborted,
            feeds_failed = tally.feeds_failed,
            elapsed_ms = t0.elapsed().as_millis(),
            "Ingestion run finished"
        );

        match tally.fatal {
            Some(reason) => Err(IngestError::Aborted(reason)),
            None => Ok(RunSummary { run, tally }),
        }
    }

    async fn dispatch(&self, sources: Vec<FeedSource>, state: &RunState) -> RunTally {
        let mut tally = RunTally::default();
        let mut feeds = stream::iter(sources)
            .map(|source| async move { self.run_feed(source, state).await })
            .buffer_unordered(self.settings.feed_concurrency.max(1));
        while let Some(feed_tally) = feeds.next().await {
            tally.merge(feed_tally);
        }
        tally
    }

    #[instrument(level = "info", skip_all, fields(feed = %source.url, kind = %source.kind))]
    async fn run_feed(&self, source: FeedSource, state: &RunState) -> RunTally {
        let mut tally = RunTally {
            feeds_total: 1,
            ..RunTally::default()
        };

        let Some(scraper) = self.registry.scraper_for(&source) else {
            error!(launch = ?source.launch, "No fetch backend for this source");
            tally.feeds_failed = 1;
            return tally;
        };

        let timeout = self.settings.feed_timeout;
        let document = match fetch_feed_document(&self.client, &source.url, timeout).await {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "Skipping feed");
                tally.feeds_failed = 1;
                return tally;
            }
        };

        let feed_url = source.url.clone();
        let parsed =
            tokio::task::spawn_blocking(move || read_candidates(&document, &feed_url)).await;
        let (candidates, feed_error) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => (Vec::new(), Some(format!("feed parser failed: {e}"))),
        };
        if let Some(message) = &feed_error {
            warn!(
                error = %message,
                parsed = candidates.len(),
                "Feed aborted by parse error"
            );
            tally.feeds_failed = 1;
        }
        info!(candidates = candidates.len(), "Feed parsed");
        tally.candidates = candidates.len() as u64;

        let mut results = stream::iter(candidates)
            .map(|candidate| self.handle_candidate(candidate, &scraper, &source, state))
            .buffer_unordered(self.settings.article_concurrency.max(1));
        while let Some(result) = results.next().await {
            tally.record(result);
        }
        tally
    }

    async fn handle_candidate(
        &self,
        candidate: ArticleCandidate,
        scraper: &Scraper,
        source: &FeedSource,
        state: &RunState,
    ) -> ArticleResult {
        if state.aborted.load(Ordering::SeqCst) {
            return ArticleResult::Aborted;
        }
        if !self.orchestrator.admits(&candidate) {
            debug!(url = %candidate.url, "Candidate rejected by date threshold");
            return ArticleResult::DateRejected;
        }
        if !self.reserve_slot(state) {
            debug!(url = %candidate.url, "Articles limit reached; not fetching");
            return ArticleResult::LimitReached;
        }

        let disposition = self
            .orchestrator
            .process(candidate, scraper, &source.launch)
            .await;
        let outcome = match disposition {
            Disposition::DateRejected => return ArticleResult::DateRejected,
            Disposition::Finalized(outcome) => *outcome,
        };
        debug!(
            url = %outcome.candidate.url,
            success = outcome.is_success(),
            "Candidate finalized"
        );
        let domain = outcome.candidate.url_domain.clone();
        match self.persist.persist(outcome, state.run_id).await {
            Ok(PersistOutcome::Stored(record)) => ArticleResult::Stored {
                domain,
                error_status: record.error_status,
            },
            Ok(PersistOutcome::DuplicateSkipped) => ArticleResult::Duplicate,
            Err(e) => {
                error!(error = %e, "Storage failure; aborting run");
                state.aborted.store(true, Ordering::SeqCst);
                ArticleResult::Fatal(e)
            }
        }
    }

    fn reserve_slot(&self, state: &RunState) -> bool {
        match self.settings.articles_limit {
            None => true,
            Some(limit) => state
                .dispatched
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < limit).then_some(n + 1)
                })
                .is_ok(),
        }
    }

    /// Write end time, counts and final status.
    ///
    /// A failed count still finalizes the run as `failed`; a failed write of
    /// the run record is returned, since the run would otherwise stay
    /// `running` in storage.
    async fn finalize(
        &self,
        mut run: IngestionRun,
        aborted: bool,
    ) -> Result<IngestionRun, StorageError> {
        let counts = async {
            let processed = self.storage.count_articles_for_run(run.id).await?;
            let errors = self.storage.count_errors_for_run(run.id).await?;
            Ok::<_, StorageError>((processed, errors))
        }
        .await;

        run.end_time = Some(Utc::now());
        match counts {
            Ok((processed, errors)) => {
                run.num_processed = processed;
                run.num_errors = errors;
                run.status = if aborted {
                    RunStatus::Failed
                } else {
                    RunStatus::from_counts(processed, errors)
                };
            }
            Err(e) => {
                error!(run_id = run.id, error = %e, "Could not count run articles");
                run.status = RunStatus::Failed;
            }
        }
        if let Err(e) = self.storage.update_run(&run).await {
            error!(run_id = run.id, error = %e, "Could not finalize run record");
            return Err(e);
        }
        Ok(run)
    }
}

/// Drain a feed document into candidates; stops at the first feed error.
fn read_candidates(
    document: &str,
    feed_url: &str,
) -> (Vec<ArticleCandidate>, Option<String>) {
    let entries = match FeedReader::new().parse(document, feed_url) {
        Ok(entries) => entries,
        Err(e) => return (Vec::new(), Some(e.to_string())),
    };
    let mut candidates = Vec::new();
    for entry in entries {
        match entry {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => return (candidates, Some(e.to_string())),
        }
    }
    (candidates, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ReadableTextExtractor;
    use crate::fetchers::{BrowserProfile, PageFetcher};
    use crate::models::{ArticleRecord, LaunchOptions, ScraperKind};
    use crate::retry::RetryPolicy;
    use crate::storage::MemoryStorage;
    use crate::testing::{ScriptedFetcher, article_html, captcha_html};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::path::Path;

    /// Title, link and publication date of one feed entry.
    type Item<'a> = (&'a str, &'a str, &'a str);

    fn rss(items: &[Item<'_>]) -> String {
        let body: String = items
            .iter()
            .map(|(title, url, date)| {
                format!(
                    "<item><title>{title}</title><link>{url}</link>\
                     <pubDate>{date}</pubDate></item>\n"
                )
            })
            .collect();
        format!(
            "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>t</title>\
             {body}</channel></rss>"
        )
    }

    fn write_feed(dir: &Path, name: &str, body: &str) -> FeedSource {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        FeedSource {
            url: url::Url::from_file_path(&path).unwrap().to_string(),
            kind: ScraperKind::BrowserRss,
            launch: LaunchOptions::default(),
        }
    }

    fn coordinator(
        storage: Arc<dyn Storage>,
        fetcher: Arc<ScriptedFetcher>,
        threshold: Option<chrono::DateTime<Utc>>,
        articles_limit: Option<usize>,
    ) -> Arc<IngestionRunCoordinator> {
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::default()
        };
        let extractor = Arc::new(ReadableTextExtractor::new());
        let orchestrator = ArticleFetchOrchestrator::new(extractor, retry, threshold);
        Arc::new(IngestionRunCoordinator::new(
            storage,
            ScraperRegistry::with_fetcher(fetcher as Arc<dyn PageFetcher>),
            orchestrator,
            ContentPolicy::default(),
            CoordinatorSettings {
                articles_limit,
                ..CoordinatorSettings::default()
            },
        ))
    }

    const DATE: &str = "Mon, 15 Jan 2024 10:30:00 +0000";

    #[tokio::test]
    async fn test_partial_run_with_duplicate_and_404() {
        let dir = tempfile::tempdir().unwrap();
        let feed = write_feed(
            dir.path(),
            "feed.xml",
            &rss(&[
                ("One", "https://a.example/one", DATE),
                ("Two", "https://a.example/two", DATE),
                ("One", "https://a.example/one-again", DATE),
                ("Gone", "https://a.example/gone", DATE),
            ]),
        );
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .page("https://a.example/one", &article_html("One"))
                .page("https://a.example/two", &article_html("Two"))
                .page("https://a.example/one-again", &article_html("One"))
                .status("https://a.example/gone", 404),
        );
        let storage = Arc::new(MemoryStorage::new());
        let summary = coordinator(storage.clone(), fetcher, None, None)
            .run(vec![feed], serde_json::json!({"test": true}))
            .await
            .unwrap();

        assert_eq!(summary.run.num_processed, 3);
        assert_eq!(summary.run.num_errors, 1);
        assert_eq!(summary.run.status, RunStatus::Partial);
        assert!(summary.run.end_time.is_some());
        assert_eq!(summary.tally.duplicates, 1);
        assert_eq!(summary.tally.error_statuses.get("http_status_404"), Some(&1));
        assert_eq!(summary.tally.domains.get("a.example"), Some(&3));

        let persisted = storage.get_run(summary.run.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, RunStatus::Partial);
        assert_eq!(persisted.parameters, serde_json::json!({"test": true}));
    }

    #[tokio::test]
    async fn test_captcha_page_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let feed = write_feed(
            dir.path(),
            "feed.xml",
            &rss(&[("Walled", "https://b.example/walled", DATE)]),
        );
        let fetcher =
            Arc::new(ScriptedFetcher::new().page("https://b.example/walled", &captcha_html()));
        let storage = Arc::new(MemoryStorage::new());
        let summary = coordinator(storage.clone(), fetcher, None, None)
            .run(vec![feed], serde_json::Value::Null)
            .await
            .unwrap();

        let records: Vec<ArticleRecord> =
            storage.list_articles_for_run(summary.run.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_status, Some(ErrorStatus::CaptchaDetected));
        assert!(records[0].html_content.is_empty());
        assert!(records[0].text_content.is_empty());
        assert_eq!(summary.run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_all_candidates_date_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let feed = write_feed(
            dir.path(),
            "feed.xml",
            &rss(&[
                ("Old", "https://c.example/old", "Tue, 01 Jan 2019 00:00:00 GMT"),
                ("Older", "https://c.example/older", "2018-05-05"),
            ]),
        );
        let fetcher = Arc::new(ScriptedFetcher::new());
        let threshold = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let summary = coordinator(storage, Arc::clone(&fetcher), Some(threshold), None)
            .run(vec![feed], serde_json::Value::Null)
            .await
            .unwrap();

        assert!(fetcher.calls().is_empty());
        assert_eq!(summary.tally.date_rejected, 2);
        assert_eq!(summary.run.num_processed, 0);
        assert_eq!(summary.run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_articles_limit_caps_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<(String, String)> = (0..5)
            .map(|i| (format!("Story {i}"), format!("https://d.example/{i}")))
            .collect();
        let feed_items: Vec<Item<'_>> = items
            .iter()
            .map(|(title, url)| (title.as_str(), url.as_str(), DATE))
            .collect();
        let feed = write_feed(dir.path(), "feed.xml", &rss(&feed_items));
        let mut fetcher = ScriptedFetcher::new();
        for (title, url) in &items {
            fetcher = fetcher.page(url, &article_html(title));
        }
        let fetcher = Arc::new(fetcher);

        let storage = Arc::new(MemoryStorage::new());
        let summary = coordinator(storage, Arc::clone(&fetcher), None, Some(2))
            .run(vec![feed], serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(summary.run.num_processed, 2);
        assert_eq!(summary.tally.skipped_by_limit, 3);
        assert_eq!(summary.run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_bad_feeds_do_not_stop_the_run() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let broken = write_feed(dir.path(), "broken.xml", "<html><body>not a feed</body></html>");
        let good = write_feed(
            dir.path(),
            "good.xml",
            &rss(&[("Fine", "https://e.example/fine", DATE)]),
        );
        let unreachable = FeedSource {
            url: format!("{}/feed.xml", server.uri()),
            kind: ScraperKind::StealthBrowserRss,
            launch: LaunchOptions::default(),
        };
        let fetcher =
            Arc::new(ScriptedFetcher::new().page("https://e.example/fine", &article_html("Fine")));

        let summary = coordinator(Arc::new(MemoryStorage::new()), fetcher, None, None)
            .run(vec![broken, unreachable, good], serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(summary.tally.feeds_total, 3);
        assert_eq!(summary.tally.feeds_failed, 2);
        assert_eq!(summary.run.num_processed, 1);
        assert_eq!(summary.run.status, RunStatus::Completed);
    }

    /// Delegates to memory storage but can refuse article inserts or run
    /// updates.
    #[derive(Default)]
    struct BrokenDisk {
        inner: MemoryStorage,
        refuse_articles: bool,
        refuse_run_updates: bool,
    }

    #[async_trait]
    impl Storage for BrokenDisk {
        async fn add_run(&self, run: IngestionRun) -> Result<IngestionRun, StorageError> {
            self.inner.add_run(run).await
        }
        async fn update_run(&self, run: &IngestionRun) -> Result<(), StorageError> {
            if self.refuse_run_updates {
                return Err(StorageError::Sqlx(sqlx::Error::PoolTimedOut));
            }
            self.inner.update_run(run).await
        }
        async fn find_article_by_domain_and_title(
            &self,
            domain: &str,
            title: &str,
        ) -> Result<Option<ArticleRecord>, StorageError> {
            self.inner.find_article_by_domain_and_title(domain, title).await
        }
        async fn add_article(&self, record: ArticleRecord) -> Result<ArticleRecord, StorageError> {
            if self.refuse_articles {
                return Err(StorageError::Sqlx(sqlx::Error::PoolTimedOut));
            }
            self.inner.add_article(record).await
        }
        async fn count_articles_for_run(&self, run_id: u64) -> Result<u64, StorageError> {
            self.inner.count_articles_for_run(run_id).await
        }
        async fn count_errors_for_run(&self, run_id: u64) -> Result<u64, StorageError> {
            self.inner.count_errors_for_run(run_id).await
        }
        async fn get_run(&self, run_id: u64) -> Result<Option<IngestionRun>, StorageError> {
            self.inner.get_run(run_id).await
        }
        async fn list_articles_for_run(
            &self,
            run_id: u64,
        ) -> Result<Vec<ArticleRecord>, StorageError> {
            self.inner.list_articles_for_run(run_id).await
        }
        async fn list_runs(&self) -> Result<Vec<IngestionRun>, StorageError> {
            self.inner.list_runs().await
        }
    }

    #[tokio::test]
    async fn test_storage_failure_still_finalizes_run() {
        let dir = tempfile::tempdir().unwrap();
        let feed = write_feed(
            dir.path(),
            "feed.xml",
            &rss(&[("Doomed", "https://f.example/doomed", DATE)]),
        );
        let fetcher = Arc::new(
            ScriptedFetcher::new().page("https://f.example/doomed", &article_html("Doomed")),
        );
        let storage = Arc::new(BrokenDisk {
            refuse_articles: true,
            ..BrokenDisk::default()
        });

        let result = coordinator(storage.clone(), fetcher, None, None)
            .run(vec![feed], serde_json::Value::Null)
            .await;
        assert!(matches!(result, Err(IngestError::Aborted(_))));

        let runs = storage.list_runs().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].end_time.is_some());
    }

    #[tokio::test]
    async fn test_unwritable_run_record_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let feed = write_feed(
            dir.path(),
            "feed.xml",
            &rss(&[("Kept", "https://g.example/kept", DATE)]),
        );
        let fetcher =
            Arc::new(ScriptedFetcher::new().page("https://g.example/kept", &article_html("Kept")));
        let storage = Arc::new(BrokenDisk {
            refuse_run_updates: true,
            ..BrokenDisk::default()
        });

        let result = coordinator(storage.clone(), fetcher, None, None)
            .run(vec![feed], serde_json::Value::Null)
            .await;
        assert!(matches!(result, Err(IngestError::Storage(StorageError::Sqlx(_)))));

        let runs = storage.list_runs().await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Running);
        assert_eq!(storage.count_articles_for_run(runs[0].id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sources_use_their_own_browser_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut headed = write_feed(
            dir.path(),
            "headed.xml",
            &rss(&[("Seen", "https://h.example/seen", DATE)]),
        );
        headed.launch.headless = false;
        let mut sandboxed = write_feed(
            dir.path(),
            "sandboxed.xml",
            &rss(&[("Boxed", "https://h.example/boxed", DATE)]),
        );
        sandboxed.launch.headless = true;
        sandboxed.launch.launch_args = vec!["--no-sandbox".to_string()];

        let headed_backend =
            Arc::new(ScriptedFetcher::new().page("https://h.example/seen", &article_html("Seen")));
        let sandboxed_backend = Arc::new(
            ScriptedFetcher::new().page("https://h.example/boxed", &article_html("Boxed")),
        );
        let mut registry = ScraperRegistry::default();
        registry.register(BrowserProfile::from(&headed.launch), headed_backend.clone());
        registry.register(BrowserProfile::from(&sandboxed.launch), sandboxed_backend.clone());

        let orchestrator = ArticleFetchOrchestrator::new(
            Arc::new(ReadableTextExtractor::new()),
            RetryPolicy::default(),
            None,
        );
        let coordinator = Arc::new(IngestionRunCoordinator::new(
            Arc::new(MemoryStorage::new()),
            registry,
            orchestrator,
            ContentPolicy::default(),
            CoordinatorSettings::default(),
        ));
        let summary = coordinator
            .run(vec![headed, sandboxed], serde_json::Value::Null)
            .await
            .unwrap();

        assert_eq!(headed_backend.calls(), vec!["https://h.example/seen"]);
        assert_eq!(sandboxed_backend.calls(), vec!["https://h.example/boxed"]);
        assert_eq!(summary.run.num_processed, 2);
        assert_eq!(summary.run.status, RunStatus::Completed);
    }

    #[test]
    fn test_tally_keeps_aborted_apart_from_limit() {
        let mut tally = RunTally::default();
        tally.record(ArticleResult::LimitReached);
        tally.record(ArticleResult::Aborted);
        tally.record(ArticleResult::Aborted);

        let mut total = RunTally {
            aborted: 1,
            ..RunTally::default()
        };
        total.merge(tally);
        assert_eq!(total.skipped_by_limit, 1);
        assert_eq!(total.aborted, 3);
        assert_eq!(serde_json::to_value(&total).unwrap()["aborted"], 3);
    }

    #[test]
    fn test_read_candidates_stops_at_error() {
        let doc = "<rss><channel><item><title>A</title><link>https://x.example/a</link></item>\
                   <item><title>B";
        let (candidates, error) = read_candidates(doc, "https://x.example/rss");
        assert_eq!(candidates.len(), 1);
        assert!(error.is_some());
    }
}
