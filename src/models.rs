//! Data models for feed candidates, stored article records and ingestion runs.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`FeedSource`]: One configured feed and how to scrape it
//! - [`ArticleCandidate`]: A minimally parsed feed entry, not yet fetched
//! - [`FetchAttempt`]: One try at fetching a candidate's page
//! - [`ArticleRecord`]: The persisted result for a candidate
//! - [`IngestionRun`]: Bookkeeping for one invocation of the pipeline

use crate::error::ErrorStatus;
use crate::validator::ValidationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scraper variant tag, selected per source in the configuration.
///
/// The legacy tag names are accepted as aliases so older config files keep
/// loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScraperKind {
    /// Plain browser fetch with a fixed desktop profile and a single attempt.
    #[serde(alias = "playwright_rss_article_scraper")]
    BrowserRss,
    /// Fingerprint-spoofing fetch with randomized parameters and bounded retries.
    #[serde(alias = "stealth_playwright_rss_article_scraper")]
    StealthBrowserRss,
}

impl ScraperKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScraperKind::BrowserRss => "browser_rss",
            ScraperKind::StealthBrowserRss => "stealth_browser_rss",
        }
    }
}

impl fmt::Display for ScraperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser launch options carried by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub headless: bool,
    pub launch_args: Vec<String>,
    /// Overrides the global retry ceiling for this source.
    pub max_retries: Option<u32>,
}

/// A single configured feed. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub url: String,
    pub kind: ScraperKind,
    pub launch: LaunchOptions,
}

/// An article reference discovered in a feed, before any page is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleCandidate {
    pub title: String,
    pub url: String,
    /// `None` when the feed carried no date or none of the known formats matched.
    pub published_date: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub url_domain: String,
    pub source_feed_url: String,
}

/// How a single fetch attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Fetched { status: u16 },
    Failed { error_status: ErrorStatus },
}

/// Diagnostics for one try at retrieving a candidate's page. Page content is
/// not kept here; it lives on the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub attempt_number: u32,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Feed-provided metadata kept with the stored article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Diagnostics describing how the article was ingested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionMetadata {
    pub scraper_name: String,
    #[serde(default)]
    pub attempts: u32,
    /// Statuses of the failed attempts before the last one, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub earlier_errors: Vec<ErrorStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<FetchAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(default)]
    pub captcha_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha_selector: Option<String>,
}

/// The persisted result for one candidate.
///
/// Either the content is populated and `error_status` is `None`, or
/// `error_status` is set. Records downgraded by the minimum-length policy
/// keep their (short) content alongside the error status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    #[serde(default)]
    pub id: u64,
    pub title: String,
    pub url: String,
    pub source_url: String,
    pub url_domain: String,
    pub published_date: Option<DateTime<Utc>>,
    pub html_content: String,
    pub text_content: String,
    pub author: Option<String>,
    pub article_metadata: ArticleMetadata,
    pub ingestion_metadata: IngestionMetadata,
    pub error_status: Option<ErrorStatus>,
    pub error_message: Option<String>,
    pub run_id: u64,
    pub ingested_at: DateTime<Utc>,
}

impl ArticleRecord {
    pub fn is_error(&self) -> bool {
        self.error_status.is_some()
    }
}

/// Lifecycle status of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    /// Final status derived from the stored counts of a run.
    pub fn from_counts(num_processed: u64, num_errors: u64) -> Self {
        if num_processed == 0 {
            RunStatus::Failed
        } else if num_errors == 0 {
            RunStatus::Completed
        } else if num_errors < num_processed {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status {other:?}")),
        }
    }
}

/// One execution of the pipeline across all configured feeds.
///
/// Created with status `running` before any feed is dispatched and updated
/// exactly once more when the run is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    /// Assigned by storage in `add_run`.
    pub id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub num_processed: u64,
    pub num_errors: u64,
    pub parameters: serde_json::Value,
}

impl IngestionRun {
    pub fn started(parameters: serde_json::Value) -> Self {
        Self {
            id: 0,
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            num_processed: 0,
            num_errors: 0,
            parameters,
        }
    }
}

/// Extract the host (and port, if any) of a URL, e.g.
/// `"https://www.example.com/a"` -> `"www.example.com"`.
pub fn url_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed.host_str().map(|host| match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            })
        })
        .unwrap_or_default()
}
