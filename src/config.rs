//! YAML configuration for an ingestion run.
//!
//! Example:
//!
//! ```yaml
//! db_path: data/ingest.db
//! articles_limit: 200
//! date_threshold: "2024-01-01"
//! concurrency: { feeds: 4, articles: 8 }
//! retry: { max_attempts: 3, per_attempt_timeout_secs: 30 }
//! content_policy: { min_html_length: 10000, min_text_length: 465 }
//! browser: { enabled: true, headless: true }
//! scrapers:
//!   - type: stealth_browser_rss
//!     start_urls: [https://feeds.example.com/world.xml]
//!     max_retries: 4
//! ```
//!
//! The file is validated eagerly by [`IngestionConfig::load`], so a bad
//! scraper tag, an unparsable threshold or an empty source list fails before
//! any run is created.

use crate::dates::parse_date;
use crate::error::ConfigError;
use crate::models::{FeedSource, LaunchOptions, ScraperKind};
use crate::persist::ContentPolicy;
use crate::retry::{DEFAULT_RETRY_HTTP_CODES, RetryPolicy};
use crate::utils::normalize_start_url;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Global cap on candidates dispatched for fetching.
    #[serde(default)]
    pub articles_limit: Option<usize>,
    /// Candidates published before this instant are skipped.
    #[serde(default)]
    pub date_threshold: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub content_policy: ContentPolicy,
    #[serde(default)]
    pub browser: BrowserSettings,
    pub scrapers: Vec<ScraperConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub feeds: usize,
    pub articles: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            feeds: 4,
            articles: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub per_attempt_timeout_secs: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retry_http_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_timeout_secs: 30,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            retry_http_codes: DEFAULT_RETRY_HTTP_CODES.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub enabled: bool,
    pub headless: bool,
    pub launch_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            headless: true,
            launch_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(rename = "type")]
    pub kind: ScraperKind,
    pub start_urls: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub launch_args: Vec<String>,
    #[serde(default)]
    pub headless: Option<bool>,
}

fn default_db_path() -> String {
    "data/ingest.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl IngestionConfig {
    /// Read, parse, normalize and validate a configuration file.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: label.clone(),
            source,
        })?;
        Self::from_yaml_str(&body, &label)
    }

    pub fn from_yaml_str(body: &str, label: &str) -> Result<Self, ConfigError> {
        let mut config: IngestionConfig =
            serde_yaml::from_str(body).map_err(|source| ConfigError::Parse {
                path: label.to_string(),
                source,
            })?;
        config.normalize();
        config.validate()?;
        debug!(scrapers = config.scrapers.len(), "Configuration loaded");
        Ok(config)
    }

    fn normalize(&mut self) {
        for scraper in &mut self.scrapers {
            scraper.start_urls = scraper
                .start_urls
                .iter()
                .filter(|u| !u.trim().is_empty())
                .map(|u| normalize_start_url(u))
                .collect();
        }
    }

    /// Apply command-line overrides and re-validate.
    pub fn with_overrides(
        mut self,
        db_path: Option<String>,
        articles_limit: Option<usize>,
        date_threshold: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(db_path) = db_path {
            self.db_path = db_path;
        }
        if articles_limit.is_some() {
            self.articles_limit = articles_limit;
        }
        if date_threshold.is_some() {
            self.date_threshold = date_threshold;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.db_path.trim().is_empty() {
            return invalid("db_path must not be empty".to_string());
        }
        if self.articles_limit == Some(0) {
            return invalid("articles_limit must be at least 1 when set".to_string());
        }
        self.date_threshold_utc()?;
        if self.concurrency.feeds == 0 || self.concurrency.articles == 0 {
            return invalid(
                "concurrency.feeds and concurrency.articles must be at least 1".to_string(),
            );
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.per_attempt_timeout_secs == 0 {
            return invalid("retry.per_attempt_timeout_secs must be at least 1".to_string());
        }
        if !self.scrapers.iter().any(|s| s.enabled) {
            return invalid("at least one scraper must be enabled".to_string());
        }
        for (i, scraper) in self.scrapers.iter().enumerate().filter(|(_, s)| s.enabled) {
            if scraper.start_urls.is_empty() {
                return invalid(format!("scrapers[{i}] ({}) has no start_urls", scraper.kind));
            }
            if scraper.max_retries == Some(0) {
                return invalid(format!("scrapers[{i}].max_retries must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn date_threshold_utc(&self) -> Result<Option<DateTime<Utc>>, ConfigError> {
        match self.date_threshold.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_date(raw).map(Some).ok_or_else(|| {
                ConfigError::Invalid(format!("unparsable date_threshold {raw:?}"))
            }),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            per_attempt_timeout: Duration::from_secs(self.retry.per_attempt_timeout_secs),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            retry_http_codes: self.retry.retry_http_codes.clone(),
        }
    }

    /// One source per start URL of every enabled scraper.
    pub fn feed_sources(&self) -> Vec<FeedSource> {
        self.scrapers
            .iter()
            .filter(|s| s.enabled)
            .flat_map(|s| {
                let launch = LaunchOptions {
                    headless: s.headless.unwrap_or(self.browser.headless),
                    launch_args: self
                        .browser
                        .launch_args
                        .iter()
                        .chain(&s.launch_args)
                        .cloned()
                        .collect(),
                    max_retries: s.max_retries,
                };
                s.start_urls.iter().map(move |url| FeedSource {
                    url: url.clone(),
                    kind: s.kind,
                    launch: launch.clone(),
                })
            })
            .collect()
    }

    /// Effective configuration, recorded as the run parameters.
    pub fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
