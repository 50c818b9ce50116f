//! Per-candidate fetch, validate and extract state machine.
//!
//! ```text
//! Candidate ─┬─> DateRejected                       (no fetch, no record)
//!            └─> Fetching ─┬─> FetchFailed ──────────> Finalized(error)
//!                          └─> Fetched ─┬─> ValidationFailed ─> Finalized(error)
//!                                       └─> Validated ─> Finalized(success | error)
//! ```
//!
//! Every candidate that reaches `Fetching` ends in exactly one
//! [`FinalizedOutcome`]. Failures are carried as [`ErrorStatus`] values and
//! never escape as Rust errors.

use crate::dates::passes_threshold;
use crate::error::{ErrorStatus, FetchError};
use crate::extract::TextExtractor;
use crate::fetchers::{FetchedPage, Scraper};
use crate::models::{
    ArticleCandidate, AttemptOutcome, FetchAttempt, IngestionMetadata, LaunchOptions,
};
use crate::retry::RetryPolicy;
use crate::utils::truncate_for_log;
use crate::validator::{ContentValidator, ValidationReport, detect_captcha};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Terminal state of one candidate.
#[derive(Debug, Clone)]
pub struct FinalizedOutcome {
    pub candidate: ArticleCandidate,
    pub html: String,
    pub text: String,
    pub error_status: Option<ErrorStatus>,
    pub error_message: Option<String>,
    pub metadata: IngestionMetadata,
}

impl FinalizedOutcome {
    pub fn is_success(&self) -> bool {
        self.error_status.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum Disposition {
    /// Older than the configured threshold (or undated while a threshold is set).
    DateRejected,
    Finalized(Box<FinalizedOutcome>),
}

/// Result of the blocking inspection of a fetched page.
struct Inspection {
    report: ValidationReport,
    captcha_selector: Option<&'static str>,
}

pub struct ArticleFetchOrchestrator {
    validator: ContentValidator,
    extractor: Arc<dyn TextExtractor>,
    retry: RetryPolicy,
    date_threshold: Option<DateTime<Utc>>,
}

impl ArticleFetchOrchestrator {
    /// # Arguments
    /// * `extractor` - Turns validated HTML into readable text.
    /// * `retry` - Global retry settings; each strategy derives its own policy.
    /// * `date_threshold` - Inclusive lower bound on publication dates, if any.
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        retry: RetryPolicy,
        date_threshold: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            validator: ContentValidator::new(),
            extractor,
            retry,
            date_threshold,
        }
    }

    /// Whether `candidate` passes the date threshold and may be fetched.
    pub fn admits(&self, candidate: &ArticleCandidate) -> bool {
        passes_threshold(candidate.published_date, self.date_threshold)
    }

    /// Drive one candidate to its terminal state.
    ///
    /// # Arguments
    /// * `candidate` - Feed entry to fetch.
    /// * `scraper` - Strategy and backend for the candidate's source.
    /// * `launch` - The source's launch options; `max_retries` overrides the
    ///   stealth attempt ceiling.
    ///
    /// # Returns
    /// `DateRejected` without any fetch, or a `Finalized` outcome that is
    /// either a success or carries an [`ErrorStatus`].
    #[instrument(
        level = "info",
        skip_all,
        fields(url = %candidate.url, scraper = scraper.name())
    )]
    pub async fn process(
        &self,
        candidate: ArticleCandidate,
        scraper: &Scraper,
        launch: &LaunchOptions,
    ) -> Disposition {
        if !self.admits(&candidate) {
            debug!(
                published = ?candidate.published_date,
                threshold = ?self.date_threshold,
                "Candidate rejected by date threshold"
            );
            return Disposition::DateRejected;
        }

        let policy = scraper.strategy.retry_policy(&self.retry, launch.max_retries);
        let strategy = scraper.strategy;
        let per_attempt_timeout = policy.per_attempt_timeout;
        let url = candidate.url.clone();

        let retried = policy
            .run(&url, |attempt| {
                let fetcher = Arc::clone(&scraper.fetcher);
                let url = url.clone();
                let options = strategy.options(per_attempt_timeout);
                async move {
                    debug!(%url, attempt, user_agent = %options.user_agent, "Fetching page");
                    fetcher.fetch(&url, &options).await
                }
            })
            .await;

        let mut outcome = FinalizedOutcome {
            candidate,
            html: String::new(),
            text: String::new(),
            error_status: None,
            error_message: None,
            metadata: IngestionMetadata {
                scraper_name: scraper.name().to_string(),
                attempts: retried.attempts,
                earlier_errors: retried.earlier_failures.iter().map(FetchError::status).collect(),
                ..IngestionMetadata::default()
            },
        };

        let page = match retried.result {
            Ok(page) => page,
            Err(err) => {
                let status = err.status();
                if let ErrorStatus::HttpStatus(code) = status {
                    outcome.metadata.http_status = Some(code);
                }
                warn!(
                    error_status = %status,
                    error = %err,
                    attempts = retried.attempts,
                    "Fetch failed"
                );
                outcome.metadata.last_attempt = Some(FetchAttempt {
                    attempt_number: retried.attempts,
                    outcome: AttemptOutcome::Failed {
                        error_status: status,
                    },
                    error_message: Some(err.to_string()),
                });
                outcome.error_status = Some(status);
                outcome.error_message = Some(err.to_string());
                return Disposition::Finalized(Box::new(outcome));
            }
        };

        let status = page.status;
        outcome.metadata.http_status = Some(status);
        self.finish_fetched(&mut outcome, page).await;
        outcome.metadata.last_attempt = Some(FetchAttempt {
            attempt_number: retried.attempts,
            outcome: AttemptOutcome::Fetched { status },
            error_message: outcome.error_message.clone(),
        });

        match &outcome.error_status {
            None => info!(text_chars = outcome.text.chars().count(), "Article scraped"),
            Some(status) => {
                let message = outcome.error_message.as_deref().unwrap_or_default();
                warn!(
                    error_status = %status,
                    message = %truncate_for_log(message, 300),
                    "Article finalized with error"
                )
            }
        }
        Disposition::Finalized(Box::new(outcome))
    }

    /// Validation, CAPTCHA detection and extraction for a successfully fetched
    /// page. The page body moves through the blocking tasks and ends up in
    /// `outcome.html` only on success.
    async fn finish_fetched(&self, outcome: &mut FinalizedOutcome, page: FetchedPage) {
        let FetchedPage { status, html } = page;

        let inspection = {
            let validator = self.validator;
            let url = outcome.candidate.url.clone();
            tokio::task::spawn_blocking(move || {
                let inspection = Inspection {
                    report: validator.validate(&html, &url, status),
                    captcha_selector: detect_captcha(&html),
                };
                (html, inspection)
            })
            .await
        };
        let (html, inspection) = match inspection {
            Ok(inspected) => inspected,
            Err(e) => {
                let message = format!("content inspection panicked: {e}");
                return fail(outcome, ErrorStatus::ParsingError, message);
            }
        };

        debug!(summary = %inspection.report.summary(), "Validated content");
        let valid = inspection.report.valid;
        let issues = inspection.report.issues.join("; ");
        outcome.metadata.validation = Some(inspection.report);

        if let Some(selector) = inspection.captcha_selector {
            outcome.metadata.captcha_detected = true;
            outcome.metadata.captcha_selector = Some(selector.to_string());
            let message = format!("CAPTCHA detected via selector {selector}");
            return fail(outcome, ErrorStatus::CaptchaDetected, message);
        }
        if !valid {
            return fail(outcome, ErrorStatus::ContentBlocked, issues);
        }

        let extracted = {
            let extractor = Arc::clone(&self.extractor);
            tokio::task::spawn_blocking(move || {
                let text = extractor.extract(&html);
                (html, text)
            })
            .await
        };
        let (html, text) = match extracted {
            Ok((html, Ok(text))) => (html, text),
            Ok((_, Err(e))) => return fail(outcome, ErrorStatus::ExtractionError, e.to_string()),
            Err(e) => {
                let message = format!("extractor panicked: {e}");
                return fail(outcome, ErrorStatus::ExtractionError, message);
            }
        };
        if text.trim().is_empty() {
            let message = format!("No text content extracted from {}", outcome.candidate.url);
            return fail(outcome, ErrorStatus::ParsingError, message);
        }

        outcome.html = html;
        outcome.text = text;
    }
}

fn fail(outcome: &mut FinalizedOutcome, status: ErrorStatus, message: String) {
    outcome.html.clear();
    outcome.text.clear();
    outcome.error_status = Some(status);
    outcome.error_message = Some(message);
}
