//! Error types and the per-article error taxonomy.
//!
//! Two kinds of failure live here:
//!
//! - Rust errors ([`ConfigError`], [`FeedError`], [`FetchError`], [`ExtractError`],
//!   [`StorageError`], [`IngestError`]) that travel through `Result`s.
//! - [`ErrorStatus`], the terminal classification attached to a stored
//!   article record. Per-article failures are converted into an
//!   `ErrorStatus` at the orchestrator boundary and never escape as errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while loading or validating the YAML configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Feed-scoped errors. Any of these aborts the current feed only.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to download feed {url}: {message}")]
    Download { url: String, message: String },
    #[error("malformed feed {url}: {message}")]
    Malformed { url: String, message: String },
}

/// Typed failure returned by a [`crate::fetchers::PageFetcher`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("no response received for {url}")]
    NoResponse { url: String },
    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("navigation to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },
    #[error("connection error for {url}: {message}")]
    Connection { url: String, message: String },
}

impl FetchError {
    /// The record-level classification for this failure.
    pub fn status(&self) -> ErrorStatus {
        match self {
            FetchError::NoResponse { .. } => ErrorStatus::NoResponse,
            FetchError::HttpStatus { status, .. } => ErrorStatus::HttpStatus(*status),
            FetchError::Timeout { .. } => ErrorStatus::Timeout,
            FetchError::Connection { .. } => ErrorStatus::ConnectionError,
        }
    }
}

#[derive(Debug, Error)]
#[error("text extraction failed: {0}")]
pub struct ExtractError(pub String);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("article already stored for domain {domain:?} and title {title:?}")]
    Duplicate { domain: String, title: String },
    #[error("ingestion run {0} not found")]
    RunNotFound(u64),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}

/// Coordinator-level failures; these are the only ones that fail a whole run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("ingestion task aborted: {0}")]
    Aborted(String),
}

/// Terminal classification of an article record.
///
/// Serialized as the flat status string stored alongside the record,
/// e.g. `"http_status_404"` or `"captcha_detected"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ErrorStatus {
    NoResponse,
    HttpStatus(u16),
    Timeout,
    ConnectionError,
    ContentBlocked,
    CaptchaDetected,
    ExtractionError,
    ParsingError,
    HtmlTooShort,
    TextTooShort,
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStatus::NoResponse => f.write_str("no_response"),
            ErrorStatus::HttpStatus(code) => write!(f, "http_status_{code}"),
            ErrorStatus::Timeout => f.write_str("timeout"),
            ErrorStatus::ConnectionError => f.write_str("connection_error"),
            ErrorStatus::ContentBlocked => f.write_str("content_blocked"),
            ErrorStatus::CaptchaDetected => f.write_str("captcha_detected"),
            ErrorStatus::ExtractionError => f.write_str("extraction_error"),
            ErrorStatus::ParsingError => f.write_str("parsing_error"),
            ErrorStatus::HtmlTooShort => f.write_str("HTML_TOO_SHORT"),
            ErrorStatus::TextTooShort => f.write_str("TEXT_TOO_SHORT"),
        }
    }
}

impl FromStr for ErrorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "no_response" => ErrorStatus::NoResponse,
            "timeout" => ErrorStatus::Timeout,
            "connection_error" => ErrorStatus::ConnectionError,
            "content_blocked" => ErrorStatus::ContentBlocked,
            "captcha_detected" => ErrorStatus::CaptchaDetected,
            "extraction_error" => ErrorStatus::ExtractionError,
            "parsing_error" => ErrorStatus::ParsingError,
            "HTML_TOO_SHORT" => ErrorStatus::HtmlTooShort,
            "TEXT_TOO_SHORT" => ErrorStatus::TextTooShort,
            other => {
                let code = other
                    .strip_prefix("http_status_")
                    .and_then(|code| code.parse::<u16>().ok())
                    .ok_or_else(|| format!("unknown error status {other:?}"))?;
                ErrorStatus::HttpStatus(code)
            }
        };
        Ok(status)
    }
}

impl From<ErrorStatus> for String {
    fn from(status: ErrorStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for ErrorStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_strings() {
        assert_eq!(ErrorStatus::HttpStatus(404).to_string(), "http_status_404");
        assert_eq!(ErrorStatus::CaptchaDetected.to_string(), "captcha_detected");
        assert_eq!(ErrorStatus::HtmlTooShort.to_string(), "HTML_TOO_SHORT");
    }

    #[test]
    fn test_error_status_parse() {
        assert_eq!("http_status_503".parse::<ErrorStatus>(), Ok(ErrorStatus::HttpStatus(503)));
        assert_eq!("timeout".parse::<ErrorStatus>(), Ok(ErrorStatus::Timeout));
        assert!("http_status_abc".parse::<ErrorStatus>().is_err());
        assert!("something_else".parse::<ErrorStatus>().is_err());
    }

    #[test]
    fn test_error_status_serde_as_string() {
        let json = serde_json::to_string(&ErrorStatus::ContentBlocked).unwrap();
        assert_eq!(json, "\"content_blocked\"");
        let back: ErrorStatus = serde_json::from_str("\"http_status_429\"").unwrap();
        assert_eq!(back, ErrorStatus::HttpStatus(429));
    }

    #[test]
    fn test_fetch_error_maps_to_status() {
        let err = FetchError::Connection {
            url: "https://example.com".into(),
            message: "refused".into(),
        };
        assert_eq!(err.status(), ErrorStatus::ConnectionError);
        let err = FetchError::HttpStatus {
            status: 404,
            url: "https://example.com".into(),
        };
        assert_eq!(err.status(), ErrorStatus::HttpStatus(404));
    }
}
