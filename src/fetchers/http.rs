//! Plain HTTP page fetcher.
//!
//! Honours headers, user agent and timeout from [`FetchOptions`]; viewport,
//! scripts, interactions and wait conditions need a real browser and are
//! ignored here. `file://` URLs are read from disk.

use super::{FetchOptions, FetchedPage, PageFetcher, check_status};
use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use std::time::Duration;
use tracing::{debug, instrument};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REDIRECT_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(REDIRECT_LIMIT))
            .build()
            .map_err(|e| FetchError::Connection {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    async fn fetch_file(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let path = url::Url::parse(url)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| FetchError::Connection {
                url: url.to_string(),
                message: "invalid file URL".to_string(),
            })?;
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => Ok(FetchedPage { status: 200, html }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
            Err(e) => Err(FetchError::Connection {
                url: url.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage, FetchError> {
        if url.starts_with("file://") {
            return self.fetch_file(url).await;
        }

        let mut request = self
            .client
            .get(url)
            .timeout(options.timeout)
            .header(USER_AGENT, options.user_agent.as_str());
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, options.timeout, e))?;
        let status = response.status().as_u16();
        check_status(url, status)?;

        let html = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(url, options.timeout, e))?;
        debug!(status, bytes = html.len(), "Fetched page");
        Ok(FetchedPage { status, html })
    }
}

fn map_reqwest_error(url: &str, timeout: Duration, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout {
            url: url.to_string(),
            secs: timeout.as_secs(),
        };
    }
    if let Some(status) = err.status() {
        return FetchError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        };
    }
    FetchError::Connection {
        url: url.to_string(),
        message: err.to_string(),
    }
}
