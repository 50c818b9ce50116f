//! Scripted fakes shared by the orchestrator, persistence and coordinator tests.

use crate::error::{ExtractError, FetchError};
use crate::extract::TextExtractor;
use crate::fetchers::{FetchOptions, FetchedPage, PageFetcher};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Replays queued responses per URL. The last queued response repeats; URLs
/// with nothing queued get `NoResponse`.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, VecDeque<Result<FetchedPage, FetchError>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, html: &str) -> Self {
        let page = FetchedPage {
            status: 200,
            html: html.to_string(),
        };
        self.push(url, Ok(page))
    }

    pub fn status(self, url: &str, status: u16) -> Self {
        let err = FetchError::HttpStatus {
            status,
            url: url.to_string(),
        };
        self.push(url, Err(err))
    }

    pub fn error(self, url: &str, err: FetchError) -> Self {
        self.push(url, Err(err))
    }

    fn push(self, url: &str, response: Result<FetchedPage, FetchError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<FetchedPage, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Err(FetchError::NoResponse {
                url: url.to_string(),
            }),
        }
    }
}

/// Always fails.
pub struct BrokenExtractor;

impl TextExtractor for BrokenExtractor {
    fn extract(&self, _html: &str) -> Result<String, ExtractError> {
        Err(ExtractError("parser exploded".to_string()))
    }
}

/// A long, ordinary article page that passes validation and length policy.
pub fn article_html(title: &str) -> String {
    let paragraph = "<p>The committee reviewed the annual budget proposal and discussed \
                     infrastructure spending for bridges, schools and public transit.</p>\n";
    format!(
        "<!DOCTYPE html><html><head><title>{title}</title>\
         <meta name=\"description\" content=\"Local news coverage\"></head>\
         <body><article><h1>{title}</h1>\n{}</article></body></html>",
        paragraph.repeat(90)
    )
}

/// An otherwise ordinary page carrying a reCAPTCHA widget.
pub fn captcha_html() -> String {
    article_html("Interstitial").replace(
        "<article>",
        "<article><div class=\"g-recaptcha\" data-sitekey=\"abc\"></div>",
    )
}
