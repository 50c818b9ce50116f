//! Headless Chromium page fetcher over the DevTools protocol.
//!
//! One browser process is launched per fetcher and shared by all fetches;
//! every fetch opens its own page and closes it afterwards, so attempts never
//! share page state. Pages are held in a [`PageGuard`], which still closes
//! the page when a fetch is cancelled or fails half-way through setup.

use super::{
    BrowserProfile, FetchOptions, FetchedPage, Interaction, PageFetcher, WaitCondition,
    check_status,
};
use crate::error::FetchError;
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType,
};
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use futures::StreamExt;
use std::ops::Deref;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, instrument, trace, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Flags every launch gets, in addition to the configured ones.
const BASE_LAUNCH_ARGS: &[&str] = &[
    "--allow-file-access-from-files",
    "--disable-blink-features=AutomationControlled",
];

/// A browser tab that must be closed with an async call.
#[async_trait]
pub(crate) trait Tab: Send + Sync + 'static {
    async fn close_tab(self) -> Result<(), String>;
}

#[async_trait]
impl Tab for Page {
    async fn close_tab(self) -> Result<(), String> {
        self.close().await.map_err(|e| e.to_string())
    }
}

/// Owns an open tab until it is closed.
///
/// `close` is the normal path. If the guard is dropped instead (an error
/// after `new_page`, or the fetch future cancelled by a timeout) the close
/// runs on a spawned task.
pub(crate) struct PageGuard<P: Tab = Page> {
    page: Option<P>,
    url: String,
    runtime: Handle,
}

impl<P: Tab> PageGuard<P> {
    pub(crate) fn new(page: P, url: &str) -> Self {
        Self {
            page: Some(page),
            url: url.to_string(),
            runtime: Handle::current(),
        }
    }

    pub(crate) async fn close(mut self) {
        if let Some(page) = self.page.take() {
            match page.close_tab().await {
                Ok(()) => trace!(url = %self.url, "Page closed"),
                Err(e) => warn!(url = %self.url, error = %e, "Failed to close page"),
            }
        }
    }
}

impl<P: Tab> Deref for PageGuard<P> {
    type Target = P;

    fn deref(&self) -> &P {
        // `page` is only taken by `close` and `drop`, which both consume the guard.
        match &self.page {
            Some(page) => page,
            None => unreachable!("page guard used after close"),
        }
    }
}

impl<P: Tab> Drop for PageGuard<P> {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            let url = std::mem::take(&mut self.url);
            self.runtime.spawn(async move {
                if let Err(e) = page.close_tab().await {
                    warn!(%url, error = %e, "Failed to close abandoned page");
                } else {
                    debug!(%url, "Abandoned page closed");
                }
            });
        }
    }
}

pub struct BrowserPageFetcher {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserPageFetcher {
    /// Start a browser process for `profile`.
    ///
    /// # Arguments
    /// * `profile` - Headless flag and extra command-line flags.
    ///
    /// # Returns
    /// A fetcher driving the launched browser, or `FetchError::Connection`
    /// if Chromium could not be started.
    pub async fn launch(profile: &BrowserProfile) -> Result<Self, FetchError> {
        let args: Vec<String> = BASE_LAUNCH_ARGS
            .iter()
            .map(|a| a.to_string())
            .chain(profile.launch_args.iter().cloned())
            .collect();
        let mut builder = BrowserConfig::builder().args(args);
        if !profile.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|message| FetchError::Connection {
            url: String::new(),
            message,
        })?;

        let (browser, mut handler) =
            Browser::launch(config)
                .await
                .map_err(|e| FetchError::Connection {
                    url: String::new(),
                    message: format!("failed to launch browser: {e}"),
                })?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler event error");
                }
            }
        });
        debug!(headless = profile.headless, "Browser launched");
        Ok(Self { browser, handler })
    }

    async fn prepare_page(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<PageGuard, FetchError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| cdp(url, e))?;
        let page = PageGuard::new(page, url);

        page.set_user_agent(SetUserAgentOverrideParams::new(options.user_agent.clone()))
            .await
            .map_err(|e| cdp(url, e))?;
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(options.viewport.width),
            i64::from(options.viewport.height),
            1.0,
            false,
        ))
        .await
        .map_err(|e| cdp(url, e))?;

        if !options.headers.is_empty() {
            let headers: serde_json::Map<String, serde_json::Value> = options
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            let headers = Headers::new(serde_json::Value::Object(headers));
            page.execute(SetExtraHttpHeadersParams::new(headers))
                .await
                .map_err(|e| cdp(url, e))?;
        }

        for script in &options.scripts {
            let params = AddScriptToEvaluateOnNewDocumentParams::new(script.clone());
            page.evaluate_on_new_document(params)
                .await
                .map_err(|e| cdp(url, e))?;
        }
        Ok(page)
    }

    async fn navigate(
        &self,
        page: &Page,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchedPage, FetchError> {
        page.goto(url).await.map_err(|e| cdp(url, e))?;
        let status = page
            .wait_for_navigation_response()
            .await
            .map_err(|e| cdp(url, e))?
            .and_then(|request| request.response.as_ref().map(|r| r.status))
            .ok_or_else(|| FetchError::NoResponse {
                url: url.to_string(),
            })?;
        let status = u16::try_from(status).unwrap_or(0);
        check_status(url, status)?;

        let deadline = Instant::now() + options.timeout;
        for condition in &options.wait {
            wait_for(page, condition, deadline).await;
        }
        for step in &options.interactions {
            if let Err(e) = interact(page, step).await {
                debug!(%url, error = %e, "Interaction step failed");
            }
        }

        let html = page.content().await.map_err(|e| cdp(url, e))?;
        Ok(FetchedPage { status, html })
    }
}

impl Drop for BrowserPageFetcher {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl PageFetcher for BrowserPageFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage, FetchError> {
        let page = self.prepare_page(url, options).await?;
        let navigation = self.navigate(&page, url, options);
        let result = match tokio::time::timeout(options.timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                secs: options.timeout.as_secs(),
            }),
        };
        page.close().await;
        result
    }
}

/// Wait for `condition` but never past `deadline`; a condition that is not met
/// in time is not an error.
async fn wait_for(page: &Page, condition: &WaitCondition, deadline: Instant) {
    match condition {
        WaitCondition::AnySelector(selectors) => {
            while Instant::now() < deadline {
                for selector in selectors {
                    if page.find_element(selector.as_str()).await.is_ok() {
                        return;
                    }
                }
                sleep(POLL_INTERVAL).await;
            }
        }
        WaitCondition::NetworkIdle(quiet) => {
            while Instant::now() < deadline {
                let ready: Option<String> = match page.evaluate("document.readyState").await {
                    Ok(result) => result.into_value().ok(),
                    Err(_) => None,
                };
                if ready.as_deref() == Some("complete") {
                    break;
                }
                sleep(POLL_INTERVAL).await;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep((*quiet).min(remaining)).await;
        }
    }
}

async fn interact(page: &Page, step: &Interaction) -> Result<(), chromiumoxide::error::CdpError> {
    match step {
        Interaction::MoveMouse { x, y } => {
            page.execute(DispatchMouseEventParams::new(
                DispatchMouseEventType::MouseMoved,
                f64::from(*x),
                f64::from(*y),
            ))
            .await?;
        }
        Interaction::Scroll { delta_y } => {
            page.evaluate(format!("window.scrollBy(0, {delta_y})")).await?;
        }
        Interaction::Pause(duration) => sleep(*duration).await,
    }
    Ok(())
}

fn cdp(url: &str, err: chromiumoxide::error::CdpError) -> FetchError {
    FetchError::Connection {
        url: url.to_string(),
        message: err.to_string(),
    }
}
