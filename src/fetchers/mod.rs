//! Page fetching backends and the per-kind scraper registry.
//!
//! Each fetch backend implements [`PageFetcher`]:
//!
//! - [`http`]: plain `reqwest` GET (plus `file://`), always available
//! - [`browser`]: headless Chromium over CDP, behind the `browser` feature
//!
//! A [`FetchStrategy`] decides what options each attempt gets and how many
//! attempts are allowed. [`ScraperRegistry`] maps a configured source to a
//! strategy (by [`ScraperKind`]) and a fetcher (by [`BrowserProfile`]).

#[cfg(feature = "browser")]
pub mod browser;
pub mod http;
pub mod stealth;

use crate::error::FetchError;
use crate::models::{FeedSource, LaunchOptions, ScraperKind};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Simulated user activity performed after navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    MoveMouse { x: u32, y: u32 },
    Scroll { delta_y: u32 },
    Pause(Duration),
}

/// Readiness condition awaited after navigation. Each one is bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// Wait until one of these selectors matches (main content rendered).
    AnySelector(Vec<String>),
    /// Wait until no network activity was seen for the given quiet period.
    NetworkIdle(Duration),
}

/// Selectors that signal the main article content has rendered.
pub const MAIN_CONTENT_SELECTORS: &[&str] =
    &["article", "main", "[role='main']", "#content", "body"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub headers: Vec<(String, String)>,
    pub user_agent: String,
    pub viewport: Viewport,
    /// Scripts injected before any page script runs.
    pub scripts: Vec<String>,
    pub interactions: Vec<Interaction>,
    pub wait: Vec<WaitCondition>,
    pub timeout: Duration,
}

/// Successful retrieval: final status and rendered markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub html: String,
}

/// Retrieves rendered content for a URL.
///
/// Implementations return `Err` for every non-2xx status (including
/// unresolved redirects), so an `Ok` page always carries a success status.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage, FetchError>;
}

/// Shared classification of a navigation's final status.
pub fn check_status(url: &str, status: u16) -> Result<(), FetchError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(FetchError::HttpStatus {
            status,
            url: url.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Fixed desktop profile, single attempt.
    Basic,
    /// Rotated profile, spoofing scripts, simulated activity, bounded retries.
    Stealth,
}

impl FetchStrategy {
    /// Options for one attempt. Stealth draws fresh random values every call.
    pub fn options(&self, timeout: Duration) -> FetchOptions {
        let main_content = WaitCondition::AnySelector(
            MAIN_CONTENT_SELECTORS.iter().map(|s| s.to_string()).collect(),
        );
        match self {
            FetchStrategy::Basic => FetchOptions {
                headers: vec![("Accept-Language".to_string(), "en-US,en;q=0.9".to_string())],
                user_agent: stealth::DESKTOP_USER_AGENT.to_string(),
                viewport: stealth::DESKTOP_VIEWPORT,
                scripts: Vec::new(),
                interactions: Vec::new(),
                wait: vec![WaitCondition::NetworkIdle(Duration::from_millis(500)), main_content],
                timeout,
            },
            FetchStrategy::Stealth => {
                let mut rng = rand::rng();
                let viewport = stealth::random_viewport(&mut rng);
                FetchOptions {
                    headers: vec![
                        (
                            "Accept".to_string(),
                            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
                                .to_string(),
                        ),
                        (
                            "Accept-Language".to_string(),
                            stealth::random_accept_language(&mut rng).to_string(),
                        ),
                        ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
                    ],
                    user_agent: stealth::random_user_agent(&mut rng).to_string(),
                    viewport,
                    scripts: stealth::STEALTH_SCRIPTS.iter().map(|s| s.to_string()).collect(),
                    interactions: stealth::random_interactions(&mut rng, viewport),
                    wait: vec![main_content, WaitCondition::NetworkIdle(Duration::from_secs(2))],
                    timeout,
                }
            }
        }
    }

    /// Attempt policy for this strategy, honouring a per-source retry override.
    pub fn retry_policy(&self, base: &RetryPolicy, max_retries: Option<u32>) -> RetryPolicy {
        match self {
            FetchStrategy::Basic => base.single_attempt(),
            FetchStrategy::Stealth => {
                base.with_max_attempts(max_retries.unwrap_or(base.max_attempts))
            }
        }
    }
}

impl From<ScraperKind> for FetchStrategy {
    fn from(kind: ScraperKind) -> Self {
        match kind {
            ScraperKind::BrowserRss => FetchStrategy::Basic,
            ScraperKind::StealthBrowserRss => FetchStrategy::Stealth,
        }
    }
}

/// A scraper variant: identity, strategy and the backend it fetches with.
#[derive(Clone)]
pub struct Scraper {
    pub kind: ScraperKind,
    pub strategy: FetchStrategy,
    pub fetcher: Arc<dyn PageFetcher>,
}

impl Scraper {
    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl fmt::Debug for Scraper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scraper")
            .field("kind", &self.kind)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Settings that need a browser process of their own. Sources that share a
/// profile share a browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BrowserProfile {
    pub headless: bool,
    pub launch_args: Vec<String>,
}

impl From<&LaunchOptions> for BrowserProfile {
    fn from(launch: &LaunchOptions) -> Self {
        Self {
            headless: launch.headless,
            launch_args: launch.launch_args.clone(),
        }
    }
}

/// Resolves each feed source to a scraper: the strategy follows the
/// source's [`ScraperKind`], the backend follows its [`BrowserProfile`].
#[derive(Clone, Default)]
pub struct ScraperRegistry {
    profiles: HashMap<BrowserProfile, Arc<dyn PageFetcher>>,
    fallback: Option<Arc<dyn PageFetcher>>,
}

impl ScraperRegistry {
    /// Every source fetches through the same backend, whatever its profile.
    pub fn with_fetcher(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            profiles: HashMap::new(),
            fallback: Some(fetcher),
        }
    }

    /// Build the backends `sources` need.
    ///
    /// # Arguments
    /// * `sources` - Every source of the run; one browser is launched per
    ///   distinct [`BrowserProfile`] among them.
    /// * `use_browser` - When false, all sources share one HTTP fetcher.
    ///
    /// # Returns
    /// The registry, or the first launch failure.
    pub async fn for_sources(
        sources: &[FeedSource],
        use_browser: bool,
    ) -> Result<Self, FetchError> {
        if !use_browser {
            return Ok(Self::with_fetcher(Arc::new(http::HttpPageFetcher::new()?)));
        }
        let mut registry = Self::default();
        for profile in sources.iter().map(|s| BrowserProfile::from(&s.launch)).unique() {
            info!(
                headless = profile.headless,
                launch_args = ?profile.launch_args,
                "Starting browser for profile"
            );
            let fetcher = browser_fetcher(&profile).await?;
            registry.register(profile, fetcher);
        }
        Ok(registry)
    }

    pub fn register(&mut self, profile: BrowserProfile, fetcher: Arc<dyn PageFetcher>) {
        self.profiles.insert(profile, fetcher);
    }

    /// `None` when no backend serves the source's profile.
    pub fn scraper_for(&self, source: &FeedSource) -> Option<Scraper> {
        let fetcher = self
            .profiles
            .get(&BrowserProfile::from(&source.launch))
            .or(self.fallback.as_ref())?;
        Some(Scraper {
            kind: source.kind,
            strategy: source.kind.into(),
            fetcher: Arc::clone(fetcher),
        })
    }
}

impl fmt::Debug for ScraperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScraperRegistry")
            .field("profiles", &self.profiles.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(feature = "browser")]
async fn browser_fetcher(profile: &BrowserProfile) -> Result<Arc<dyn PageFetcher>, FetchError> {
    Ok(Arc::new(browser::BrowserPageFetcher::launch(profile).await?))
}

#[cfg(not(feature = "browser"))]
async fn browser_fetcher(profile: &BrowserProfile) -> Result<Arc<dyn PageFetcher>, FetchError> {
    tracing::warn!(
        launch_args = ?profile.launch_args,
        "Browser fetching requested but the `browser` feature is not compiled in; using HTTP"
    );
    Ok(Arc::new(http::HttpPageFetcher::new()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFetcher;

    #[test]
    fn test_basic_options_are_fixed() {
        let a = FetchStrategy::Basic.options(Duration::from_secs(30));
        let b = FetchStrategy::Basic.options(Duration::from_secs(30));
        assert_eq!(a, b);
        assert_eq!(a.viewport, Viewport::new(1920, 1080));
        assert!(a.user_agent.contains("Chrome/120"));
        assert!(a.scripts.is_empty());
    }

    #[test]
    fn test_stealth_options_carry_spoofing() {
        let options = FetchStrategy::Stealth.options(Duration::from_secs(10));
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert!(!options.scripts.is_empty());
        assert!(!options.interactions.is_empty());
        assert!(stealth::USER_AGENTS.contains(&options.user_agent.as_str()));
        assert!(options.wait.iter().any(|w| matches!(w, WaitCondition::AnySelector(_))));
    }

    #[test]
    fn test_retry_policy_per_strategy() {
        let base = RetryPolicy::default();
        assert_eq!(FetchStrategy::Basic.retry_policy(&base, Some(9)).max_attempts, 1);
        let stealth = FetchStrategy::Stealth.retry_policy(&base, None);
        assert_eq!(stealth.max_attempts, base.max_attempts);
        assert_eq!(FetchStrategy::Stealth.retry_policy(&base, Some(5)).max_attempts, 5);
    }

    #[test]
    fn test_check_status() {
        assert!(check_status("u", 200).is_ok());
        assert!(check_status("u", 204).is_ok());
        assert_eq!(
            check_status("u", 301),
            Err(FetchError::HttpStatus {
                status: 301,
                url: "u".into()
            })
        );
        assert!(check_status("u", 404).is_err());
    }

    fn source(kind: ScraperKind, headless: bool, args: &[&str]) -> FeedSource {
        FeedSource {
            url: "https://feeds.example/rss".to_string(),
            kind,
            launch: LaunchOptions {
                headless,
                launch_args: args.iter().map(|a| a.to_string()).collect(),
                max_retries: None,
            },
        }
    }

    #[test]
    fn test_registry_maps_kinds() {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(http::HttpPageFetcher::new().unwrap());
        let registry = ScraperRegistry::with_fetcher(fetcher);
        let stealth = registry
            .scraper_for(&source(ScraperKind::StealthBrowserRss, true, &[]))
            .unwrap();
        assert_eq!(stealth.strategy, FetchStrategy::Stealth);
        assert_eq!(stealth.name(), "stealth_browser_rss");
        let basic = registry
            .scraper_for(&source(ScraperKind::BrowserRss, false, &["--no-sandbox"]))
            .unwrap();
        assert_eq!(basic.strategy, FetchStrategy::Basic);
    }

    #[tokio::test]
    async fn test_registry_routes_by_browser_profile() {
        let sandboxed = Arc::new(ScriptedFetcher::new().page("https://a.example/", "<p>a</p>"));
        let headed = Arc::new(ScriptedFetcher::new().page("https://a.example/", "<p>b</p>"));
        let mut registry = ScraperRegistry::default();
        registry.register(
            BrowserProfile {
                headless: true,
                launch_args: vec!["--no-sandbox".into()],
            },
            sandboxed.clone(),
        );
        registry.register(
            BrowserProfile {
                headless: false,
                launch_args: Vec::new(),
            },
            headed.clone(),
        );

        let options = FetchStrategy::Basic.options(Duration::from_secs(1));
        let first = registry
            .scraper_for(&source(ScraperKind::BrowserRss, true, &["--no-sandbox"]))
            .unwrap();
        let second = registry
            .scraper_for(&source(ScraperKind::StealthBrowserRss, false, &[]))
            .unwrap();
        let page = first.fetcher.fetch("https://a.example/", &options).await;
        assert_eq!(page.unwrap().html, "<p>a</p>");
        let page = second.fetcher.fetch("https://a.example/", &options).await;
        assert_eq!(page.unwrap().html, "<p>b</p>");
        assert_eq!(sandboxed.calls().len(), 1);
        assert_eq!(headed.calls().len(), 1);

        // Unknown profile, no fallback backend.
        assert!(registry
            .scraper_for(&source(ScraperKind::BrowserRss, true, &[]))
            .is_none());
    }

    #[tokio::test]
    async fn test_http_mode_shares_one_backend() {
        let sources = vec![
            source(ScraperKind::BrowserRss, true, &["--no-sandbox"]),
            source(ScraperKind::StealthBrowserRss, false, &[]),
        ];
        let registry = ScraperRegistry::for_sources(&sources, false).await.unwrap();
        let a = registry.scraper_for(&sources[0]).unwrap();
        let b = registry.scraper_for(&sources[1]).unwrap();
        assert!(Arc::ptr_eq(&a.fetcher, &b.fetcher));
    }
}
