//! Heuristic validation of fetched page content.
//!
//! [`ContentValidator::validate`] runs an ordered battery of pattern checks
//! over raw HTML and reports whether the page looks like a real article or a
//! block page, CAPTCHA wall, error page or empty shell. It is a best-effort
//! gate: false positives and false negatives are expected.
//!
//! [`detect_captcha`] checks the DOM for known CAPTCHA widgets, independently
//! of the text heuristics.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// Content shorter than this (in characters) earns a warning.
pub const MIN_CONTENT_CHARS: usize = 100;

/// Outcome of [`ContentValidator::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub content_length: usize,
    pub status_code: u16,
}

impl ValidationReport {
    /// One-line human readable summary, suitable for logs and error messages.
    pub fn summary(&self) -> String {
        let mut summary = if self.valid {
            let mut s = "Content validation: PASSED".to_string();
            if !self.warnings.is_empty() {
                s.push_str(&format!(" (Warnings: {})", self.warnings.join(", ")));
            }
            s
        } else {
            format!("Content validation: FAILED - {}", self.issues.join(", "))
        };
        summary.push_str(&format!(" (Length: {} chars)", self.content_length));
        summary
    }
}

/// A labelled pattern. The label is what gets reported, not the raw match.
struct Term {
    label: &'static str,
    regex: Regex,
}

fn terms(table: &[(&'static str, &str)]) -> Vec<Term> {
    table.iter()
        .map(|(label, pattern)| Term {
            label,
            regex: RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("valid validator pattern"),
        })
        .collect()
}

fn matched_labels(terms: &[Term], haystack: &str) -> Vec<&'static str> {
    terms
        .iter()
        .filter(|t| t.regex.is_match(haystack))
        .map(|t| t.label)
        .unique()
        .collect()
}

static ANTI_BOT_TERMS: Lazy<Vec<Term>> = Lazy::new(|| {
    terms(&[
        ("captcha", r"captcha"),
        ("recaptcha", r"recaptcha"),
        ("prove you are human", r"prove\W+(?:that\W+)?(?:you\W+are|you're)\W+(?:a\W+)?human"),
        ("verify you are human", r"verify\W+(?:that\W+)?(?:you\W+are|you're)\W+(?:a\W+)?human"),
        ("human verification", r"human\W+verification"),
        ("robot check", r"robot\W+check|are\W+you\W+a\W+robot"),
        ("bot detection", r"\bbot\W+detection"),
        ("access denied", r"access\W+(?:is\W+)?denied"),
        ("forbidden", r"\b403\W+forbidden\b|\baccess\W+forbidden\b"),
        (
            "blocked",
            r"\byou(?:\W+have|'ve)\W+been\W+blocked\b|\brequest\W+(?:was\W+|has\W+been\W+)?blocked\b",
        ),
        (
            "unauthorized",
            r"\bunauthorized\W+(?:access|request)\b|\bnot\W+authorized\W+to\W+(?:access|view)\b",
        ),
        ("too many requests", r"too\W+many\W+requests"),
        ("rate limit", r"rate\W?limit"),
        ("request limit", r"request\W+limit"),
        ("please wait", r"please\W+wait"),
        ("try again later", r"try\W+again\W+later"),
        (
            "region restricted",
            r"not\W+available\W+in\W+your\W+(?:region|country)|geographic(?:al)?\W+restriction|region\W+blocked",
        ),
        ("content unavailable", r"content\W+(?:is\W+)?unavailable"),
        ("under maintenance", r"under\W+maintenance|down\W+for\W+maintenance"),
        ("service unavailable", r"temporarily\W+unavailable|service\W+unavailable"),
        (
            "checking your browser",
            r"checking\W+(?:if\W+the\W+site\W+connection\W+is\W+secure|your\W+browser)",
        ),
        ("ddos protection", r"ddos\W+protection"),
        ("security check", r"security\W+(?:check|verification)"),
        (
            "javascript required",
            r"javascript\W+(?:is\W+)?required|enable\W+javascript|browser\W+check",
        ),
    ])
});

static ERROR_PAGE_TERMS: Lazy<Vec<Term>> = Lazy::new(|| {
    terms(&[
        ("page not found", r"page\W+(?:was\W+)?not\W+found"),
        ("404 error", r"\b404\W+error\b|\berror\W+404\b|\b404\W+not\W+found\b"),
        ("page does not exist", r"page\W+(?:you\W+are\W+looking\W+for\W+)?does\W+not\W+exist"),
        ("content not found", r"(?:content|article|post)\W+not\W+found"),
    ])
});

static REDIRECT_TERMS: Lazy<Vec<Term>> = Lazy::new(|| {
    terms(&[
        ("window.location", r"window\.location"),
        ("location.href", r"location\.href"),
        ("meta refresh", r#"http-equiv\W+refresh"#),
    ])
});

static EMPTY_SKELETON: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        concat!(
            r"^\s*(?:<!doctype[^>]*>\s*)?<html[^>]*>\s*",
            r"(?:<head[^>]*>\s*(?:<title>\s*</title>\s*)?</head>\s*)?",
            r"(?:<body[^>]*>\s*</body>\s*)?</html>\s*$",
        ),
    )
    .case_insensitive(true)
    .dot_matches_new_line(true)
    .build()
    .expect("valid skeleton regex")
});

static JS_CHALLENGE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"enable\W+javascript|javascript\W+(?:is\W+)?(?:required|disabled)")
        .case_insensitive(true)
        .build()
        .expect("valid js challenge regex")
});

const SUSPICIOUS_HEAD_WORDS: &[&str] = &["blocked", "forbidden", "denied", "captcha"];

static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("valid title selector"));
static META_DESCRIPTION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="description"]"#).expect("valid meta selector"));

/// Known CAPTCHA / challenge widgets, matched against the page DOM.
const CAPTCHA_SELECTORS: &[&str] = &[
    ".g-recaptcha",
    "iframe[src*='recaptcha']",
    ".h-captcha",
    "iframe[src*='hcaptcha']",
    ".cf-turnstile",
    "iframe[src*='challenges.cloudflare.com']",
    "#challenge-form",
    "#cf-challenge-running",
    "#captcha",
    ".captcha",
    "[data-sitekey]",
    "input[name='captcha']",
    "img[src*='captcha']",
    "form[action*='captcha']",
];

static CAPTCHA_WIDGETS: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| {
    CAPTCHA_SELECTORS
        .iter()
        .map(|s| (*s, Selector::parse(s).expect("valid captcha selector")))
        .collect()
});

/// Look for known CAPTCHA markup. Returns the first selector that matched.
pub fn detect_captcha(html: &str) -> Option<&'static str> {
    if html.trim().is_empty() {
        return None;
    }
    let document = Html::parse_document(html);
    CAPTCHA_WIDGETS
        .iter()
        .find(|(_, selector)| document.select(selector).next().is_some())
        .map(|(name, _)| *name)
}

/// Pattern-based page classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentValidator;

impl ContentValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate raw page content.
    ///
    /// Only the empty-content check short-circuits; every other check runs and
    /// contributes issues (invalidating) or warnings (informational).
    pub fn validate(&self, html: &str, url: &str, status_code: u16) -> ValidationReport {
        let mut report = ValidationReport {
            valid: true,
            issues: Vec::new(),
            warnings: Vec::new(),
            content_length: html.chars().count(),
            status_code,
        };

        if html.trim().is_empty() {
            report.valid = false;
            report.issues.push("Empty content".to_string());
            return report;
        }

        let anti_bot = matched_labels(&ANTI_BOT_TERMS, html);
        if !anti_bot.is_empty() {
            report.issues.push(format!("Anti-bot detection: {}", anti_bot.join(", ")));
        }

        if EMPTY_SKELETON.is_match(html) {
            report.issues.push("Empty or minimal HTML content".to_string());
        }

        let error_page = matched_labels(&ERROR_PAGE_TERMS, html);
        if !error_page.is_empty() {
            report.issues.push(format!("Error page detected: {}", error_page.join(", ")));
        }

        let redirects = matched_labels(&REDIRECT_TERMS, html);
        if !redirects.is_empty() {
            report
                .warnings
                .push(format!("Suspicious redirect patterns: {}", redirects.join(", ")));
        }

        if report.content_length < MIN_CONTENT_CHARS {
            report
                .warnings
                .push("Very short content (potential blocking)".to_string());
        }

        report.issues.extend(blocking_indicators(html));

        report.valid = report.issues.is_empty();
        tracing::debug!(
            %url,
            valid = report.valid,
            issues = report.issues.len(),
            warnings = report.warnings.len(),
            "Validated content"
        );
        report
    }
}

fn blocking_indicators(html: &str) -> Vec<String> {
    let mut indicators = Vec::new();
    let lower = html.to_lowercase();

    if lower.contains("cloudflare") && lower.contains("checking your browser") {
        indicators.push("Cloudflare DDoS protection detected".to_string());
    }

    if JS_CHALLENGE.is_match(html) {
        indicators.push("JavaScript challenge detected".to_string());
    }

    let document = Html::parse_document(html);
    if let Some(title) = document.select(&TITLE_SELECTOR).next() {
        let title = title.text().collect::<String>();
        let title = title.trim();
        if contains_suspicious_word(title) {
            indicators.push(format!("Suspicious page title: {title}"));
        }
    }

    if let Some(description) = document
        .select(&META_DESCRIPTION_SELECTOR)
        .next()
        .and_then(|meta| meta.value().attr("content"))
    {
        if contains_suspicious_word(description) {
            indicators.push(format!("Suspicious meta description: {description}"));
        }
    }

    indicators
}

fn contains_suspicious_word(text: &str) -> bool {
    let lower = text.to_lowercase();
    SUSPICIOUS_HEAD_WORDS.iter().any(|w| lower.contains(w))
}
