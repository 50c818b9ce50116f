//! Main-content text extraction from raw HTML.
//!
//! The pipeline only depends on the [`TextExtractor`] trait; the bundled
//! [`ReadableTextExtractor`] picks the most article-like container and joins
//! its block-level text.

use crate::error::ExtractError;
use crate::utils::collapse_whitespace;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

/// Converts raw markup into cleaned article text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, html: &str) -> Result<String, ExtractError>;
}

static ROOT_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["article", "main", "[role='main']", "#content", "body"]
        .iter()
        .map(|s| Selector::parse(s).expect("valid root selector"))
        .collect()
});

static BLOCK_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("h1, h2, h3, h4, p, li, blockquote, pre").expect("valid block selector")
});

const SKIPPED_ANCESTORS: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "aside", "header", "form", "template",
];

/// Heuristic extractor built on `scraper`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadableTextExtractor;

impl ReadableTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

fn is_skipped(element: &ElementRef<'_>, root: &ElementRef<'_>) -> bool {
    element
        .ancestors()
        .take_while(|node| node.id() != root.id())
        .filter_map(ElementRef::wrap)
        .any(|el| SKIPPED_ANCESTORS.contains(&el.value().name()))
}

impl TextExtractor for ReadableTextExtractor {
    fn extract(&self, html: &str) -> Result<String, ExtractError> {
        if !html.contains('<') {
            return Err(ExtractError("input does not look like HTML".to_string()));
        }

        let document = Html::parse_document(html);
        let root = ROOT_SELECTORS
            .iter()
            .find_map(|selector| document.select(selector).next())
            .ok_or_else(|| ExtractError("document has no body".to_string()))?;

        let blocks: Vec<String> = root
            .select(&BLOCK_SELECTOR)
            .filter(|block| !is_skipped(block, &root))
            // Nested blocks (p inside li, etc.) would otherwise be emitted twice.
            .filter(|block| {
                !block
                    .ancestors()
                    .take_while(|node| node.id() != root.id())
                    .filter_map(ElementRef::wrap)
                    .any(|el| BLOCK_SELECTOR.matches(&el))
            })
            .map(|block| collapse_whitespace(&block.text().collect::<Vec<_>>().join(" ")))
            .filter(|text| !text.is_empty())
            .collect();

        if !blocks.is_empty() {
            return Ok(blocks.join("\n"));
        }

        let text = root
            .descendants()
            .filter_map(|node| node.value().as_text().map(|t| (node, t)))
            .filter(|(node, _)| {
                !node
                    .ancestors()
                    .filter_map(ElementRef::wrap)
                    .any(|el| SKIPPED_ANCESTORS.contains(&el.value().name()))
            })
            .map(|(_, t)| t.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(collapse_whitespace(&text))
    }
}
