//! Feed reading: download a syndication document and turn it into article candidates.
//!
//! [`FeedReader::parse`] accepts RSS 2.0, RDF (RSS 1.0) and Atom documents.
//! It checks the root element eagerly and then hands back [`FeedEntries`], a
//! streaming iterator over the document. Entries without a title or link are
//! skipped; ill-formed XML ends the iteration with a single
//! [`FeedError::Malformed`].

use crate::dates::parse_date;
use crate::error::FeedError;
use crate::models::{ArticleCandidate, url_domain};
use crate::utils::{clean_author, collapse_whitespace, strip_tags};
use itertools::Itertools;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Root element names accepted as a feed.
const FEED_ROOTS: &[&str] = &["rss", "RDF", "feed"];

#[derive(Debug, Clone, Copy, Default)]
pub struct FeedReader;

impl FeedReader {
    pub fn new() -> Self {
        Self
    }

    /// Start reading `document`. Fails immediately if it is not a feed at all.
    pub fn parse<'a>(
        &self,
        document: &'a str,
        feed_url: &str,
    ) -> Result<FeedEntries<'a>, FeedError> {
        let mut reader = Reader::from_str(document);
        let malformed = |message: String| FeedError::Malformed {
            url: feed_url.to_string(),
            message,
        };

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let root = local_name(&e);
                    if !FEED_ROOTS.contains(&root.as_str()) {
                        return Err(malformed(format!("unexpected root element <{root}>")));
                    }
                    debug!(feed_url, root = %root, "Detected feed format");
                    return Ok(FeedEntries {
                        reader,
                        feed_url: feed_url.to_string(),
                        depth: 1,
                        index: 0,
                        done: false,
                    });
                }
                Ok(Event::Empty(e)) => {
                    return Err(malformed(format!("empty root element <{}>", local_name(&e))));
                }
                Ok(Event::Eof) => return Err(malformed("document has no root element".to_string())),
                Ok(Event::Text(t)) if t.iter().all(u8::is_ascii_whitespace) => {}
                Ok(Event::Text(_)) | Ok(Event::CData(_)) => {
                    return Err(malformed("text outside of the root element".to_string()));
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(malformed(format!("{e} at byte {}", reader.buffer_position())));
                }
            }
        }
    }
}

/// Lazy, finite, non-restartable sequence of candidates from one feed document.
pub struct FeedEntries<'a> {
    reader: Reader<&'a [u8]>,
    feed_url: String,
    depth: usize,
    index: usize,
    done: bool,
}

/// Fields gathered from one `<item>`/`<entry>` before validation.
#[derive(Debug, Default)]
struct RawEntry {
    title: Option<String>,
    link: Option<String>,
    alternate_link: Option<String>,
    any_link: Option<String>,
    guid: Option<String>,
    guid_is_permalink: bool,
    published: Option<String>,
    updated: Option<String>,
    author: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    tags: Vec<String>,
}

impl<'a> FeedEntries<'a> {
    fn malformed(&mut self, message: String) -> Option<Result<ArticleCandidate, FeedError>> {
        self.done = true;
        Some(Err(FeedError::Malformed {
            url: self.feed_url.clone(),
            message,
        }))
    }

    /// Read events up to the end tag of the entry that was just opened.
    fn read_entry(&mut self) -> Result<RawEntry, String> {
        let entry_depth = self.depth;
        let mut entry = RawEntry::default();
        let mut stack: Vec<String> = Vec::new();
        let mut buffer = String::new();

        loop {
            let event = self
                .reader
                .read_event()
                .map_err(|e| format!("{e} at byte {}", self.reader.buffer_position()))?;
            match event {
                Event::Start(e) => {
                    self.depth += 1;
                    let name = local_name(&e);
                    if stack.is_empty() {
                        read_entry_attributes(&mut entry, &name, &e);
                        buffer.clear();
                    }
                    stack.push(name);
                }
                Event::Empty(e) => {
                    if stack.is_empty() {
                        read_entry_attributes(&mut entry, &local_name(&e), &e);
                    }
                }
                Event::End(_) => {
                    if self.depth == entry_depth {
                        self.depth -= 1;
                        return Ok(entry);
                    }
                    self.depth -= 1;
                    if stack.len() == 1 {
                        let name = stack.pop().unwrap_or_default();
                        assign_field(&mut entry, &name, &buffer);
                        buffer.clear();
                    } else {
                        stack.pop();
                    }
                }
                Event::Text(t) => {
                    if collects_text(&stack) {
                        buffer.push_str(&unescape_text(&String::from_utf8_lossy(&t)));
                    }
                }
                Event::CData(c) => {
                    if collects_text(&stack) {
                        buffer.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::GeneralRef(r) => {
                    if collects_text(&stack) {
                        buffer.push_str(&resolve_entity(&String::from_utf8_lossy(&r)));
                    }
                }
                Event::Eof => return Err("unexpected end of document inside an entry".to_string()),
                _ => {}
            }
        }
    }

    fn candidate(&self, raw: RawEntry) -> Option<ArticleCandidate> {
        let title = raw.title.as_deref().map(collapse_whitespace).unwrap_or_default();
        let url = raw
            .link
            .or(raw.alternate_link)
            .or(raw.any_link)
            .or_else(|| {
                raw.guid.filter(|g| {
                    raw.guid_is_permalink || g.starts_with("http://") || g.starts_with("https://")
                })
            })
            .map(|u| u.trim().to_string())
            .unwrap_or_default();

        if title.is_empty() || url.is_empty() {
            debug!(
                feed_url = %self.feed_url,
                entry = self.index,
                has_title = !title.is_empty(),
                has_url = !url.is_empty(),
                "Skipping entry: missing title or URL"
            );
            return None;
        }

        let raw_date = raw.published.as_deref().or(raw.updated.as_deref());
        let published_date = raw_date.and_then(parse_date);
        if published_date.is_none() {
            debug!(
                feed_url = %self.feed_url,
                %url,
                ?raw_date,
                "Entry has no parsable date"
            );
        }

        let tags = raw
            .tags
            .iter()
            .flat_map(|t| t.split(','))
            .map(collapse_whitespace)
            .filter(|t| !t.is_empty())
            .unique()
            .collect();

        Some(ArticleCandidate {
            url_domain: url_domain(&url),
            title,
            published_date,
            author: raw.author.map(|a| clean_author(&a)).filter(|a| !a.is_empty()),
            summary: raw
                .summary
                .or(raw.content)
                .map(|s| strip_tags(&s))
                .filter(|s| !s.is_empty()),
            tags,
            source_feed_url: self.feed_url.clone(),
            url,
        })
    }
}

impl Iterator for FeedEntries<'_> {
    type Item = Result<ArticleCandidate, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    let message = format!("{e} at byte {}", self.reader.buffer_position());
                    return self.malformed(message);
                }
            };
            match event {
                Event::Start(e) => {
                    self.depth += 1;
                    let name = local_name(&e);
                    if name == "item" || name == "entry" {
                        self.index += 1;
                        match self.read_entry() {
                            Ok(raw) => {
                                if let Some(candidate) = self.candidate(raw) {
                                    return Some(Ok(candidate));
                                }
                            }
                            Err(message) => return self.malformed(message),
                        }
                    }
                }
                Event::End(_) => {
                    self.depth = self.depth.saturating_sub(1);
                }
                Event::Eof => {
                    self.done = true;
                    if self.depth > 0 {
                        return self.malformed("unexpected end of document".to_string());
                    }
                    return None;
                }
                _ => {}
            }
        }
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key.as_bytes())
        .map(|attr| unescape_text(&String::from_utf8_lossy(&attr.value)).into_owned())
}

/// Attribute-carried fields of direct entry children (Atom links, category terms, guid flags).
fn read_entry_attributes(entry: &mut RawEntry, name: &str, e: &BytesStart<'_>) {
    match name {
        "link" => {
            if let Some(href) = attribute(e, "href").filter(|h| !h.trim().is_empty()) {
                let rel = attribute(e, "rel").unwrap_or_else(|| "alternate".to_string());
                if rel == "alternate" && entry.alternate_link.is_none() {
                    entry.alternate_link = Some(href.clone());
                }
                entry.any_link.get_or_insert(href);
            }
        }
        "category" => {
            if let Some(term) = attribute(e, "term").or_else(|| attribute(e, "label")) {
                entry.tags.push(term);
            }
        }
        "guid" => {
            entry.guid_is_permalink = attribute(e, "isPermaLink")
                .map(|v| !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true);
        }
        _ => {}
    }
}

fn collects_text(stack: &[String]) -> bool {
    match stack {
        [] => false,
        [first, rest @ ..] if first == "author" => rest.is_empty() || rest[0] == "name",
        _ => true,
    }
}

fn assign_field(entry: &mut RawEntry, name: &str, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    let text = text.to_string();
    match name {
        "title" => {
            entry.title.get_or_insert(text);
        }
        "link" => {
            entry.link.get_or_insert(text);
        }
        "guid" | "id" => {
            entry.guid.get_or_insert(text);
        }
        "pubDate" | "published" | "date" | "issued" => {
            entry.published.get_or_insert(text);
        }
        "updated" | "modified" => {
            entry.updated.get_or_insert(text);
        }
        "author" | "creator" => {
            entry.author.get_or_insert(text);
        }
        "description" | "summary" => {
            entry.summary.get_or_insert(text);
        }
        "content" | "encoded" => {
            entry.content.get_or_insert(text);
        }
        "category" | "subject" => entry.tags.push(text),
        _ => {}
    }
}

fn unescape_text(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    match quick_xml::escape::unescape(raw) {
        Ok(unescaped) => Cow::Owned(unescaped.into_owned()),
        Err(_) => Cow::Borrowed(raw),
    }
}

/// Resolve an entity reference name (without `&` and `;`).
fn resolve_entity(name: &str) -> String {
    if let Some(code) = name.strip_prefix('#') {
        let parsed = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        if let Some(c) = parsed.and_then(char::from_u32) {
            return c.to_string();
        }
    }
    let resolved = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "ndash" => "–",
        "mdash" => "—",
        "hellip" => "…",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        _ => return format!("&{name};"),
    };
    resolved.to_string()
}

/// Download a feed document. `file://` URLs are read from disk.
#[instrument(level = "info", skip(client), fields(%url))]
pub async fn fetch_feed_document(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<String, FeedError> {
    let download_error = |message: String| FeedError::Download {
        url: url.to_string(),
        message,
    };

    if url.starts_with("file://") {
        let path = url::Url::parse(url)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| download_error("invalid file URL".to_string()))?;
        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| download_error(e.to_string()))?;
        info!(bytes = body.len(), "Read local feed");
        return Ok(body);
    }

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| download_error(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        warn!(status = status.as_u16(), "Feed download returned non-success status");
        return Err(download_error(format!("HTTP status {}", status.as_u16())));
    }
    let body = response.text().await.map_err(|e| download_error(e.to_string()))?;
    info!(bytes = body.len(), "Downloaded feed");
    Ok(body)
}
