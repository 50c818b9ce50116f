//! Utility functions for string cleanup, URL normalization and file system checks.
//!
//! This module provides helper functions used throughout the pipeline:
//! - String truncation for logging
//! - Whitespace and markup cleanup for feed fields
//! - Local-path to `file://` URL conversion for start URLs
//! - Output directory validation

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to at most `max` bytes (on a character
/// boundary) with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

/// Remove markup tags from a feed field and collapse whitespace.
pub fn strip_tags(s: &str) -> String {
    collapse_whitespace(&TAGS.replace_all(s, " "))
}

/// Clean an author field: collapse whitespace and drop a leading "By ".
pub fn clean_author(s: &str) -> String {
    let author = collapse_whitespace(s);
    match author.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("by ") => author[3..].trim_start().to_string(),
        _ => author,
    }
}

/// Turn a configured start URL into something fetchable.
///
/// `http(s)://` and `file://` URLs pass through untouched; anything else is
/// treated as a local path and converted to an absolute `file://` URL.
pub fn normalize_start_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") || raw.starts_with("file://") {
        return raw.to_string();
    }
    let path = Path::new(raw);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    url::Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("file://{}", absolute.display()))
}

/// Ensure the parent directory of `file_path` exists and is writable.
///
/// Creates the directory if needed, then writes and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %file_path.display()))]
pub async fn ensure_parent_writable(file_path: &Path) -> Result<(), Box<dyn Error>> {
    let dir = match file_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&dir).await?;
    let scratch = dir.join("..__write_check__");
    fs::write(&scratch, b"").await?;
    let _ = fs::remove_file(&scratch).await;
    info!(dir = %dir.display(), "Storage directory is writable");
    Ok(())
}
