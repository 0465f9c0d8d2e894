//! Filename conventions.
//!
//! `[Author, Other Author] Title {Narrator}` - authors in the first square
//! brackets, narrators in the first braces, each comma-separated.

use regex::Regex;
use std::sync::LazyLock;

static AUTHOR_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(.*?)\]").unwrap());
static NARRATOR_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(.*?)\}").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SERIES_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.*?)[\s,]*(?:#|\b(?:book|vol\.?|volume)\s*)(\d+(?:\.\d+)?)\s*$").unwrap()
});

/// Split a comma-separated name list, trimming and dropping empties.
pub fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Names from the first `[...]` group.
pub fn authors_from(seed: &str) -> Vec<String> {
    AUTHOR_PATTERN
        .captures(seed)
        .and_then(|c| c.get(1))
        .map(|m| split_names(m.as_str()))
        .unwrap_or_default()
}

/// Names from the first `{...}` group.
pub fn narrators_from(seed: &str) -> Vec<String> {
    NARRATOR_PATTERN
        .captures(seed)
        .and_then(|c| c.get(1))
        .map(|m| split_names(m.as_str()))
        .unwrap_or_default()
}

/// Remove the first author and narrator groups and collapse whitespace.
pub fn strip_markers(seed: &str) -> String {
    let without_authors = AUTHOR_PATTERN.replace(seed, " ");
    let without_narrators = NARRATOR_PATTERN.replace(&without_authors, " ");
    WHITESPACE
        .replace_all(&without_narrators, " ")
        .trim()
        .to_string()
}

/// Split `"Name #3"`, `"Name, Book 3"` or `"Name Vol. 3"` into name and number.
pub fn split_series_number(raw: &str) -> (String, Option<f64>) {
    let raw = raw.trim();
    if let Some(caps) = SERIES_NUMBER.captures(raw) {
        let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let number = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
        if !name.is_empty() && number.is_some() {
            return (name.to_string(), number);
        }
    }
    (raw.to_string(), None)
}
