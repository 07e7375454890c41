//! Error classification for retry decisions
//!
//! A failure is retryable only when its rendered text matches the configured
//! [`ErrorMatch`]. Everything else is an application error and must surface
//! on first occurrence.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Known transient failures of the remote evaluation channel.
pub const DEFAULT_ERROR_MATCH: [&str; 3] = [
    "context or browser has been closed",
    "Promise was collected",
    "Execution context was destroyed",
];

/// Which failures count as transient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ErrorMatchRepr", into = "ErrorMatchRepr")]
pub enum ErrorMatch {
    /// Case-insensitive substring
    Exact(String),
    /// Case-insensitive substring, any of
    AnyOf(Vec<String>),
    /// Regular expression, with its own case sensitivity
    Pattern(Regex),
}

impl ErrorMatch {
    pub fn exact(text: impl Into<String>) -> Self {
        ErrorMatch::Exact(text.into())
    }

    pub fn any_of<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ErrorMatch::AnyOf(items.into_iter().map(Into::into).collect())
    }

    /// Compile `pattern` into a [`ErrorMatch::Pattern`].
    pub fn pattern(pattern: &str) -> Result<Self, regex_lite::Error> {
        Regex::new(pattern).map(ErrorMatch::Pattern)
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            ErrorMatch::Exact(needle) => contains_ignore_case(text, needle),
            ErrorMatch::AnyOf(needles) => needles
                .iter()
                .any(|needle| contains_ignore_case(text, needle)),
            ErrorMatch::Pattern(re) => re.is_match(text),
        }
    }
}

impl Default for ErrorMatch {
    fn default() -> Self {
        ErrorMatch::any_of(DEFAULT_ERROR_MATCH)
    }
}

impl PartialEq for ErrorMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ErrorMatch::Exact(a), ErrorMatch::Exact(b)) => a == b,
            (ErrorMatch::AnyOf(a), ErrorMatch::AnyOf(b)) => a == b,
            (ErrorMatch::Pattern(a), ErrorMatch::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl From<&str> for ErrorMatch {
    fn from(text: &str) -> Self {
        ErrorMatch::exact(text)
    }
}

impl From<String> for ErrorMatch {
    fn from(text: String) -> Self {
        ErrorMatch::Exact(text)
    }
}

impl From<Vec<String>> for ErrorMatch {
    fn from(items: Vec<String>) -> Self {
        ErrorMatch::AnyOf(items)
    }
}

impl From<Vec<&str>> for ErrorMatch {
    fn from(items: Vec<&str>) -> Self {
        ErrorMatch::any_of(items)
    }
}

impl From<Regex> for ErrorMatch {
    fn from(re: Regex) -> Self {
        ErrorMatch::Pattern(re)
    }
}

/// On-disk form: `"text"`, `["a", "b"]` or `{ pattern = "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ErrorMatchRepr {
    Exact(String),
    AnyOf(Vec<String>),
    Pattern { pattern: String },
}

impl TryFrom<ErrorMatchRepr> for ErrorMatch {
    type Error = String;

    fn try_from(repr: ErrorMatchRepr) -> Result<Self, Self::Error> {
        match repr {
            ErrorMatchRepr::Exact(text) => Ok(ErrorMatch::Exact(text)),
            ErrorMatchRepr::AnyOf(items) => Ok(ErrorMatch::AnyOf(items)),
            ErrorMatchRepr::Pattern { pattern } => ErrorMatch::pattern(&pattern)
                .map_err(|err| format!("invalid error_match pattern '{pattern}': {err}")),
        }
    }
}

impl From<ErrorMatch> for ErrorMatchRepr {
    fn from(value: ErrorMatch) -> Self {
        match value {
            ErrorMatch::Exact(text) => ErrorMatchRepr::Exact(text),
            ErrorMatch::AnyOf(items) => ErrorMatchRepr::AnyOf(items),
            ErrorMatch::Pattern(re) => ErrorMatchRepr::Pattern {
                pattern: re.as_str().to_string(),
            },
        }
    }
}

/// Whether the rendered failure `text` is retryable under `pattern`.
pub fn matches(text: &str, pattern: &ErrorMatch) -> bool {
    pattern.is_match(text)
}

/// Human-readable form of a failure.
pub fn stringify(error: &dyn fmt::Display) -> String {
    error.to_string()
}

/// Message of `error` followed by its `source()` chain, joined with `": "`.
pub fn stringify_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        // wrappers that format `{source}` into their own message already carry it
        if !rendered.ends_with(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}

/// Render an arbitrary value: strings as-is, everything else as JSON.
///
/// Falls back to the type name when the value cannot be serialized.
pub fn stringify_value<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(text)) => text,
        Ok(other) => other.to_string(),
        Err(_) => format!("<{}>", std::any::type_name::<T>()),
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
