//! Data models for extracted article metadata and per-URL outcomes.
//!
//! - [`ArticleRecord`]: the canonical six-field metadata record
//! - [`ProcessingResult`]: what the pipeline reports for one input URL
//! - [`ExtractionPayload`]: the bounded payload sent to the metadata model
//! - [`PartialRecord`]: field hints gathered from markup before the model call

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Literals that models and markup use for "no value". They always collapse to
/// the empty string, for every field.
const UNKNOWN_LITERALS: &[&str] = &[
    "unknown",
    "n/a",
    "na",
    "none",
    "null",
    "undefined",
    "not available",
];

/// Return `""` for placeholder literals, otherwise the trimmed input.
pub fn collapse_unknown(value: &str) -> String {
    let trimmed = value.trim();
    if UNKNOWN_LITERALS.iter().any(|u| trimmed.eq_ignore_ascii_case(u)) {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Extracted metadata for one article.
///
/// Every field is always present. An unknown value is the empty string, never
/// a placeholder such as `"unknown"`. `updated_at` mirrors `published_at` when
/// the source has no separate update time; [`ArticleRecord::finalize`] enforces
/// that.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(alias = "author", deserialize_with = "lenient_string")]
    pub authors: String,
    #[serde(deserialize_with = "lenient_string")]
    pub source: String,
    #[serde(deserialize_with = "lenient_string")]
    pub article_text: String,
    #[serde(alias = "published_date", alias = "published", deserialize_with = "lenient_string")]
    pub published_at: String,
    #[serde(
        alias = "updated_date",
        alias = "modified_date",
        alias = "updated",
        deserialize_with = "lenient_string"
    )]
    pub updated_at: String,
}

impl ArticleRecord {
    /// Collapse placeholder literals in every field, without mirroring dates.
    pub fn collapse_placeholders(self) -> Self {
        self.map_fields(collapse_unknown)
    }

    /// Collapse placeholders and make `updated_at` fall back to `published_at`.
    pub fn finalize(self) -> Self {
        let mut record = self.collapse_placeholders();
        if record.updated_at.is_empty() {
            record.updated_at = record.published_at.clone();
        }
        record
    }

    /// Apply `f` to every text field.
    pub fn map_fields(mut self, f: impl Fn(&str) -> String) -> Self {
        self.title = f(&self.title);
        self.authors = f(&self.authors);
        self.source = f(&self.source);
        self.article_text = f(&self.article_text);
        self.published_at = f(&self.published_at);
        self.updated_at = f(&self.updated_at);
        self
    }

    /// Fill empty fields from `hints`, leaving populated fields untouched.
    pub fn backfill(mut self, hints: &PartialRecord) -> Self {
        fn fill(slot: &mut String, hint: &Option<String>) {
            if slot.trim().is_empty() {
                if let Some(h) = hint.as_deref().filter(|h| !h.trim().is_empty()) {
                    *slot = h.trim().to_string();
                }
            }
        }
        fill(&mut self.title, &hints.title);
        fill(&mut self.authors, &hints.authors);
        fill(&mut self.source, &hints.source);
        fill(&mut self.article_text, &hints.article_text);
        fill(&mut self.published_at, &hints.published_at);
        fill(&mut self.updated_at, &hints.updated_at);
        self
    }
}

/// Accepts a string, `null`, a missing key, or an array of strings (joined
/// with `", "`). Anything else fails validation.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Text(String),
        List(Vec<String>),
        Missing(Option<()>),
    }

    Ok(match Lenient::deserialize(deserializer)? {
        Lenient::Text(s) => collapse_unknown(&s),
        Lenient::List(items) => items
            .iter()
            .map(|s| collapse_unknown(s))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Lenient::Missing(_) => String::new(),
    })
}

/// Field hints gathered from JSON-LD and meta tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialRecord {
    pub title: Option<String>,
    pub authors: Option<String>,
    pub source: Option<String>,
    pub article_text: Option<String>,
    pub published_at: Option<String>,
    pub updated_at: Option<String>,
}

impl PartialRecord {
    /// Keep fields already set on `self`, take the rest from `other`.
    pub fn or(self, other: PartialRecord) -> PartialRecord {
        PartialRecord {
            title: self.title.or(other.title),
            authors: self.authors.or(other.authors),
            source: self.source.or(other.source),
            article_text: self.article_text.or(other.article_text),
            published_at: self.published_at.or(other.published_at),
            updated_at: self.updated_at.or(other.updated_at),
        }
    }
}

/// Outcome category for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    SuccessUrlOnly,
    ErrorInvalidUrl,
    ErrorFetch,
    ErrorExtract,
}

impl Status {
    pub fn is_error(self) -> bool {
        matches!(self, Status::ErrorInvalidUrl | Status::ErrorFetch | Status::ErrorExtract)
    }
}

/// What the pipeline reports for one input URL.
///
/// `record` is `Some` only for success statuses and `error_detail` only for
/// error statuses; the constructors are the only way the pipeline builds one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub url: String,
    pub record: Option<ArticleRecord>,
    pub status: Status,
    pub strategy_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ProcessingResult {
    pub fn success(url: &str, record: ArticleRecord, strategy: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            record: Some(record),
            status: Status::Success,
            strategy_used: strategy.into(),
            error_detail: None,
        }
    }

    pub fn url_only(url: &str, record: ArticleRecord, strategy: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            record: Some(record),
            status: Status::SuccessUrlOnly,
            strategy_used: strategy.into(),
            error_detail: None,
        }
    }

    pub fn failure(
        url: &str,
        status: Status,
        strategy: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        debug_assert!(status.is_error());
        Self {
            url: url.to_string(),
            record: None,
            status,
            strategy_used: strategy.into(),
            error_detail: Some(detail.into()),
        }
    }
}

/// Bounded payload sent to the metadata model.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionPayload {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_blocks: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
}
