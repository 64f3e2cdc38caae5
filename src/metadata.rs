//! Schema-validated metadata extraction.
//!
//! The bounded [`ExtractionPayload`] is sent as the user message of a chat
//! request constrained by [`record_schema`]. Replies are parsed strictly and
//! retried when they do not validate. A validated reply is then normalized:
//! mojibake repaired, dates put in ISO-8601, empty fields back-filled from the
//! page's own markup, and the body bounded.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::api::{AskAsync, ChatPrompt, RetryAsk};
use crate::error::{ApiError, ExtractError};
use crate::models::{ArticleRecord, ExtractionPayload, PartialRecord};
use crate::text::{fix_mojibake, truncate_chars};
use crate::throttle::{ThrottleLimits, millis};
use crate::utils::{looks_truncated, strip_code_fences, truncate_for_log};

const SYSTEM_PROMPT: &str = "You extract metadata from a news article. \
The user message is JSON with the article URL, optional schema.org JSON-LD blocks \
and optional body text. Return only a JSON object with the keys title, authors, source, \
article_text, published_at, updated_at.\n\
- authors: every author name, comma-separated.\n\
- source: the publisher name.\n\
- article_text: the article body as plain text, without navigation, promotions or related links.\n\
- published_at / updated_at: ISO-8601 timestamps. If only one date is available, use it for both. \
If several dates appear, the earliest is published_at and the latest is updated_at.\n\
Do not make up any data. Use an empty string for anything not explicitly present.";

const RECORD_FIELDS: &[&str] = &[
    "title",
    "authors",
    "source",
    "article_text",
    "published_at",
    "updated_at",
];

/// Every key a reply may use, with the record field it fills. Legacy names
/// are accepted in place of the canonical ones.
const FIELD_KEYS: &[(&str, &str)] = &[
    ("title", "title"),
    ("authors", "authors"),
    ("author", "authors"),
    ("source", "source"),
    ("article_text", "article_text"),
    ("published_at", "published_at"),
    ("published_date", "published_at"),
    ("published", "published_at"),
    ("updated_at", "updated_at"),
    ("updated_date", "updated_at"),
    ("modified_date", "updated_at"),
    ("updated", "updated_at"),
];

fn field_for(key: &str) -> Option<&'static str> {
    FIELD_KEYS.iter().find(|(k, _)| *k == key).map(|(_, field)| *field)
}

/// JSON schema for [`ArticleRecord`] sent with every request.
pub fn record_schema() -> Value {
    let properties: serde_json::Map<String, Value> = RECORD_FIELDS
        .iter()
        .map(|f| (f.to_string(), json!({ "type": ["string", "null"] })))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": RECORD_FIELDS,
        "additionalProperties": false,
    })
}

/// Settings for the remote metadata channel.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetadataConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub max_attempts: usize,
    #[serde(with = "millis")]
    pub retry_base_delay: Duration,
    /// Upper bound on `article_text` in characters.
    pub article_char_limit: usize,
    pub throttle: ThrottleLimits,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "ARTICLE_LLM_API_KEY".to_string(),
            request_timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            article_char_limit: 32_750,
            throttle: ThrottleLimits::default(),
        }
    }
}

/// Parse and validate one model reply against [`record_schema`].
///
/// The reply must be a JSON object (optionally inside a Markdown fence) that
/// carries every record field exactly once, under its name or a legacy alias,
/// with a string or null value, and no other keys.
pub fn parse_reply(text: &str) -> Result<ArticleRecord, ApiError> {
    let body = strip_code_fences(text);
    let value: Value = serde_json::from_str(body).map_err(|e| {
        let kind = if looks_truncated(&e) {
            "truncated JSON"
        } else {
            "invalid JSON"
        };
        ApiError::Malformed(format!("{kind}: {e}"))
    })?;

    let Some(object) = value.as_object() else {
        return Err(ApiError::Malformed("reply is not a JSON object".to_string()));
    };

    let mut seen: Vec<&str> = Vec::with_capacity(RECORD_FIELDS.len());
    for (key, field_value) in object {
        let Some(field) = field_for(key) else {
            return Err(ApiError::Malformed(format!("unexpected key '{key}'")));
        };
        if !(field_value.is_string() || field_value.is_null()) {
            return Err(ApiError::Malformed(format!("'{key}' must be a string or null")));
        }
        if seen.contains(&field) {
            return Err(ApiError::Malformed(format!("'{field}' given more than once")));
        }
        seen.push(field);
    }
    let missing: Vec<&str> = RECORD_FIELDS
        .iter()
        .copied()
        .filter(|f| !seen.contains(f))
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::Malformed(format!(
            "missing fields: {}",
            missing.join(", ")
        )));
    }

    serde_json::from_value(value).map_err(|e| ApiError::Malformed(format!("schema mismatch: {e}")))
}

/// Normalize a date or timestamp to ISO-8601.
///
/// Timestamps with an offset keep it (`+00:00` becomes `Z`), naive timestamps
/// become `YYYY-MM-DDTHH:MM:SS`, bare dates `YYYY-MM-DD`. Anything
/// unparseable becomes the empty string.
pub fn normalize_timestamp(raw: &str) -> String {
    const OFFSET_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S%z",
    ];
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%B %d, %Y %H:%M",
        "%Y%m%dT%H%M%S",
    ];
    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%m/%d/%Y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%d %B %Y",
        "%Y%m%d",
    ];

    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }

    let with_offset = DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .ok()
        .or_else(|| OFFSET_FORMATS.iter().find_map(|f| DateTime::parse_from_str(s, f).ok()));
    if let Some(dt) = with_offset {
        return format_with_offset(dt);
    }

    // a trailing Z on an otherwise naive timestamp
    let naive_input = s.strip_suffix('Z').unwrap_or(s);
    if let Some(dt) = NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(naive_input, f).ok())
    {
        let suffix = if naive_input.len() < s.len() { "Z" } else { "" };
        return format!("{}{suffix}", dt.format("%Y-%m-%dT%H:%M:%S"));
    }

    if let Some(d) = DATE_FORMATS.iter().find_map(|f| NaiveDate::parse_from_str(s, f).ok()) {
        return d.format("%Y-%m-%d").to_string();
    }

    debug!(raw = %truncate_for_log(s, 60), "Unparseable date dropped");
    String::new()
}

fn format_with_offset(dt: DateTime<FixedOffset>) -> String {
    if dt.offset().local_minus_utc() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
    }
}

/// Apply mojibake repair, placeholder collapse and date normalization to hints
/// so they can be merged into a model record field by field.
fn clean_hints(hints: &PartialRecord) -> PartialRecord {
    let text = |v: &Option<String>| {
        v.as_deref()
            .map(|s| crate::models::collapse_unknown(&fix_mojibake(s)))
            .filter(|s| !s.is_empty())
    };
    let date = |v: &Option<String>| {
        v.as_deref()
            .map(normalize_timestamp)
            .filter(|s| !s.is_empty())
    };
    PartialRecord {
        title: text(&hints.title),
        authors: text(&hints.authors),
        source: text(&hints.source),
        article_text: text(&hints.article_text),
        published_at: date(&hints.published_at),
        updated_at: date(&hints.updated_at),
    }
}

/// Metadata extraction over any [`AskAsync`] backend.
#[derive(Debug)]
pub struct MetadataExtractor<T> {
    client: RetryAsk<T>,
    article_char_limit: usize,
    /// Estimated prompt tokens of every request made so far.
    tokens_requested: AtomicU64,
}

impl<T> MetadataExtractor<T>
where
    T: AskAsync,
{
    pub fn new(client: RetryAsk<T>, article_char_limit: usize) -> Self {
        Self {
            client,
            article_char_limit,
            tokens_requested: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &T {
        self.client.inner()
    }

    /// Running estimate of prompt tokens sent, counting each request once
    /// regardless of retries.
    pub fn tokens_requested(&self) -> u64 {
        self.tokens_requested.load(Ordering::Relaxed)
    }

    /// The request for `payload`: fixed instructions, the payload as JSON and
    /// the record schema.
    pub fn prompt_for(payload: &ExtractionPayload) -> ChatPrompt {
        let user = match serde_json::to_string_pretty(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Payload serialization failed; sending URL only");
                json!({ "url": payload.url }).to_string()
            }
        };
        ChatPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
            schema: Some(record_schema()),
        }
    }

    /// Ask for a record, validate it and normalize it.
    ///
    /// `hints` fill whatever the model leaves empty; its `article_text` should
    /// already carry the reduced body when the markup had no `articleBody`.
    #[instrument(level = "info", skip_all, fields(url = %payload.url))]
    pub async fn extract(
        &self,
        payload: &ExtractionPayload,
        hints: &PartialRecord,
    ) -> Result<ArticleRecord, ExtractError> {
        let prompt = Self::prompt_for(payload);
        let est_tokens = prompt.estimated_tokens();
        self.tokens_requested.fetch_add(est_tokens, Ordering::Relaxed);
        info!(
            est_tokens,
            has_blocks = payload.structured_blocks.is_some(),
            has_body = payload.body_text.is_some(),
            "Requesting metadata"
        );

        let record = self
            .client
            .ask_parsed(&prompt, parse_reply)
            .await
            .map_err(|e| match e {
                ApiError::Malformed(last) => ExtractError::SchemaValidation {
                    attempts: self.client.max_attempts(),
                    last,
                },
                other => ExtractError::Api(other),
            })?;

        Ok(self.normalize(record, hints))
    }

    fn normalize(&self, record: ArticleRecord, hints: &PartialRecord) -> ArticleRecord {
        // no date mirroring until markup hints have had a chance to fill updated_at
        let mut record = record.map_fields(fix_mojibake).collapse_placeholders();
        record.published_at = normalize_timestamp(&record.published_at);
        record.updated_at = normalize_timestamp(&record.updated_at);

        let mut record = record.backfill(&clean_hints(hints));
        record.article_text = truncate_chars(&record.article_text, self.article_char_limit);
        record.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::ScriptedAsk;

    const VALID: &str = r#"{"title": "Egypt to host Gaza summit", "authors": "Jerome Socolovsky",
        "source": "NPR", "article_text": "Egypt announced Sunday.",
        "published_at": "2025-02-09T06:13:44-05:00", "updated_at": null}"#;

    fn extractor(replies: Vec<Result<String, ApiError>>) -> MetadataExtractor<ScriptedAsk> {
        MetadataExtractor::new(
            RetryAsk::new(ScriptedAsk::new(replies), 3, Duration::from_millis(100)),
            32_750,
        )
    }

    fn payload() -> ExtractionPayload {
        ExtractionPayload {
            url: "https://www.npr.org/2025/02/09/gaza".into(),
            structured_blocks: None,
            body_text: Some("Egypt announced Sunday.".into()),
        }
    }

    #[test]
    fn test_normalize_timestamp_formats() {
        assert_eq!(normalize_timestamp("2025-02-09T06:13:44-05:00"), "2025-02-09T06:13:44-05:00");
        assert_eq!(normalize_timestamp("2025-02-09T11:13:44.123Z"), "2025-02-09T11:13:44Z");
        assert_eq!(normalize_timestamp("2025-02-09T11:13:44+0000"), "2025-02-09T11:13:44Z");
        assert_eq!(
            normalize_timestamp("Sun, 09 Feb 2025 06:13:44 -0500"),
            "2025-02-09T06:13:44-05:00"
        );
        assert_eq!(normalize_timestamp("04/16/2025 09:28"), "2025-04-16T09:28:00");
        assert_eq!(normalize_timestamp("2025-04-16 09:28:05"), "2025-04-16T09:28:05");
        assert_eq!(normalize_timestamp("2025-04-16"), "2025-04-16");
        assert_eq!(normalize_timestamp("February 9, 2025"), "2025-02-09");
    }

    #[test]
    fn test_normalize_timestamp_unparseable_is_empty() {
        assert_eq!(normalize_timestamp(""), "");
        assert_eq!(normalize_timestamp("yesterday"), "");
        assert_eq!(normalize_timestamp("2025-13-45"), "");
    }

    #[test]
    fn test_parse_reply_validation() {
        assert!(parse_reply(VALID).is_ok());
        assert!(parse_reply(&format!("```json\n{VALID}\n```")).is_ok());
        assert!(matches!(parse_reply("not json"), Err(ApiError::Malformed(_))));
        assert!(matches!(parse_reply("[1, 2]"), Err(ApiError::Malformed(_))));
        assert!(matches!(parse_reply("{}"), Err(ApiError::Malformed(_))));
        assert!(matches!(parse_reply(r#"{"title": 42}"#), Err(ApiError::Malformed(_))));

        let err = parse_reply(r#"{"title": "cut"#).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_parse_reply_rejects_off_schema_objects() {
        let err = parse_reply(r#"{"title": "only a title", "bogus": 1}"#).unwrap_err();
        assert!(err.to_string().contains("bogus"));

        let err = parse_reply(r#"{"title": "only a title"}"#).unwrap_err();
        assert!(err.to_string().contains("missing fields"));
        assert!(err.to_string().contains("updated_at"));

        let listed = r#"{"title": "T", "authors": ["A", "B"], "source": "", "article_text": "",
            "published_at": "", "updated_at": ""}"#;
        assert!(matches!(parse_reply(listed), Err(ApiError::Malformed(_))));

        let twice = r#"{"title": "T", "author": "A", "authors": "A", "source": "",
            "article_text": "", "published_at": "", "updated_at": ""}"#;
        assert!(matches!(parse_reply(twice), Err(ApiError::Malformed(_))));
    }

    #[test]
    fn test_parse_reply_accepts_legacy_names() {
        let reply = r#"{"title": "T", "author": "Jane Doe", "source": "NPR", "article_text": "",
            "published_date": "2025-02-09", "modified_date": null}"#;
        let record = parse_reply(reply).unwrap();
        assert_eq!(record.authors, "Jane Doe");
        assert_eq!(record.published_at, "2025-02-09");
    }

    #[test]
    fn test_schema_lists_every_field() {
        let schema = record_schema();
        for field in RECORD_FIELDS {
            assert_eq!(schema["properties"][field]["type"][0], "string");
        }
        assert_eq!(schema["required"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_prompt_carries_payload_and_schema() {
        let prompt = MetadataExtractor::<ScriptedAsk>::prompt_for(&payload());
        assert!(prompt.user.contains("https://www.npr.org/2025/02/09/gaza"));
        assert!(prompt.user.contains("body_text"));
        assert!(!prompt.user.contains("structured_blocks"));
        assert!(prompt.schema.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_valid_reply() {
        let ex = extractor(vec![Ok(VALID.to_string())]);
        let record = ex.extract(&payload(), &PartialRecord::default()).await.unwrap();
        assert_eq!(record.title, "Egypt to host Gaza summit");
        assert_eq!(record.authors, "Jerome Socolovsky");
        assert_eq!(record.published_at, "2025-02-09T06:13:44-05:00");
        assert_eq!(record.updated_at, "2025-02-09T06:13:44-05:00");
        assert!(ex.tokens_requested() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_retries_malformed_replies() {
        let ex = extractor(vec![
            Ok("Sure! Here is the metadata".to_string()),
            Ok(r#"{"title": 5}"#.to_string()),
            Ok(VALID.to_string()),
        ]);
        let record = ex.extract(&payload(), &PartialRecord::default()).await.unwrap();
        assert_eq!(record.source, "NPR");
        assert_eq!(ex.client.inner().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_exhaustion_is_schema_validation_error() {
        let ex = extractor(vec![Ok("nope".to_string())]);
        let err = ex.extract(&payload(), &PartialRecord::default()).await.unwrap_err();
        assert!(matches!(err, ExtractError::SchemaValidation { attempts: 3, .. }));
        assert_eq!(ex.client.inner().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_client_error_is_not_retried() {
        let ex = extractor(vec![Err(ApiError::Client {
            status: 401,
            body: "bad key".into(),
        })]);
        let err = ex.extract(&payload(), &PartialRecord::default()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Api(ApiError::Client { status: 401, .. })));
        assert_eq!(ex.client.inner().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_normalizes_and_backfills() {
        let reply = r#"{"title": "CafÃ© owners protest", "authors": "Unknown", "source": "",
            "article_text": "", "published_at": "04/16/2025 09:28", "updated_at": "soon"}"#;
        let hints = PartialRecord {
            authors: Some("Jane Doe".into()),
            source: Some("Example News".into()),
            article_text: Some("Body from the page. ".repeat(10)),
            ..Default::default()
        };
        let ex = MetadataExtractor::new(
            RetryAsk::new(
                ScriptedAsk::new(vec![Ok(reply.to_string())]),
                3,
                Duration::from_millis(1),
            ),
            50,
        );
        let record = ex.extract(&payload(), &hints).await.unwrap();
        assert_eq!(record.title, "Café owners protest");
        assert_eq!(record.authors, "Jane Doe");
        assert_eq!(record.source, "Example News");
        assert_eq!(record.published_at, "2025-04-16T09:28:00");
        assert_eq!(record.updated_at, "2025-04-16T09:28:00");
        assert!(record.article_text.starts_with("Body from the page."));
        assert!(record.article_text.chars().count() <= 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_markup_update_time_is_not_masked_by_mirroring() {
        let reply = r#"{"title": "Storm", "authors": "", "source": "", "article_text": "Winds.",
            "published_at": "2024-05-01T09:00:00Z", "updated_at": ""}"#;
        let hints = PartialRecord {
            updated_at: Some("2024-05-03T12:00:00Z".into()),
            ..Default::default()
        };
        let ex = extractor(vec![Ok(reply.to_string())]);
        let record = ex.extract(&payload(), &hints).await.unwrap();
        assert_eq!(record.published_at, "2024-05-01T09:00:00Z");
        assert_eq!(record.updated_at, "2024-05-03T12:00:00Z");
    }

    #[test]
    fn test_config_defaults_from_yaml() {
        let config: MetadataConfig =
            serde_yaml::from_str("model: gemini-1.5-pro\nrequest_timeout: 5000\n").unwrap();
        assert_eq!(config.model, "gemini-1.5-pro");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.article_char_limit, 32_750);
    }
}
