//! Metadata inferred from nothing but the URL string.
//!
//! Used for origins on the denylist. Every value returned here is literally
//! present in the URL: downstream consumers read an empty string as
//! "unknown", so an invented value would silently corrupt the record. The
//! optional local model is only allowed to propose values; [`ground`] drops
//! anything the URL does not back up.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::api::{AskAsync, ChatPrompt, RetryAsk};
use crate::models::ArticleRecord;
use crate::utils::{strip_code_fences, title_case, truncate_for_log};

/// Contiguous `YYYYMMDD`, optionally followed by `THHMMSS` and `Z`, not part
/// of a longer digit run.
static RE_COMPACT_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9])((?:19|20)[0-9]{6})(?:T([0-9]{6})Z?)?(?:[^0-9]|$)").unwrap()
});

/// Slug segments that are ids or hashes rather than words.
static RE_ID_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[0-9]+|[0-9a-f]{8,}|[a-z]?[0-9][a-z0-9]*)$").unwrap());

static RE_FILE_EXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(?:html?|php|aspx?|jsp|cms|ece)$").unwrap());

/// Publisher names for hosts seen often enough to deserve a readable source.
const KNOWN_SOURCES: &[(&str, &str)] = &[
    ("reuters", "Reuters"),
    ("apnews", "AP"),
    ("washingtonpost", "The Washington Post"),
    ("afp", "AFP"),
    ("bbc", "BBC"),
    ("bloomberg", "Bloomberg"),
    ("jpost", "The Jerusalem Post"),
    ("yonhapnews", "Yonhap"),
    ("nikkei", "Nikkei"),
    ("france24", "France 24"),
];

const SYSTEM_PROMPT: &str = "You infer news article metadata from a URL alone. \
Return JSON with keys title, authors, source, article_text, published_at, updated_at. \
Only use text that literally appears in the URL. \
Leave a field empty when the URL does not contain it. \
article_text is always empty. Dates only when the URL contains a YYYYMMDD date.";

/// Rule-based record from the URL string.
pub fn infer_from_url(url: &str) -> ArticleRecord {
    let parsed = Url::parse(url.trim()).ok();
    let (published, _) = compact_date(url);
    ArticleRecord {
        title: parsed.as_ref().map(title_from_slug).unwrap_or_default(),
        authors: String::new(),
        source: parsed.as_ref().and_then(Url::host_str).map(source_from_host).unwrap_or_default(),
        article_text: String::new(),
        published_at: published.clone(),
        updated_at: published,
    }
}

/// First valid compact date in `url` as `(timestamp, yyyymmdd)`; empty when
/// absent. `YYYYMMDDTHHMMSS` yields a UTC timestamp, bare `YYYYMMDD` a date.
pub fn compact_date(url: &str) -> (String, String) {
    for caps in RE_COMPACT_DATE.captures_iter(url) {
        let digits = &caps[1];
        let Ok(date) = NaiveDate::parse_from_str(digits, "%Y%m%d") else {
            continue;
        };
        if let Some(time) = caps.get(2) {
            let stamp = format!("{digits}T{}", time.as_str());
            if let Ok(dt) = NaiveDateTime::parse_from_str(&stamp, "%Y%m%dT%H%M%S") {
                return (dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(), digits.to_string());
            }
        }
        return (date.format("%Y-%m-%d").to_string(), digits.to_string());
    }
    (String::new(), String::new())
}

/// Publisher name for a host: a known publisher when one of the host labels
/// is its key, else the label before the public suffix
/// (`www.example.co.uk` → `example`).
pub fn source_from_host(host: &str) -> String {
    let labels = host_labels(host);
    if let Some((_, name)) = KNOWN_SOURCES
        .iter()
        .find(|(key, _)| labels.iter().any(|l| l.as_str() == *key))
    {
        return name.to_string();
    }
    let names: Vec<&str> = labels
        .iter()
        .map(String::as_str)
        .filter(|l| *l != "www")
        .collect();
    let second_level = ["co", "com", "org", "net", "gov", "ac", "ne", "or"];
    match names.as_slice() {
        [] => String::new(),
        [only] => only.to_string(),
        [.., name, sld, _tld] if second_level.contains(sld) => name.to_string(),
        [.., name, _tld] => name.to_string(),
    }
}

fn host_labels(host: &str) -> Vec<String> {
    host.split('.')
        .filter(|l| !l.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Title from the most word-like path segment, or empty.
fn title_from_slug(url: &Url) -> String {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let best = segments
        .iter()
        .rev()
        .map(|seg| slug_words(seg))
        .find(|words| words.len() >= 2);

    best.map(|words| title_case(&words.join(" "))).unwrap_or_default()
}

fn slug_words(segment: &str) -> Vec<String> {
    let decoded = urlencoding::decode(segment)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let stem = RE_FILE_EXT.replace(&decoded, "");
    stem.split(['-', '_', '+', ' ', '.'])
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty() && !RE_ID_TOKEN.is_match(w))
        .collect()
}

/// Lowercased alphanumeric words of `s`.
fn words(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Keep only the parts of a model-proposed record that the URL backs up.
///
/// - `title` / `authors` survive when every word of them occurs in the URL
/// - `source` survives when it is the host's own publisher name, or when
///   every word of it is a whole label of the host
/// - dates always come from the URL itself, never from the model
/// - `article_text` is always cleared
///
/// Rejected fields fall back to the rule-based value from [`infer_from_url`].
pub fn ground(url: &str, proposed: ArticleRecord) -> ArticleRecord {
    let fallback = infer_from_url(url);
    let decoded = urlencoding::decode(url)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| url.to_string());
    let url_words = words(&decoded);
    let host = Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let labels = host_labels(&host);
    let in_url = |s: &str| {
        let w = words(s);
        !w.is_empty() && w.iter().all(|w| url_words.contains(w))
    };

    let pick = |value: String, ok: bool, fallback: String| if ok { value } else { fallback };

    let title_ok = in_url(&proposed.title);
    let authors_ok = in_url(&proposed.authors);
    let source_words = words(&proposed.source);
    let source_ok = !source_words.is_empty()
        && (proposed.source.trim().eq_ignore_ascii_case(&fallback.source)
            || source_words.iter().all(|w| labels.contains(w)));

    ArticleRecord {
        title: pick(proposed.title, title_ok, fallback.title),
        authors: pick(proposed.authors, authors_ok, fallback.authors),
        source: pick(proposed.source, source_ok, fallback.source),
        article_text: String::new(),
        published_at: fallback.published_at,
        updated_at: fallback.updated_at,
    }
    .finalize()
}

/// URL-only inference, optionally assisted by a local model.
#[derive(Debug)]
pub struct UrlInference<T> {
    model: Option<(RetryAsk<T>, String)>,
}

impl<T> UrlInference<T>
where
    T: AskAsync,
{
    /// Rule-based inference only.
    pub fn rules_only() -> Self {
        Self { model: None }
    }

    /// Ask `client` first; `label` names it in `strategy_used`.
    pub fn with_model(client: RetryAsk<T>, label: impl Into<String>) -> Self {
        Self {
            model: Some((client, label.into())),
        }
    }

    /// Record plus the label of whatever produced it. Never fails: a model
    /// error falls back to the rule-based record.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn infer(&self, url: &str) -> (ArticleRecord, String) {
        let Some((client, label)) = &self.model else {
            return (infer_from_url(url), "url_only:rules".to_string());
        };

        let prompt = ChatPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user: url.to_string(),
            schema: None,
        };
        let reply = client
            .ask_parsed(&prompt, |text| {
                serde_json::from_str::<ArticleRecord>(strip_code_fences(text))
                    .map_err(|e| crate::error::ApiError::Malformed(e.to_string()))
            })
            .await;

        match reply {
            Ok(proposed) => {
                let grounded = ground(url, proposed);
                debug!(title = %truncate_for_log(&grounded.title, 80), "Grounded URL-only record");
                (grounded, format!("url_only:{label}"))
            }
            Err(e) => {
                warn!(error = %e, "URL model failed; using rule-based inference");
                (infer_from_url(url), "url_only:rules".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::ScriptedAsk;
    use std::time::Duration;

    #[test]
    fn test_slashed_date_is_not_a_compact_date() {
        let record = infer_from_url("https://example.com/2024/05/01/my-headline");
        assert_eq!(record.title, "My Headline");
        assert_eq!(record.source, "example");
        assert_eq!(record.published_at, "");
        assert_eq!(record.updated_at, "");
        assert_eq!(record.article_text, "");
        assert_eq!(record.authors, "");
    }

    #[test]
    fn test_compact_date_is_used() {
        let record = infer_from_url("https://www.reuters.com/world/story-name-idUS20250127abc");
        assert_eq!(record.source, "Reuters");
        let record = infer_from_url("https://example.com/news/20240501/big-storm-hits-coast");
        assert_eq!(record.published_at, "2024-05-01");
        assert_eq!(record.updated_at, "2024-05-01");
        assert_eq!(record.title, "Big Storm Hits Coast");
    }

    #[test]
    fn test_timestamped_id_gives_full_timestamp() {
        let (stamp, digits) = compact_date("https://news.afp.com/#/c/doc.afp.com.20250416T170321Z");
        assert_eq!(stamp, "2025-04-16T17:03:21Z");
        assert_eq!(digits, "20250416");
    }

    #[test]
    fn test_invalid_or_embedded_digits_are_not_dates() {
        assert_eq!(compact_date("https://x.com/a/20241345/b").0, "");
        assert_eq!(compact_date("https://x.com/a/1202405011/b").0, "");
        assert_eq!(compact_date("https://x.com/a/2024-05-01/b").0, "");
    }

    #[test]
    fn test_title_skips_ids_and_extensions() {
        let record = infer_from_url(
            "https://www.cnn.com/2025/01/27/politics/trump-special-project/index.html",
        );
        assert_eq!(record.title, "Trump Special Project");
        let record = infer_from_url("https://example.com/story/a1b2c3d4e5");
        assert_eq!(record.title, "");
    }

    #[test]
    fn test_source_from_host() {
        assert_eq!(source_from_host("www.bbc.co.uk"), "BBC");
        assert_eq!(source_from_host("doc.afp.com"), "AFP");
        assert_eq!(source_from_host("www.lemonde.fr"), "lemonde");
        assert_eq!(source_from_host("news.example.co.uk"), "example");
        assert_eq!(source_from_host("localhost"), "localhost");
    }

    #[test]
    fn test_known_source_needs_whole_label() {
        assert_eq!(source_from_host("www.bbcgoodfood.com"), "bbcgoodfood");
        assert_eq!(source_from_host("safpress.org"), "safpress");
    }

    #[test]
    fn test_ground_rejects_source_not_in_host() {
        let url = "https://example.com/news/storm-hits-coast";
        let proposed = ArticleRecord {
            source: "A Totally Invented Publisher".into(),
            ..Default::default()
        };
        assert_eq!(ground(url, proposed).source, "example");

        let proposed = ArticleRecord {
            source: "Example Daily".into(),
            ..Default::default()
        };
        assert_eq!(ground(url, proposed).source, "example");
    }

    #[test]
    fn test_ground_accepts_publisher_name_of_host() {
        let url = "https://www.washingtonpost.com/world/2025/01/27/gaza-talks/";
        let proposed = ArticleRecord {
            source: "The Washington Post".into(),
            ..Default::default()
        };
        assert_eq!(ground(url, proposed).source, "The Washington Post");

        let proposed = ArticleRecord {
            source: "washingtonpost".into(),
            ..Default::default()
        };
        assert_eq!(ground(url, proposed).source, "washingtonpost");
    }

    #[test]
    fn test_ground_drops_fabricated_values() {
        let url = "https://example.com/2024/05/01/my-headline";
        let proposed = ArticleRecord {
            title: "My Headline Explained".into(),
            authors: "John Smith".into(),
            source: "Example".into(),
            article_text: "Made up body".into(),
            published_at: "2024-05-01".into(),
            updated_at: "2024-05-01".into(),
        };
        let grounded = ground(url, proposed);
        assert_eq!(grounded.title, "My Headline");
        assert_eq!(grounded.authors, "");
        assert_eq!(grounded.source, "Example");
        assert_eq!(grounded.article_text, "");
        assert_eq!(grounded.published_at, "");
        assert_eq!(grounded.updated_at, "");
    }

    #[test]
    fn test_ground_keeps_backed_values() {
        let url = "https://example.com/news/20240501/jane-doe-wins-award";
        let proposed = ArticleRecord {
            title: "Jane Doe Wins Award".into(),
            authors: "".into(),
            source: "example".into(),
            article_text: "".into(),
            published_at: "2024-05-01".into(),
            updated_at: "".into(),
        };
        let grounded = ground(url, proposed);
        assert_eq!(grounded.title, "Jane Doe Wins Award");
        assert_eq!(grounded.source, "example");
        assert_eq!(grounded.published_at, "2024-05-01");
        assert_eq!(grounded.updated_at, "2024-05-01");
    }

    #[test]
    fn test_ground_dates_come_only_from_url() {
        let url = "https://example.com/news/20240501/storm-hits-coast";
        let proposed = ArticleRecord {
            published_at: "2024-05-01T23:59:59".into(),
            updated_at: "2024-05-02".into(),
            ..Default::default()
        };
        let grounded = ground(url, proposed);
        assert_eq!(grounded.published_at, "2024-05-01");
        assert_eq!(grounded.updated_at, "2024-05-01");

        let url = "https://news.afp.com/#/c/doc.afp.com.20250416T170321Z";
        let proposed = ArticleRecord {
            published_at: "2025-04-16T09:00:00Z".into(),
            ..Default::default()
        };
        let grounded = ground(url, proposed);
        assert_eq!(grounded.published_at, "2025-04-16T17:03:21Z");
        assert_eq!(grounded.updated_at, grounded.published_at);
    }

    #[tokio::test]
    async fn test_rules_only_label() {
        let inference: UrlInference<ScriptedAsk> = UrlInference::rules_only();
        let (record, label) = inference.infer("https://example.com/some-story-here").await;
        assert_eq!(label, "url_only:rules");
        assert_eq!(record.title, "Some Story Here");
    }

    #[tokio::test]
    async fn test_model_reply_is_grounded() {
        let ask = ScriptedAsk::new(vec![Ok(
            r#"```json
            {"title": "Some Story Here", "authors": "Ghost Writer", "source": "example",
             "article_text": "invented", "published_at": "2023-01-01", "updated_at": ""}
            ```"#
                .to_string(),
        )]);
        let client = RetryAsk::new(ask, 3, Duration::from_millis(1));
        let inference = UrlInference::with_model(client, "link-parser");
        let (record, label) = inference.infer("https://example.com/some-story-here").await;
        assert_eq!(label, "url_only:link-parser");
        assert_eq!(record.title, "Some Story Here");
        assert_eq!(record.authors, "");
        assert_eq!(record.article_text, "");
        assert_eq!(record.published_at, "");
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_rules() {
        let ask = ScriptedAsk::new(vec![Err(crate::error::ApiError::Client {
            status: 404,
            body: "model not found".into(),
        })]);
        let client = RetryAsk::new(ask, 3, Duration::from_millis(1));
        let inference = UrlInference::with_model(client, "link-parser");
        let (record, label) = inference.infer("https://example.com/some-story-here").await;
        assert_eq!(label, "url_only:rules");
        assert_eq!(record.title, "Some Story Here");
    }
}
