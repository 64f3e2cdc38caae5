//! JSON-LD and meta-tag extraction.
//!
//! Structured metadata blocks are parsed one by one; a malformed block is
//! skipped, never fatal. The presence or absence of any block is itself a
//! signal to the metadata model, so [`extract`] returns `None` when there are
//! none.

use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::PartialRecord;
use crate::text::scrub_text;

static LD_JSON: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());
static META: Lazy<Selector> = Lazy::new(|| Selector::parse("meta[content]").unwrap());

/// Parsed JSON-LD blocks plus the page's paragraph text.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredData {
    pub blocks: Vec<Value>,
    pub visible_text: String,
}

/// Parse every JSON-LD block in `document` and gather paragraph text.
///
/// Returns `None` when no block parses.
pub fn extract(document: &Html) -> Option<StructuredData> {
    let mut blocks = Vec::new();
    for script in document.select(&LD_JSON) {
        let raw = script.text().collect::<String>();
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => blocks.push(value),
            Err(e) => warn!(error = %e, "Skipping malformed JSON-LD block"),
        }
    }

    if blocks.is_empty() {
        debug!("No JSON-LD blocks found");
        return None;
    }

    let visible_text = scrub_text(
        &document
            .select(&PARAGRAPH)
            .map(|p| p.text().collect::<String>())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .join(" "),
    );

    debug!(blocks = blocks.len(), text_chars = visible_text.len(), "Extracted structured data");
    Some(StructuredData { blocks, visible_text })
}

/// Field hints from JSON-LD blocks.
///
/// Objects typed `*Article` (NewsArticle, ReportageNewsArticle, ...) win over
/// other typed nodes. Top-level arrays and `@graph` containers are flattened.
pub fn hints(blocks: &[Value]) -> PartialRecord {
    let mut nodes: Vec<&Value> = Vec::new();
    for block in blocks {
        flatten_nodes(block, &mut nodes);
    }
    let (articles, others): (Vec<&Value>, Vec<&Value>) =
        nodes.into_iter().partition(|n| is_article(n));

    articles
        .iter()
        .chain(others.iter())
        .map(|node| node_hints(node))
        .fold(PartialRecord::default(), PartialRecord::or)
}

/// Field hints from `<meta>` tags: OpenGraph, article:* and itemprop dates.
pub fn meta_hints(document: &Html) -> PartialRecord {
    let mut hints = PartialRecord::default();
    for meta in document.select(&META) {
        let el = meta.value();
        let key = el
            .attr("property")
            .or_else(|| el.attr("name"))
            .or_else(|| el.attr("itemprop"))
            .unwrap_or_default()
            .to_ascii_lowercase();
        let Some(content) = el.attr("content").map(str::trim).filter(|c| !c.is_empty()) else {
            continue;
        };
        let slot = match key.as_str() {
            "og:title" => &mut hints.title,
            "og:site_name" => &mut hints.source,
            "author" | "article:author" if !content.starts_with("http") => &mut hints.authors,
            "article:published_time" | "datepublished" | "pubdate" | "publish-date" => {
                &mut hints.published_at
            }
            "article:modified_time" | "datemodified" | "lastmod" | "last-modified" => {
                &mut hints.updated_at
            }
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(content.to_string());
        }
    }
    hints
}

fn flatten_nodes<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| flatten_nodes(v, out)),
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                flatten_nodes(graph, out);
            }
            if map.contains_key("@type") {
                out.push(value);
            }
        }
        _ => {}
    }
}

fn type_names(node: &Value) -> Vec<&str> {
    match node.get("@type") {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn is_article(node: &Value) -> bool {
    type_names(node).iter().any(|t| t.ends_with("Article") || *t == "BlogPosting")
}

fn node_hints(node: &Value) -> PartialRecord {
    PartialRecord {
        title: str_field(node, "headline").or_else(|| {
            if is_article(node) { str_field(node, "name") } else { None }
        }),
        authors: node.get("author").and_then(names).filter(|s| !s.is_empty()),
        source: node.get("publisher").and_then(names).filter(|s| !s.is_empty()),
        article_text: str_field(node, "articleBody").map(|b| scrub_text(&b)),
        published_at: str_field(node, "datePublished"),
        updated_at: str_field(node, "dateModified"),
    }
}

fn str_field(node: &Value, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Names from a person/organization value: a string, an object with `name`
/// (itself a string or a list), or a list of either. Comma-joined, deduped.
fn names(value: &Value) -> Option<String> {
    fn collect<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
        match value {
            Value::String(s) => out.push(s.trim()),
            Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
            Value::Object(map) => {
                if let Some(name) = map.get("name") {
                    collect(name, out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    collect(value, &mut out);
    let joined = out.into_iter().filter(|s| !s.is_empty()).unique().join(", ");
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NPR_LIKE: &str = r#"
        <html><head>
          <script type="application/ld+json">
          {"@type": "NewsArticle",
           "headline": "Egypt to host Gaza summit",
           "publisher": {"@type": "Organization", "name": "NPR"},
           "datePublished": "2025-02-09T06:13:44-05:00",
           "author": {"@type": "Person", "name": ["Jerome Socolovsky"]},
           "@context": "http://schema.org"}
          </script>
          <script type="application/ld+json">{ not json</script>
        </head><body>
          <p>TEL AVIV, Israel \n Egypt announced Sunday.</p>
          <p>   </p>
          <p>Second paragraph.</p>
        </body></html>"#;

    #[test]
    fn test_extract_skips_malformed_blocks() {
        let doc = Html::parse_document(NPR_LIKE);
        let data = extract(&doc).unwrap();
        assert_eq!(data.blocks.len(), 1);
        assert_eq!(
            data.visible_text,
            "TEL AVIV, Israel Egypt announced Sunday. Second paragraph."
        );
    }

    #[test]
    fn test_extract_none_without_blocks() {
        let doc = Html::parse_document("<html><body><p>Only text</p></body></html>");
        assert!(extract(&doc).is_none());
    }

    #[test]
    fn test_extract_none_when_all_blocks_malformed() {
        let doc = Html::parse_document(
            r#"<html><head><script type="application/ld+json">{oops</script></head></html>"#,
        );
        assert!(extract(&doc).is_none());
    }

    #[test]
    fn test_hints_from_article_node() {
        let doc = Html::parse_document(NPR_LIKE);
        let data = extract(&doc).unwrap();
        let h = hints(&data.blocks);
        assert_eq!(h.title.as_deref(), Some("Egypt to host Gaza summit"));
        assert_eq!(h.source.as_deref(), Some("NPR"));
        assert_eq!(h.authors.as_deref(), Some("Jerome Socolovsky"));
        assert_eq!(h.published_at.as_deref(), Some("2025-02-09T06:13:44-05:00"));
        assert_eq!(h.updated_at, None);
    }

    #[test]
    fn test_hints_walk_graph_and_prefer_articles() {
        let block: Value = serde_json::from_str(
            r#"{"@context": "https://schema.org", "@graph": [
                {"@type": "WebPage", "name": "Page title", "datePublished": "2020-01-01"},
                {"@type": ["NewsArticle"], "headline": "Real headline",
                 "author": [{"@type": "Person", "name": "A. Writer"}, {"name": "B. Writer"}, "A. Writer"],
                 "datePublished": "2024-05-01T10:00:00Z", "dateModified": "2024-05-02T10:00:00Z"}
            ]}"#,
        )
        .unwrap();
        let h = hints(&[block]);
        assert_eq!(h.title.as_deref(), Some("Real headline"));
        assert_eq!(h.authors.as_deref(), Some("A. Writer, B. Writer"));
        assert_eq!(h.published_at.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(h.updated_at.as_deref(), Some("2024-05-02T10:00:00Z"));
    }

    #[test]
    fn test_hints_ignore_untyped_values() {
        let block: Value = serde_json::from_str(r#"[1, "x", {"headline": "no type"}]"#).unwrap();
        assert_eq!(hints(&[block]), PartialRecord::default());
    }

    #[test]
    fn test_meta_hints() {
        let doc = Html::parse_document(
            r#"<html><head>
                <meta property="og:site_name" content="Example News">
                <meta property="og:title" content="OG Title">
                <meta name="author" content="https://example.com/staff/jane-doe">
                <meta property="article:published_time" content="2024-05-01T09:00:00Z">
                <meta itemprop="dateModified" content="2024-05-01T11:00:00Z">
            </head><body></body></html>"#,
        );
        let h = meta_hints(&doc);
        assert_eq!(h.source.as_deref(), Some("Example News"));
        assert_eq!(h.title.as_deref(), Some("OG Title"));
        assert_eq!(h.authors, None);
        assert_eq!(h.published_at.as_deref(), Some("2024-05-01T09:00:00Z"));
        assert_eq!(h.updated_at.as_deref(), Some("2024-05-01T11:00:00Z"));
    }
}
