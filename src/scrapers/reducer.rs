//! Main-content isolation and size bounding.
//!
//! Noise elements are detached from a cloned working copy of the document,
//! the most specific content container is serialized, and the result is cut
//! to a fixed character budget. The cut is a hard one with no notion of
//! sentences or markup; that trades some precision for a predictable token
//! cost on every call.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::debug;

use crate::text::{collapse_whitespace, truncate_chars};

static NOISE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "script, style, noscript, nav, footer, aside, form, iframe, link, picture, \
         source, img, svg, video, audio, embed, object, template",
    )
    .unwrap()
});

/// Candidate main-content containers, most specific first.
static CANDIDATES: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["article", "main", "[role=main]", "body"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

/// Which rendering of the reduced content is sent to the metadata model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceMode {
    /// Whitespace-collapsed text of the content region.
    #[default]
    Text,
    /// Cleaned HTML of the content region; larger, keeps bylines and `<time>` tags.
    Html,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReducerConfig {
    /// Maximum characters in either rendering.
    pub char_budget: usize,
    pub mode: ReduceMode,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            char_budget: 30_000,
            mode: ReduceMode::Text,
        }
    }
}

/// The bounded content region in both renderings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducedContent {
    pub html: String,
    pub text: String,
    /// Which candidate matched (`"article"`, `"main"`, ...) or `None` when the
    /// whole cleaned document was used.
    pub region: Option<&'static str>,
}

impl ReducedContent {
    /// The rendering selected by `mode`, or `None` when it is empty.
    pub fn body(&self, mode: ReduceMode) -> Option<&str> {
        let body = match mode {
            ReduceMode::Text => self.text.as_str(),
            ReduceMode::Html => self.html.as_str(),
        };
        (!body.trim().is_empty()).then_some(body)
    }
}

/// Strip noise from a copy of `document` and return its main content region,
/// truncated to `config.char_budget` characters.
pub fn reduce(document: &Html, config: &ReducerConfig) -> ReducedContent {
    let mut working = document.clone();
    let noise: Vec<_> = working.select(&NOISE).map(|el| el.id()).collect();
    let removed = noise.len();
    for id in noise {
        if let Some(mut node) = working.tree.get_mut(id) {
            node.detach();
        }
    }

    let names = ["article", "main", "[role=main]", "body"];
    let found = CANDIDATES
        .iter()
        .zip(names)
        .find_map(|(sel, name)| working.select(sel).next().map(|el| (el, name)));

    let (html, text, region) = match found {
        Some((el, name)) => (el.html(), element_text(el), Some(name)),
        None => {
            let root = working.root_element();
            (working.html(), element_text(root), None)
        }
    };

    let reduced = ReducedContent {
        html: truncate_chars(&html, config.char_budget),
        text: truncate_chars(&text, config.char_budget),
        region,
    };
    debug!(
        removed,
        region = region.unwrap_or("document"),
        html_chars = reduced.html.chars().count(),
        text_chars = reduced.text.chars().count(),
        "Reduced content"
    );
    reduced
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}
