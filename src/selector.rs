//! Per-URL strategy selection against a denylist of unscrapable origins.
//!
//! Some origins are known from earlier runs to defeat full scraping (bot
//! walls, timeouts). URLs on those origins skip the browser entirely and go
//! straight to URL-only inference.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::ConfigError;

/// How a URL will be turned into an [`ArticleRecord`](crate::models::ArticleRecord).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Browser fetch, JSON-LD, reduced body text, metadata model.
    FullScrape,
    /// Metadata inferred from the URL string alone; no network fetch.
    UrlOnly,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::FullScrape => write!(f, "full_scrape"),
            Strategy::UrlOnly => write!(f, "url_only"),
        }
    }
}

/// Compute `scheme://host[:port]` for a URL.
///
/// Hosts are lowercased and default ports dropped. Strings that do not parse
/// fall back to their first three `/`-separated parts, which is what a
/// hand-maintained denylist line usually looks like anyway.
pub fn origin_of(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(parsed) if parsed.has_host() => parsed.origin().ascii_serialization(),
        _ => trimmed.split('/').take(3).collect::<Vec<_>>().join("/").to_lowercase(),
    }
}

/// Set of origins that must not be scraped. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    origins: HashSet<String>,
}

impl Denylist {
    /// Build from lines holding full URLs, origins or bare hosts. A bare
    /// host (`www.wsj.com`) is denied under both `http` and `https`. Blank
    /// lines and `#` comments are ignored.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let origins = lines
            .into_iter()
            .map(|l| l.as_ref().trim().to_string())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .flat_map(|l| entry_origins(&l))
            .collect();
        Self { origins }
    }

    /// Load a denylist file, one entry per line.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let denylist = Self::from_lines(text.lines());
        info!(origins = denylist.len(), "Loaded denylist");
        Ok(denylist)
    }

    pub fn contains_origin(&self, origin: &str) -> bool {
        self.origins.contains(origin)
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }
}

fn entry_origins(line: &str) -> Vec<String> {
    let candidates: Vec<String> = if line.contains("://") {
        vec![line.to_string()]
    } else {
        vec![format!("https://{line}"), format!("http://{line}")]
    };
    candidates
        .iter()
        .filter_map(|c| match Url::parse(c) {
            Ok(parsed) if parsed.has_host() => Some(parsed.origin().ascii_serialization()),
            _ => {
                warn!(entry = %line, "Denylist entry is not a URL or host; ignored");
                None
            }
        })
        .collect()
}

/// Pick the extraction strategy for `url`. Pure; never performs I/O.
pub fn choose_strategy(url: &str, denylist: &Denylist) -> Strategy {
    let origin = origin_of(url);
    let strategy = if denylist.contains_origin(&origin) {
        Strategy::UrlOnly
    } else {
        Strategy::FullScrape
    };
    debug!(%url, %origin, %strategy, "Chose strategy");
    strategy
}
