//! Rendered-HTML retrieval through an isolated headless Chromium.
//!
//! Each attempt launches its own browser with a throwaway profile directory
//! and a randomly picked user agent and viewport, navigates, checks the main
//! document's HTTP status and waits for a `<body>` before reading the DOM.
//! The browser and its profile are torn down on every exit path. Attempts
//! are repeated with exponential backoff and jitter.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::viewport::Viewport;
use futures::StreamExt;
use rand::{Rng, rng};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::error::FetchError;
use crate::throttle::millis;

/// Status of the main document from the Navigation Timing API; 0 when the
/// browser does not report one.
const NAV_STATUS_JS: &str = "performance.getEntriesByType('navigation')[0]?.responseStatus ?? 0";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1366, 768), (1440, 900)];

/// Anything that can turn a URL into rendered HTML.
pub trait PageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Bound on one whole attempt: launch, navigation and DOM read.
    #[serde(with = "millis")]
    pub navigation_timeout: Duration,
    pub max_attempts: usize,
    #[serde(with = "millis")]
    pub backoff_base: Duration,
    /// Upper bound of the random jitter added to each backoff, in milliseconds.
    pub max_jitter_ms: u64,
    pub headless: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(20),
            max_attempts: 2,
            backoff_base: Duration::from_secs(1),
            max_jitter_ms: 1_000,
            headless: true,
        }
    }
}

/// Run `attempt` up to `config.max_attempts` times, each bounded by
/// `config.navigation_timeout`, sleeping `base * 2^(n-1)` plus jitter between
/// failures.
pub async fn fetch_with_retry<F, Fut>(
    url: &str,
    config: &FetchConfig,
    mut attempt: F,
) -> Result<String, FetchError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last = FetchError::Empty;

    for n in 1..=max_attempts {
        match timeout(config.navigation_timeout, attempt(n)).await {
            Ok(Ok(html)) => {
                if n > 1 {
                    info!(attempt = n, "Fetch succeeded after retry");
                }
                return Ok(html);
            }
            Ok(Err(e)) => last = e,
            Err(_) => last = FetchError::Timeout(config.navigation_timeout),
        }

        if n < max_attempts {
            let backoff = config.backoff_base.saturating_mul(1 << (n - 1).min(16));
            let jitter_ms: u64 = rng().random_range(0..=config.max_jitter_ms);
            let delay = backoff + Duration::from_millis(jitter_ms);
            warn!(
                attempt = n,
                max = max_attempts,
                ?delay,
                error = %last,
                "Fetch attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }

    Err(FetchError::Exhausted {
        url: url.to_string(),
        attempts: max_attempts,
        last: Box::new(last),
    })
}

/// Aborts the CDP handler task when dropped, so a cancelled attempt does not
/// leave it running.
struct HandlerGuard(JoinHandle<()>);

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Fresh, empty profile directory for one browser; removed when dropped.
fn new_profile() -> Result<TempDir, FetchError> {
    tempfile::Builder::new()
        .prefix("article-meta-profile-")
        .tempdir()
        .map_err(|e| FetchError::Browser(format!("cannot create profile directory: {e}")))
}

/// [`PageFetcher`] backed by a fresh headless Chromium per attempt.
#[derive(Debug, Clone)]
pub struct BrowserFetcher {
    config: FetchConfig,
}

impl BrowserFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self, profile: &Path) -> Result<BrowserConfig, FetchError> {
        let user_agent = USER_AGENTS[rng().random_range(0..USER_AGENTS.len())];
        let (width, height) = VIEWPORTS[rng().random_range(0..VIEWPORTS.len())];
        debug!(user_agent, width, height, "Browser fingerprint");

        let args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={width},{height}"),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--disable-extensions".to_string(),
            "--no-first-run".to_string(),
            "--no-sandbox".to_string(),
        ];

        let mut builder = BrowserConfig::builder()
            .viewport(Some(Viewport {
                width,
                height,
                ..Default::default()
            }))
            .user_data_dir(profile)
            .args(args);
        if !self.config.headless {
            builder = builder.with_head();
        }
        builder.build().map_err(FetchError::Browser)
    }

    async fn attempt(&self, url: &str, n: usize) -> Result<String, FetchError> {
        let profile = new_profile()?;
        debug!(attempt = n, profile = %profile.path().display(), "Launching browser");
        let config = self.browser_config(profile.path())?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;
        let guard = HandlerGuard(tokio::spawn(async move {
            while handler.next().await.is_some() {}
        }));

        let result = load(&browser, url).await;

        if let Err(e) = browser.close().await {
            debug!(error = %e, "Browser close failed");
        }
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "Browser wait failed");
        }
        drop(guard);
        // only after the browser has exited
        drop(profile);
        result
    }
}

async fn load(browser: &Browser, url: &str) -> Result<String, FetchError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| FetchError::Browser(e.to_string()))?;
    page.goto(url)
        .await
        .map_err(|e| FetchError::Navigation(e.to_string()))?;

    let status = match page.evaluate(NAV_STATUS_JS).await {
        Ok(value) => value.into_value::<i64>().unwrap_or(0),
        Err(e) => {
            debug!(error = %e, "Navigation status unavailable");
            0
        }
    };
    if status >= 400 {
        return Err(FetchError::BadStatus(u16::try_from(status).unwrap_or(u16::MAX)));
    }

    page.find_element("body")
        .await
        .map_err(|e| FetchError::Navigation(format!("no body element: {e}")))?;
    let html = page
        .content()
        .await
        .map_err(|e| FetchError::Browser(e.to_string()))?;

    if html.trim().is_empty() {
        return Err(FetchError::Empty);
    }
    debug!(status, bytes = html.len(), "Page loaded");
    Ok(html)
}

impl PageFetcher for BrowserFetcher {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        fetch_with_retry(url, &self.config, |n| self.attempt(url, n)).await
    }
}
