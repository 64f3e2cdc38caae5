//! Batch orchestration: one [`ProcessingResult`] per input URL.
//!
//! Each URL runs sequentially through validation, strategy selection and
//! either the full-scrape path (fetch, JSON-LD, reduction, metadata model)
//! or URL-only inference. Up to `concurrency` URLs are in flight at once.
//! Results come back in input order, and a failure is recorded on its own
//! URL's result without touching the rest of the batch.

use futures::stream::{self, StreamExt};
use scraper::Html;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::api::AskAsync;
use crate::error::{ApiError, ExtractError, PipelineError};
use crate::fetcher::PageFetcher;
use crate::metadata::MetadataExtractor;
use crate::models::{ArticleRecord, ExtractionPayload, PartialRecord, ProcessingResult, Status};
use crate::scrapers::reducer::{self, ReducerConfig};
use crate::scrapers::structured;
use crate::scrapers::url_only::UrlInference;
use crate::selector::{Denylist, Strategy, choose_strategy};
use crate::text::{fix_mojibake, fix_mojibake_json, truncate_chars};

/// Receives progress while a batch runs.
///
/// `progress` is the completed fraction in `0.0..=1.0` when known.
pub trait StatusCallback {
    fn on_status(&self, message: &str, progress: Option<f32>);
}

/// Reports progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatus;

impl StatusCallback for TracingStatus {
    fn on_status(&self, message: &str, progress: Option<f32>) {
        match progress {
            Some(p) => info!(progress = %format!("{:.0}%", p * 100.0), "{message}"),
            None => info!("{message}"),
        }
    }
}

impl StatusCallback for () {
    fn on_status(&self, _message: &str, _progress: Option<f32>) {}
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// URLs processed at the same time.
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { concurrency: 3 }
    }
}

/// Accept only absolute `http(s)` URLs with a host.
pub fn validate_url(url: &str) -> Result<Url, PipelineError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidInput("empty URL".to_string()));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|e| PipelineError::InvalidInput(format!("{trimmed}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PipelineError::InvalidInput(format!(
            "unsupported scheme '{}' in {trimmed}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(PipelineError::InvalidInput(format!("no host in {trimmed}")));
    }
    Ok(parsed)
}

fn status_for(err: &PipelineError) -> Status {
    match err {
        PipelineError::InvalidInput(_) => Status::ErrorInvalidUrl,
        PipelineError::Fetch(_) => Status::ErrorFetch,
        _ => Status::ErrorExtract,
    }
}

/// The per-batch pipeline over a page fetcher `F`, a metadata backend `M`
/// and a URL-inference backend `U`.
#[derive(Debug)]
pub struct Pipeline<F, M, U> {
    fetcher: F,
    metadata: MetadataExtractor<M>,
    url_inference: UrlInference<U>,
    denylist: Denylist,
    reducer: ReducerConfig,
    concurrency: usize,
}

impl<F, M, U> Pipeline<F, M, U>
where
    F: PageFetcher,
    M: AskAsync,
    U: AskAsync,
{
    pub fn new(
        fetcher: F,
        metadata: MetadataExtractor<M>,
        url_inference: UrlInference<U>,
        denylist: Denylist,
        reducer: ReducerConfig,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            metadata,
            url_inference,
            denylist,
            reducer,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Process every URL and return one result per URL, in input order.
    #[instrument(
        level = "info",
        skip_all,
        fields(urls = urls.len(), concurrency = self.concurrency)
    )]
    pub async fn run_batch(
        &self,
        urls: &[String],
        status: &dyn StatusCallback,
    ) -> Vec<ProcessingResult> {
        let start = Instant::now();
        let total = urls.len();
        let tokens_before = self.metadata.tokens_requested();
        let done = AtomicUsize::new(0);
        status.on_status(&format!("Processing {total} URLs"), Some(0.0));

        let results: Vec<ProcessingResult> = stream::iter(urls.iter())
            .map(|url| {
                let done = &done;
                async move {
                    let result = self.process_url(url).await;
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    status.on_status(
                        &format!("[{n}/{total}] {:?} {}", result.status, result.url),
                        Some(n as f32 / total.max(1) as f32),
                    );
                    result
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let succeeded = results.iter().filter(|r| !r.status.is_error()).count();
        let url_only = results.iter().filter(|r| r.status == Status::SuccessUrlOnly).count();
        info!(
            total,
            succeeded,
            url_only,
            failed = total - succeeded,
            est_tokens = self.metadata.tokens_requested() - tokens_before,
            elapsed_ms = start.elapsed().as_millis(),
            "Batch complete"
        );
        status.on_status(&format!("Done: {succeeded}/{total} succeeded"), Some(1.0));
        results
    }

    /// Re-run the URLs whose previous attempt failed, keeping every other
    /// result and the original order. Invalid URLs are not retried.
    #[instrument(level = "info", skip_all)]
    pub async fn retry_failed(
        &self,
        mut results: Vec<ProcessingResult>,
        status: &dyn StatusCallback,
    ) -> Vec<ProcessingResult> {
        let (positions, urls): (Vec<usize>, Vec<String>) = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status.is_error() && r.status != Status::ErrorInvalidUrl)
            .map(|(i, r)| (i, r.url.clone()))
            .unzip();

        if urls.is_empty() {
            debug!("No failed results to retry");
            return results;
        }
        info!(count = urls.len(), "Retrying failed URLs");

        let retried = self.run_batch(&urls, status).await;
        for (i, result) in positions.into_iter().zip(retried) {
            results[i] = result;
        }
        results
    }

    #[instrument(level = "info", skip_all, fields(url = %url))]
    async fn process_url(&self, url: &str) -> ProcessingResult {
        if let Err(e) = validate_url(url) {
            warn!(error = %e, "Rejected URL");
            return ProcessingResult::failure(url, Status::ErrorInvalidUrl, "none", e.to_string());
        }
        let url = url.trim();

        match choose_strategy(url, &self.denylist) {
            Strategy::UrlOnly => {
                let (record, label) = self.url_inference.infer(url).await;
                ProcessingResult::url_only(url, record, label)
            }
            Strategy::FullScrape => {
                let strategy = Strategy::FullScrape.to_string();
                match self.full_scrape(url).await {
                    Ok(record) => ProcessingResult::success(url, record, strategy),
                    Err(e) => {
                        warn!(error = %e, "Full scrape failed");
                        ProcessingResult::failure(url, status_for(&e), strategy, e.to_string())
                    }
                }
            }
        }
    }

    async fn full_scrape(&self, url: &str) -> Result<ArticleRecord, PipelineError> {
        let html = self.fetcher.fetch(url).await?;
        let (payload, hints) = self.prepare(url, &html);

        self.metadata.extract(&payload, &hints).await.map_err(|e| match e {
            ExtractError::Api(ApiError::Throttle(t)) => PipelineError::ThrottleTimeout(t),
            other => PipelineError::SchemaValidation(other),
        })
    }

    /// Build the model payload and the markup hints from rendered HTML.
    fn prepare(&self, url: &str, html: &str) -> (ExtractionPayload, PartialRecord) {
        let document = Html::parse_document(html);
        let data = structured::extract(&document);
        let reduced = reducer::reduce(&document, &self.reducer);

        let hints = data
            .as_ref()
            .map(|d| structured::hints(&d.blocks))
            .unwrap_or_default()
            .or(structured::meta_hints(&document));

        let body_text = reduced
            .body(self.reducer.mode)
            .map(fix_mojibake)
            .or_else(|| {
                data.as_ref()
                    .map(|d| {
                        truncate_chars(&fix_mojibake(&d.visible_text), self.reducer.char_budget)
                    })
                    .filter(|t| !t.is_empty())
            });

        if data.is_none() && body_text.is_none() {
            warn!("No structured data and no body text; sending URL only");
        }

        let fallback_text = PartialRecord {
            article_text: Some(fix_mojibake(&reduced.text)).filter(|t| !t.trim().is_empty()),
            ..Default::default()
        };
        let hints = hints.or(fallback_text);

        let payload = ExtractionPayload {
            url: url.to_string(),
            structured_blocks: data.map(|mut d| {
                d.blocks.iter_mut().for_each(fix_mojibake_json);
                d.blocks
            }),
            body_text,
        };
        (payload, hints)
    }
}
