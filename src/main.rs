//! # Awful Article Meta
//!
//! Extracts title, authors, source, publication/update timestamps and body
//! text from arbitrary news-article URLs.
//!
//! ## Features
//!
//! - Renders pages in an isolated headless Chromium with retry and backoff
//! - Reads schema.org JSON-LD and meta tags, and isolates the main content
//! - Repairs mojibake before anything reaches the model
//! - Extracts metadata through an OpenAI-compatible LLM API with a JSON
//!   schema, validating and retrying malformed replies
//! - Falls back to URL-only inference for sites known to defeat scraping,
//!   never inventing values the URL does not contain
//! - Keeps each model channel under per-minute request and token caps
//!
//! ## Usage
//!
//! ```sh
//! awful_article_meta -i urls.txt -d denylist.txt -o results.json
//! ```
//!
//! ## Architecture
//!
//! 1. **Selection**: denylisted origins go to URL-only inference
//! 2. **Fetching**: headless browser render with bounded retries
//! 3. **Reduction**: JSON-LD blocks plus a bounded main-content body
//! 4. **Extraction**: schema-constrained model call, validation, normalization
//! 5. **Output**: one result per URL, in input order, written as JSON

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod fetcher;
mod metadata;
mod models;
mod outputs;
mod pipeline;
mod scrapers;
mod selector;
mod text;
mod throttle;
mod utils;

use api::{ChatClient, RetryAsk, ThrottledAsk};
use cli::{Cli, parse_url_lines};
use config::AppConfig;
use error::ConfigError;
use fetcher::BrowserFetcher;
use metadata::MetadataExtractor;
use outputs::json;
use pipeline::{Pipeline, TracingStatus};
use scrapers::url_only::UrlInference;
use selector::Denylist;
use throttle::RateThrottle;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("awful_article_meta starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.input, ?args.denylist, ?args.output, "Parsed CLI arguments");

    // ---- Configuration ----
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(concurrency) = args.concurrency {
        config.pipeline.concurrency = concurrency;
    }
    if args.no_url_model {
        config.url_inference.use_model = false;
    }
    config.validate()?;

    // ---- Inputs ----
    let mut urls = args.urls.clone();
    if let Some(input) = &args.input {
        let text = tokio::fs::read_to_string(input)
            .await
            .map_err(|source| ConfigError::Read {
                path: input.clone(),
                source,
            })?;
        urls.extend(parse_url_lines(&text));
    }
    if urls.is_empty() {
        error!("No URLs given");
        return Err("no URLs given: pass them as arguments or with --input".into());
    }

    let denylist = match &args.denylist {
        Some(path) => Denylist::load(path)?,
        None => Denylist::default(),
    };
    let api_key = config.metadata_api_key(args.api_key.as_deref())?;

    // Early check: ensure the output dir is writable
    if let Some(output) = &args.output {
        let dir = json::output_dir(output);
        if let Err(e) = json::ensure_writable_dir(dir).await {
            error!(
                path = %dir.display(),
                error = %e,
                "Output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }
    }

    // ---- Model channels ----
    let meta = &config.metadata;
    let metadata_client = ChatClient::new(
        &meta.base_url,
        &meta.model,
        Some(api_key),
        meta.request_timeout,
    )?;
    info!(model = metadata_client.model(), "Metadata model configured");
    let metadata_throttle = Arc::new(RateThrottle::new("metadata", meta.throttle.clone()));
    let mut throttles = vec![metadata_throttle.clone()];
    let metadata = MetadataExtractor::new(
        RetryAsk::new(
            ThrottledAsk::new(metadata_client, metadata_throttle),
            meta.max_attempts,
            meta.retry_base_delay,
        ),
        meta.article_char_limit,
    );

    let link = &config.url_inference;
    let url_inference = if link.use_model {
        let client = ChatClient::new(
            &link.base_url,
            &link.model,
            config.url_inference_api_key(),
            link.request_timeout,
        )?;
        info!(model = client.model(), "URL inference model configured");
        let throttle = Arc::new(RateThrottle::new("url_inference", link.throttle.clone()));
        throttles.push(throttle.clone());
        UrlInference::with_model(
            RetryAsk::new(
                ThrottledAsk::new(client, throttle),
                link.max_attempts,
                link.retry_base_delay,
            ),
            link.model.clone(),
        )
    } else {
        info!("URL inference uses rules only");
        UrlInference::rules_only()
    };

    // ---- Batch ----
    let pipeline = Pipeline::new(
        BrowserFetcher::new(config.fetch.clone()),
        metadata,
        url_inference,
        denylist,
        config.reducer.clone(),
        &config.pipeline,
    );

    let mut results = pipeline.run_batch(&urls, &TracingStatus).await;
    if args.retry_failed {
        results = pipeline.retry_failed(results, &TracingStatus).await;
    }
    for throttle in &throttles {
        info!(
            channel = throttle.name(),
            calls_last_minute = throttle.in_flight().await,
            "Throttle window at end of batch"
        );
        throttle.reset().await;
    }

    // ---- Output ----
    if let Err(e) = json::write_results(&results, args.output.as_deref()).await {
        error!(error = %e, "Failed to write results");
        return Err(e);
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
