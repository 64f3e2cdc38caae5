//! Error types for every stage of the extraction pipeline.
//!
//! Stage-local errors ([`FetchError`], [`ApiError`], [`ExtractError`],
//! [`ThrottleError`]) never escape a single URL: the orchestrator folds them
//! into that URL's [`ProcessingResult`](crate::models::ProcessingResult).
//! Only [`ConfigError`] is fatal, and it is raised before a batch starts.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to retrieve rendered HTML for a URL.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The headless browser could not be launched or driven.
    #[error("browser error: {0}")]
    Browser(String),

    /// Navigation did not finish within the configured bound.
    #[error("navigation timed out after {0:?}")]
    Timeout(Duration),

    /// The main document answered with a non-success HTTP status.
    #[error("bad status code {0}")]
    BadStatus(u16),

    /// Navigation failed before a response was received.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The page loaded but produced no HTML.
    #[error("page produced no content")]
    Empty,

    /// Every attempt failed; carries the last cause.
    #[error("failed to fetch {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: usize,
        last: Box<FetchError>,
    },
}

/// Failure while talking to a text-generation backend.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Network-level failure (DNS, connection reset, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend did not answer within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// 4xx answers that will not improve on retry.
    #[error("client error {status}: {body}")]
    Client { status: u16, body: String },

    /// 429 and 5xx answers.
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    /// The reply was not valid JSON or did not match the record schema.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The rate throttle refused admission within its wait bound.
    #[error(transparent)]
    Throttle(#[from] ThrottleError),
}

impl ApiError {
    /// Whether the same call may succeed when repeated.
    ///
    /// Response-validation failures are retryable; permanently bad requests
    /// and throttle timeouts are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::Timeout(_) | ApiError::Server { .. } => true,
            ApiError::Malformed(_) => true,
            ApiError::Client { .. } | ApiError::Throttle(_) => false,
        }
    }
}

/// Failure of the metadata extraction step for one URL.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Every attempt returned a reply that failed schema validation.
    #[error("response failed schema validation after {attempts} attempts: {last}")]
    SchemaValidation { attempts: usize, last: String },

    /// The backend call itself failed in a way retries could not fix.
    #[error(transparent)]
    Api(ApiError),
}

/// Rolling-window throttle refused admission.
#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("throttle '{channel}' did not admit a call within {waited:?}")]
    Timeout { channel: String, waited: Duration },
}

/// Configuration problems that make every URL fail; fatal to the batch.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing API key for {channel}: set {env_var} or pass --api-key")]
    MissingApiKey { channel: String, env_var: String },

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Per-URL failure taxonomy as recorded in results. Configuration problems
/// are [`ConfigError`] and never reach a single URL.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or empty URL; never reaches the fetcher.
    #[error("invalid URL: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    SchemaValidation(#[from] ExtractError),

    #[error(transparent)]
    ThrottleTimeout(#[from] ThrottleError),
}
