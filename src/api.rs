//! Text-generation backend calls with throttling and retry.
//!
//! The module uses a trait-based design so any backend that accepts bounded
//! text and returns schema-constrained JSON can be dropped in:
//! - [`AskAsync`]: core trait for one async model call
//! - [`ChatClient`]: OpenAI-compatible `/chat/completions` client
//! - [`ThrottledAsk`]: decorator that admits each call through a [`RateThrottle`]
//! - [`RetryAsk`]: decorator that retries failed or unparseable replies
//!
//! # Retry Strategy
//!
//! - A fixed number of attempts (3 for metadata extraction)
//! - Exponential backoff from a short base delay, capped at 30 seconds
//! - Random jitter (0-250ms) added to each pause
//! - Client errors (bad request, auth, unknown model) are never retried

use rand::{Rng, rng};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

use crate::error::ApiError;
use crate::throttle::{RateThrottle, estimate_tokens};

/// One model request: instructions, bounded user content and an optional
/// JSON schema the reply must follow.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
    pub schema: Option<Value>,
}

impl ChatPrompt {
    /// Approximate token cost of sending this prompt.
    pub fn estimated_tokens(&self) -> u64 {
        estimate_tokens(&self.system) + estimate_tokens(&self.user)
    }
}

/// Trait for async model interaction.
///
/// Implementors send a prompt and return the raw reply text.
pub trait AskAsync {
    async fn ask(&self, prompt: &ChatPrompt) -> Result<String, ApiError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// The delay between attempts follows:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    /// The underlying client to wrap.
    inner: T,
    /// Total attempts, including the first.
    max_attempts: usize,
    /// Initial delay between attempts (doubles with each attempt).
    base_delay: Duration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: Duration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &T {
        &self.inner
    }

    /// Ask and parse, repeating the call while either step fails with a
    /// retryable error. Returns the first successfully parsed reply.
    #[instrument(level = "debug", skip_all)]
    pub async fn ask_parsed<R, F>(&self, prompt: &ChatPrompt, parse: F) -> Result<R, ApiError>
    where
        F: Fn(&str) -> Result<R, ApiError>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            let outcome = match self.inner.ask(prompt).await {
                Ok(text) => parse(&text),
                Err(e) => Err(e),
            };

            let e = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "ask() succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
            let elapsed_ms_total = total_t0.elapsed().as_millis();

            if !e.is_retryable() {
                error!(
                    attempt,
                    elapsed_ms_total,
                    error = %e,
                    "ask() failed with non-retryable error"
                );
                return Err(e);
            }
            if attempt >= self.max_attempts {
                error!(
                    attempt,
                    max = self.max_attempts,
                    elapsed_ms_attempt,
                    elapsed_ms_total,
                    error = %e,
                    "ask() exhausted retries"
                );
                return Err(e);
            }

            // backoff calc
            let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1).min(16));
            if delay > self.max_delay {
                delay = self.max_delay;
            }
            let jitter_ms: u64 = rng().random_range(0..=250);
            let delay = delay + Duration::from_millis(jitter_ms);

            warn!(
                attempt,
                max = self.max_attempts,
                elapsed_ms_attempt,
                elapsed_ms_total,
                ?delay,
                error = %e,
                "ask() attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    async fn ask(&self, prompt: &ChatPrompt) -> Result<String, ApiError> {
        self.ask_parsed(prompt, |text| Ok(text.to_string())).await
    }
}

/// Decorator that passes every call through a shared [`RateThrottle`] first.
pub struct ThrottledAsk<T> {
    inner: T,
    throttle: Arc<RateThrottle>,
}

impl<T> ThrottledAsk<T> {
    pub fn new(inner: T, throttle: Arc<RateThrottle>) -> Self {
        Self { inner, throttle }
    }
}

impl<T> fmt::Debug for ThrottledAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledAsk")
            .field("channel", &self.throttle.name())
            .finish()
    }
}

impl<T> AskAsync for ThrottledAsk<T>
where
    T: AskAsync,
{
    async fn ask(&self, prompt: &ChatPrompt) -> Result<String, ApiError> {
        self.throttle.acquire(prompt.estimated_tokens()).await?;
        self.inner.ask(prompt).await
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

/// OpenAI-compatible chat completion client.
///
/// Gemini, Ollama and most hosted providers expose this wire format, so one
/// client serves both the remote metadata model and a local URL model.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body<'a>(&'a self, prompt: &'a ChatPrompt) -> ChatRequest<'a> {
        let response_format = match &prompt.schema {
            Some(schema) => json!({
                "type": "json_schema",
                "json_schema": { "name": "article_record", "strict": true, "schema": schema }
            }),
            None => json!({ "type": "json_object" }),
        };
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &prompt.system },
                ChatMessage { role: "user", content: &prompt.user },
            ],
            temperature: 0.0,
            response_format,
        }
    }
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Map a non-success HTTP status to the error kind that decides retrying.
fn classify_status(status: StatusCode, body: String) -> ApiError {
    let code = status.as_u16();
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ApiError::Server { status: code, body }
    } else {
        ApiError::Client { status: code, body }
    }
}

impl AskAsync for ChatClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, prompt: &ChatPrompt) -> Result<String, ApiError> {
        let t0 = Instant::now();
        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&self.request_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout)
            } else {
                ApiError::Transport(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status, crate::utils::truncate_for_log(&body, 300));
            warn!(elapsed_ms = t0.elapsed().as_millis(), error = %err, "API call failed");
            return Err(err);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(format!("unexpected response envelope: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ApiError::Malformed("response has no message content".to_string()))?;

        debug!(elapsed_ms = t0.elapsed().as_millis(), chars = content.len(), "API call succeeded");
        Ok(content)
    }
}
