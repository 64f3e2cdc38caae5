//! Rolling 60-second request and token budget for one model channel.
//!
//! A [`RateThrottle`] is owned by whoever builds the pipeline and handed to the
//! call sites as an `Arc`; there is no process-wide state, so two batches with
//! their own throttles never share a budget.
//!
//! Admission is serialized: the window lock is held from purge to registration,
//! including while waiting, so two callers can never both pass the check and
//! then both register.

use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::error::ThrottleError;

const WINDOW: Duration = Duration::from_secs(60);

/// Characters per token used by [`estimate_tokens`]. An approximation only.
const CHARS_PER_TOKEN: usize = 4;

/// Rough token count for `text`: one token per four characters, at least one.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / CHARS_PER_TOKEN).max(1) as u64
}

/// Per-minute caps and wait behavior for one channel.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThrottleLimits {
    pub max_requests_per_minute: usize,
    pub max_tokens_per_minute: u64,
    /// Sleep between re-checks while over budget.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Give up with [`ThrottleError::Timeout`] after waiting this long.
    #[serde(with = "millis")]
    pub max_wait: Duration,
}

impl Default for ThrottleLimits {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 30,
            max_tokens_per_minute: 250_000,
            poll_interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(180),
        }
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[derive(Debug, Default)]
struct Window {
    entries: VecDeque<(Instant, u64)>,
}

impl Window {
    fn purge(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.entries.front() {
            if now.duration_since(at) >= WINDOW {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn tokens(&self) -> u64 {
        self.entries.iter().map(|&(_, t)| t).sum()
    }

    fn admits(&self, limits: &ThrottleLimits, tokens: u64) -> bool {
        self.entries.len() < limits.max_requests_per_minute
            && self.tokens() + tokens <= limits.max_tokens_per_minute
    }
}

/// Rolling-window admission control for one named channel.
#[derive(Debug)]
pub struct RateThrottle {
    name: String,
    limits: ThrottleLimits,
    window: Mutex<Window>,
}

impl RateThrottle {
    pub fn new(name: impl Into<String>, limits: ThrottleLimits) -> Self {
        Self {
            name: name.into(),
            limits,
            window: Mutex::new(Window::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until a call costing `tokens` fits in the window, then register it.
    ///
    /// A single call larger than the whole token cap is clamped to the cap so
    /// it is admitted once the window is otherwise empty.
    pub async fn acquire(&self, tokens: u64) -> Result<(), ThrottleError> {
        let tokens = if tokens > self.limits.max_tokens_per_minute {
            warn!(
                channel = %self.name,
                tokens,
                cap = self.limits.max_tokens_per_minute,
                "Call exceeds per-minute token cap; clamping"
            );
            self.limits.max_tokens_per_minute
        } else {
            tokens
        };

        let started = Instant::now();
        let mut window = self.window.lock().await;
        let mut logged = false;
        loop {
            let now = Instant::now();
            window.purge(now);
            if window.admits(&self.limits, tokens) {
                window.entries.push_back((now, tokens));
                debug!(
                    channel = %self.name,
                    requests = window.entries.len(),
                    tokens_in_window = window.tokens(),
                    "Admitted call"
                );
                return Ok(());
            }

            let waited = now.duration_since(started);
            if waited >= self.limits.max_wait {
                return Err(ThrottleError::Timeout {
                    channel: self.name.clone(),
                    waited,
                });
            }
            if !logged {
                info!(channel = %self.name, "Rate budget exhausted; waiting for window to advance");
                logged = true;
            }
            sleep(self.limits.poll_interval).await;
        }
    }

    /// Forget every registered call.
    pub async fn reset(&self) {
        self.window.lock().await.entries.clear();
    }

    /// Calls registered in the current window (after purging).
    pub async fn in_flight(&self) -> usize {
        let mut window = self.window.lock().await;
        window.purge(Instant::now());
        window.entries.len()
    }
}
