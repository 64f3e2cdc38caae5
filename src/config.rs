//! YAML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) is a valid configuration. CLI flags are applied on top in `main`.
//!
//! ```yaml
//! fetch:
//!   navigation_timeout: 20000   # milliseconds
//!   max_attempts: 2
//! reducer:
//!   char_budget: 30000
//!   mode: text                  # or html
//! metadata:
//!   base_url: https://generativelanguage.googleapis.com/v1beta/openai
//!   model: gemini-2.0-flash
//!   api_key_env: ARTICLE_LLM_API_KEY
//!   throttle:
//!     max_requests_per_minute: 30
//!     max_tokens_per_minute: 250000
//! url_inference:
//!   use_model: true
//!   base_url: http://localhost:11434/v1
//!   model: link-parser
//! pipeline:
//!   concurrency: 3
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::fetcher::FetchConfig;
use crate::metadata::MetadataConfig;
use crate::pipeline::PipelineConfig;
use crate::scrapers::reducer::ReducerConfig;
use crate::throttle::{ThrottleLimits, millis};

/// File picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Settings for the local URL-inference model.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct UrlInferenceConfig {
    /// Ask the model before falling back to rules. Off means rules only.
    pub use_model: bool,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding an API key, for hosted endpoints.
    pub api_key_env: Option<String>,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub max_attempts: usize,
    #[serde(with = "millis")]
    pub retry_base_delay: Duration,
    pub throttle: ThrottleLimits,
}

impl Default for UrlInferenceConfig {
    fn default() -> Self {
        Self {
            use_model: true,
            base_url: "http://localhost:11434/v1".to_string(),
            model: "link-parser".to_string(),
            api_key_env: None,
            request_timeout: Duration::from_secs(30),
            max_attempts: 2,
            retry_base_delay: Duration::from_millis(500),
            throttle: ThrottleLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub reducer: ReducerConfig,
    pub metadata: MetadataConfig,
    pub url_inference: UrlInferenceConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] when it exists, or
    /// fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path: PathBuf = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    debug!("No config file; using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_yaml(&raw, &path)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate YAML text; `path` is only used in errors.
    pub fn from_yaml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        // an empty document deserializes as null, not as an empty map
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every URL fail or hang.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if self.pipeline.concurrency == 0 {
            return Err(invalid("pipeline.concurrency", "must be at least 1"));
        }
        if self.fetch.max_attempts == 0 {
            return Err(invalid("fetch.max_attempts", "must be at least 1"));
        }
        if self.fetch.navigation_timeout.is_zero() {
            return Err(invalid("fetch.navigation_timeout", "must be positive"));
        }
        if self.metadata.max_attempts == 0 {
            return Err(invalid("metadata.max_attempts", "must be at least 1"));
        }
        if self.reducer.char_budget == 0 {
            return Err(invalid("reducer.char_budget", "must be positive"));
        }
        for (key, limits) in [
            ("metadata.throttle", &self.metadata.throttle),
            ("url_inference.throttle", &self.url_inference.throttle),
        ] {
            if limits.max_requests_per_minute == 0 || limits.max_tokens_per_minute == 0 {
                return Err(invalid(key, "per-minute caps must be positive"));
            }
        }
        Ok(())
    }

    /// API key for the metadata channel: the CLI value when given, else the
    /// configured environment variable.
    pub fn metadata_api_key(&self, cli_key: Option<&str>) -> Result<String, ConfigError> {
        cli_key
            .map(str::to_string)
            .or_else(|| std::env::var(&self.metadata.api_key_env).ok())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey {
                channel: "metadata".to_string(),
                env_var: self.metadata.api_key_env.clone(),
            })
    }

    /// Optional API key for the URL-inference channel.
    pub fn url_inference_api_key(&self) -> Option<String> {
        self.url_inference
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty())
    }
}
