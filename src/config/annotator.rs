// src/config/annotator.rs
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::annotate::retry::RetryPolicy;

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

fn default_enabled() -> bool {
    true
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}
fn default_cache_dir() -> Option<String> {
    Some("cache/annotations".to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotatorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI-compatible base URL; `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// "ENV" means: read from OPENAI_API_KEY.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// On-disk completion cache; `None` (or empty) disables it.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            model: default_model(),
            base_url: default_base_url(),
            api_key: default_api_key(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            cache_dir: default_cache_dir(),
            retry: RetryConfig::default(),
        }
    }
}

impl AnnotatorConfig {
    /// Resolve the API key. "ENV" reads `OPENAI_API_KEY`; a missing variable yields `None`
    /// so the pipeline can still run with annotation disabled.
    pub fn resolved_api_key(&self) -> Option<String> {
        let raw = self.api_key.trim();
        let key = if raw.eq_ignore_ascii_case("env") {
            env::var(ENV_OPENAI_API_KEY).ok()?
        } else {
            raw.to_string()
        };
        let key = key.trim().to_string();
        (!key.is_empty()).then_some(key)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub(crate) fn sanitize(&mut self) {
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        self.concurrency = self.concurrency.max(1);
        if self
            .cache_dir
            .as_deref()
            .is_some_and(|d| d.trim().is_empty())
        {
            self.cache_dir = None;
        }
        self.retry.sanitize();
    }
}

fn default_max_retries() -> u32 {
    2
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_multiplier() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    fn sanitize(&mut self) {
        // keep the bound small: annotation calls are per article
        self.max_retries = self.max_retries.min(5);
        self.multiplier = self.multiplier.max(1);
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            self.multiplier,
        )
    }
}
