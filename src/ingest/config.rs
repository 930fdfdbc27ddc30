// src/ingest/config.rs
use serde::Deserialize;
use std::time::Duration;

pub const ENV_NEWSAPI_KEY: &str = "NEWSAPI_KEY";

fn default_timeout_secs() -> u64 {
    15
}
fn default_concurrency() -> usize {
    4
}
fn default_page_size() -> usize {
    50
}

/// Fetch-stage limits shared by all providers.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Upper bound of articles requested per (provider, market).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            page_size: default_page_size(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub(crate) fn sanitize(&mut self) {
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        self.concurrency = self.concurrency.max(1);
        self.page_size = self.page_size.clamp(1, 100);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub google_news: GoogleNewsConfig,
    #[serde(default)]
    pub newsapi: NewsApiConfig,
}

fn default_true() -> bool {
    true
}
fn default_google_base() -> String {
    "https://news.google.com".to_string()
}
fn default_newsapi_base() -> String {
    "https://newsapi.org".to_string()
}
fn default_env() -> String {
    "ENV".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleNewsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_google_base")]
    pub base_url: String,
}

impl Default for GoogleNewsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_google_base(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_newsapi_base")]
    pub base_url: String,
    /// "ENV" means: read from NEWSAPI_KEY.
    #[serde(default = "default_env")]
    pub api_key: String,
}

impl Default for NewsApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_newsapi_base(),
            api_key: default_env(),
        }
    }
}

impl NewsApiConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        let raw = self.api_key.trim();
        let key = if raw.eq_ignore_ascii_case("env") {
            std::env::var(ENV_NEWSAPI_KEY).ok()?
        } else {
            raw.to_string()
        };
        let key = key.trim().to_string();
        (!key.is_empty()).then_some(key)
    }
}
