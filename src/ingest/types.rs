// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SourceError;
use crate::market::Market;

/// Which feed produced an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    GoogleNews,
    NewsApi,
    Fixture,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::GoogleNews => "google_news",
            SourceKind::NewsApi => "newsapi",
            SourceKind::Fixture => "fixture",
        })
    }
}

/// One article as delivered by a source adapter. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawArticle {
    pub source: SourceKind,
    pub publisher: String, // outlet name, e.g. "Reuters"
    pub market: Market,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub body_snippet: String,
}

/// What one adapter call produced: well-formed records plus the count of dropped ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchBatch {
    pub articles: Vec<RawArticle>,
    pub malformed: usize,
}

impl FetchBatch {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch articles for `market` published within the last `lookback_days`.
    async fn fetch(&self, market: Market, lookback_days: u32) -> Result<FetchBatch, SourceError>;
    fn name(&self) -> &'static str;
}

/// Reject requests the adapters cannot serve.
pub fn check_lookback(provider: &'static str, market: Market, lookback_days: u32) -> Result<(), SourceError> {
    if lookback_days == 0 {
        return Err(SourceError::InvalidRequest {
            provider,
            market,
            reason: "lookback_days must be > 0".to_string(),
        });
    }
    Ok(())
}
