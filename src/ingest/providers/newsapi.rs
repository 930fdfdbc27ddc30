// src/ingest/providers/newsapi.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::SourceError;
use crate::ingest::providers::{
    http_client, lookback_cutoff, map_http_error, parse_rfc3339, screen, Candidate, Screened,
};
use crate::ingest::types::{check_lookback, FetchBatch, SourceKind, SourceProvider};
use crate::market::Market;

const NAME: &str = "NewsAPI";

/// NewsAPI marks takedowns with this placeholder instead of dropping the item.
const REMOVED: &str = "[Removed]";

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<Item>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    #[serde(default)]
    source: Option<ItemSource>,
    title: Option<String>,
    url: Option<String>,
    published_at: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemSource {
    name: Option<String>,
}

enum Mode {
    Fixture(String),
    Http {
        base_url: String,
        api_key: String,
        page_size: usize,
        client: reqwest::Client,
        timeout: std::time::Duration,
    },
}

/// NewsAPI `/v2/everything` search, one query per market.
pub struct NewsApiProvider {
    mode: Mode,
    now: Option<DateTime<Utc>>,
}

impl NewsApiProvider {
    pub fn from_fixture(json: &str) -> Self {
        Self {
            mode: Mode::Fixture(json.to_string()),
            now: None,
        }
    }

    pub fn from_url(
        base_url: &str,
        api_key: String,
        page_size: usize,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            mode: Mode::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key,
                page_size,
                client: http_client(timeout)?,
                timeout,
            },
            now: None,
        })
    }

    /// Pin the reference time used for the lookback window.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn reference_now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    fn parse_items(&self, body: &str, market: Market, lookback_days: u32) -> Result<FetchBatch, SourceError> {
        let env: Envelope = serde_json::from_str(body).map_err(|e| SourceError::InvalidResponse {
            provider: NAME,
            reason: format!("parsing newsapi json: {e}"),
        })?;
        if env.status != "ok" {
            return Err(SourceError::Unavailable {
                provider: NAME,
                reason: env.message.unwrap_or_else(|| format!("status '{}'", env.status)),
            });
        }

        let cutoff = lookback_cutoff(self.reference_now(), lookback_days);
        let mut batch = FetchBatch::empty();
        for it in env.articles {
            let title = it.title.as_deref().filter(|t| t.trim() != REMOVED);
            let c = Candidate {
                source: SourceKind::NewsApi,
                market,
                publisher: it.source.as_ref().and_then(|s| s.name.as_deref()),
                title,
                url: it.url.as_deref(),
                published_at: it.published_at.as_deref().and_then(parse_rfc3339),
                snippet: it.description.as_deref(),
            };
            match screen(c, cutoff) {
                Screened::Keep(a) => batch.articles.push(a),
                Screened::Malformed => batch.malformed += 1,
                Screened::Stale => {}
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl SourceProvider for NewsApiProvider {
    async fn fetch(&self, market: Market, lookback_days: u32) -> Result<FetchBatch, SourceError> {
        check_lookback(NAME, market, lookback_days)?;
        match &self.mode {
            Mode::Fixture(s) => self.parse_items(s, market, lookback_days),
            Mode::Http {
                base_url,
                api_key,
                page_size,
                client,
                timeout,
            } => {
                let from = lookback_cutoff(self.reference_now(), lookback_days)
                    .format("%Y-%m-%d")
                    .to_string();
                let page_size = page_size.to_string();
                let resp = client
                    .get(format!("{base_url}/v2/everything"))
                    .header("X-Api-Key", api_key)
                    .query(&[
                        ("q", market.search_query()),
                        ("from", from.as_str()),
                        ("language", "en"),
                        ("sortBy", "publishedAt"),
                        ("pageSize", page_size.as_str()),
                    ])
                    .send()
                    .await
                    .map_err(|e| map_http_error(NAME, e, *timeout))?;
                let status = resp.status();
                let body = resp.text().await.map_err(|e| map_http_error(NAME, e, *timeout))?;
                // NewsAPI puts the reason in a JSON envelope even on 4xx
                if !status.is_success() && !body.contains("\"status\"") {
                    return Err(SourceError::Status {
                        provider: NAME,
                        status: status.as_u16(),
                    });
                }
                self.parse_items(&body, market, lookback_days)
            }
        }
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 14, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn error_envelope_is_unavailable() {
        let p = NewsApiProvider::from_fixture(
            r#"{"status":"error","code":"apiKeyInvalid","message":"Your API key is invalid."}"#,
        );
        let err = p.fetch(Market::UK, 7).await.unwrap_err();
        match err {
            SourceError::Unavailable { reason, .. } => assert!(reason.contains("invalid")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn removed_placeholders_count_as_malformed() {
        let p = NewsApiProvider::from_fixture(
            r#"{"status":"ok","totalResults":2,"articles":[
                {"source":{"id":null,"name":"[Removed]"},"title":"[Removed]","url":"https://removed.com","publishedAt":"2025-10-13T07:00:00Z"},
                {"source":{"id":"reuters","name":"Reuters"},"title":"FCA fines broker","url":"https://www.reuters.com/a","publishedAt":"2025-10-13T07:00:00Z","description":"The FCA said..."}
            ]}"#,
        )
        .at(now());
        let batch = p.fetch(Market::UK, 7).await.unwrap();
        assert_eq!(batch.articles.len(), 1);
        assert_eq!(batch.malformed, 1);
        assert_eq!(batch.articles[0].publisher, "Reuters");
        assert_eq!(batch.articles[0].market, Market::UK);
        assert_eq!(batch.articles[0].source, SourceKind::NewsApi);
    }
}
