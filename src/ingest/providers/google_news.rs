// src/ingest/providers/google_news.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::error::SourceError;
use crate::ingest::providers::{
    http_client, lookback_cutoff, map_http_error, parse_rfc2822, screen, Candidate, Screened,
};
use crate::ingest::types::{check_lookback, FetchBatch, SourceKind, SourceProvider};
use crate::market::Market;

const NAME: &str = "GoogleNews";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    source: Option<ItemSource>,
}

#[derive(Debug, Deserialize)]
struct ItemSource {
    #[serde(rename = "@url")]
    #[allow(dead_code)]
    url: Option<String>,
    #[serde(rename = "$text")]
    name: Option<String>,
}

enum Mode {
    /// Same document for every market; used by tests and offline runs.
    Fixture(String),
    Http {
        base_url: String,
        client: reqwest::Client,
        timeout: std::time::Duration,
    },
}

/// Google News RSS search, one query per market.
pub struct GoogleNewsProvider {
    mode: Mode,
    now: Option<DateTime<Utc>>,
}

impl GoogleNewsProvider {
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
            now: None,
        }
    }

    pub fn from_url(base_url: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        Ok(Self {
            mode: Mode::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
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

    fn parse_items(&self, xml: &str, market: Market, lookback_days: u32) -> Result<FetchBatch, SourceError> {
        let rss: Rss = from_str(&scrub_html_entities_for_xml(xml)).map_err(|e| {
            SourceError::InvalidResponse {
                provider: NAME,
                reason: format!("parsing google news rss: {e}"),
            }
        })?;

        let cutoff = lookback_cutoff(self.now.unwrap_or_else(Utc::now), lookback_days);
        let mut batch = FetchBatch::empty();
        for it in rss.channel.item {
            let publisher = it.source.as_ref().and_then(|s| s.name.as_deref());
            let title = it.title.as_deref().map(|t| strip_publisher_suffix(t, publisher));
            let c = Candidate {
                source: SourceKind::GoogleNews,
                market,
                publisher,
                title,
                url: it.link.as_deref(),
                published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
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
impl SourceProvider for GoogleNewsProvider {
    async fn fetch(&self, market: Market, lookback_days: u32) -> Result<FetchBatch, SourceError> {
        check_lookback(NAME, market, lookback_days)?;
        match &self.mode {
            Mode::Fixture(s) => self.parse_items(s, market, lookback_days),
            Mode::Http {
                base_url,
                client,
                timeout,
            } => {
                let q = format!("{} when:{}d", market.search_query(), lookback_days);
                let resp = client
                    .get(format!("{base_url}/rss/search"))
                    .query(&[("q", q.as_str()), ("hl", "en-US"), ("gl", "US"), ("ceid", "US:en")])
                    .send()
                    .await
                    .map_err(|e| map_http_error(NAME, e, *timeout))?;
                if !resp.status().is_success() {
                    return Err(SourceError::Status {
                        provider: NAME,
                        status: resp.status().as_u16(),
                    });
                }
                let body = resp.text().await.map_err(|e| map_http_error(NAME, e, *timeout))?;
                self.parse_items(&body, market, lookback_days)
            }
        }
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

/// Google News titles end in " - {publisher}".
fn strip_publisher_suffix<'a>(title: &'a str, publisher: Option<&str>) -> &'a str {
    let Some(p) = publisher.map(str::trim).filter(|p| !p.is_empty()) else {
        return title;
    };
    let t = title.trim_end();
    t.strip_suffix(p)
        .and_then(|rest| rest.trim_end().strip_suffix('-'))
        .map(str::trim_end)
        .unwrap_or(title)
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
