// src/ingest/providers/mod.rs
pub mod google_news;
pub mod newsapi;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::error::SourceError;
use crate::ingest::normalize_text;
use crate::ingest::types::{RawArticle, SourceKind};
use crate::market::Market;

/// Outcome of checking one provider item at the adapter boundary.
#[derive(Debug)]
pub(crate) enum Screened {
    Keep(RawArticle),
    /// Outside the lookback window; dropped without counting as malformed.
    Stale,
    Malformed,
}

/// Fields a provider item offers, before validation.
pub(crate) struct Candidate<'a> {
    pub source: SourceKind,
    pub market: Market,
    pub publisher: Option<&'a str>,
    pub title: Option<&'a str>,
    pub url: Option<&'a str>,
    pub published_at: Option<DateTime<Utc>>,
    pub snippet: Option<&'a str>,
}

/// Turn a candidate into a `RawArticle`, or say why not.
pub(crate) fn screen(c: Candidate<'_>, cutoff: DateTime<Utc>) -> Screened {
    let title = c.title.map(normalize_text).unwrap_or_default();
    let url = c.url.map(str::trim).unwrap_or_default();
    if title.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
        return Screened::Malformed;
    }
    let Some(published_at) = c.published_at else {
        return Screened::Malformed;
    };
    if published_at < cutoff {
        return Screened::Stale;
    }
    let publisher = c
        .publisher
        .map(normalize_text)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    Screened::Keep(RawArticle {
        source: c.source,
        publisher,
        market: c.market,
        title,
        url: url.to_string(),
        published_at,
        body_snippet: c.snippet.map(normalize_text).unwrap_or_default(),
    })
}

pub(crate) fn lookback_cutoff(now: DateTime<Utc>, lookback_days: u32) -> DateTime<Utc> {
    now - ChronoDuration::days(i64::from(lookback_days))
}

/// RSS dates: RFC 2822 via `time`, falling back to chrono for obsolete zone names.
pub(crate) fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if let Ok(dt) = OffsetDateTime::parse(ts, &Rfc2822) {
        return DateTime::from_timestamp(dt.unix_timestamp(), 0);
    }
    DateTime::parse_from_rfc2822(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `timeout` is the client's configured request timeout, reported on `is_timeout()`.
pub(crate) fn map_http_error(provider: &'static str, e: reqwest::Error, timeout: std::time::Duration) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout {
            provider,
            after: timeout,
        }
    } else if let Some(status) = e.status() {
        SourceError::Status {
            provider,
            status: status.as_u16(),
        }
    } else {
        SourceError::Unavailable {
            provider,
            reason: e.to_string(),
        }
    }
}

/// HTTP client shared by the providers' live mode.
pub(crate) fn http_client(timeout: std::time::Duration) -> anyhow::Result<reqwest::Client> {
    use anyhow::Context;
    reqwest::Client::builder()
        .user_agent("regulatory-intel/0.1")
        .connect_timeout(std::time::Duration::from_secs(4))
        .timeout(timeout)
        .build()
        .context("building provider http client")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand<'a>(title: Option<&'a str>, url: Option<&'a str>, at: Option<DateTime<Utc>>) -> Candidate<'a> {
        Candidate {
            source: SourceKind::Fixture,
            market: Market::US,
            publisher: Some("Reuters"),
            title,
            url,
            published_at: at,
            snippet: Some("<p>body</p>"),
        }
    }

    #[test]
    fn screen_rejects_missing_fields() {
        let now = Utc::now();
        let cutoff = lookback_cutoff(now, 7);
        assert!(matches!(screen(cand(None, Some("https://x.test/a"), Some(now)), cutoff), Screened::Malformed));
        assert!(matches!(screen(cand(Some("  "), Some("https://x.test/a"), Some(now)), cutoff), Screened::Malformed));
        assert!(matches!(screen(cand(Some("T"), None, Some(now)), cutoff), Screened::Malformed));
        assert!(matches!(screen(cand(Some("T"), Some("not a url"), Some(now)), cutoff), Screened::Malformed));
        assert!(matches!(screen(cand(Some("T"), Some("https://x.test/a"), None), cutoff), Screened::Malformed));
    }

    #[test]
    fn screen_drops_stale_and_keeps_fresh() {
        let now = Utc::now();
        let cutoff = lookback_cutoff(now, 7);
        let old = now - ChronoDuration::days(8);
        assert!(matches!(screen(cand(Some("T"), Some("https://x.test/a"), Some(old)), cutoff), Screened::Stale));
        match screen(cand(Some("T"), Some(" https://x.test/a "), Some(now)), cutoff) {
            Screened::Keep(a) => {
                assert_eq!(a.url, "https://x.test/a");
                assert_eq!(a.body_snippet, "body");
                assert_eq!(a.publisher, "Reuters");
            }
            other => panic!("expected Keep, got {other:?}"),
        }
    }

    #[test]
    fn rfc2822_with_gmt_parses() {
        let dt = parse_rfc2822("Mon, 13 Oct 2025 07:00:00 GMT").expect("parse");
        assert_eq!(dt.timestamp(), 1_760_338_800);
    }
}
