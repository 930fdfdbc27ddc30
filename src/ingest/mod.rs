// src/ingest/mod.rs
pub mod config;
pub mod providers;
pub mod types;

use crate::error::SourceError;
use crate::ingest::types::{FetchBatch, RawArticle, SourceProvider};
use crate::market::Market;
use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::time::{Duration, Instant};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_articles_total",
            "Well-formed articles returned by providers."
        );
        describe_counter!(
            "ingest_malformed_total",
            "Records dropped at the adapter boundary (missing title/url/date)."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Provider fetch/parse failures and timeouts."
        );
        describe_histogram!("ingest_fetch_ms", "Provider fetch time in milliseconds.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Per (market, provider) result of the fetch stage.
#[derive(Debug)]
pub struct FetchOutcome {
    pub market: Market,
    pub provider: &'static str,
    pub result: Result<FetchBatch, SourceError>,
}

/// Fetch every (market, provider) pair with a per-call timeout and bounded concurrency.
///
/// Outcomes come back in job order (market-major, then provider order) regardless of
/// which call finishes first.
pub async fn fetch_all(
    providers: &[Box<dyn SourceProvider>],
    markets: &[Market],
    lookback_days: u32,
    timeout: Duration,
    concurrency: usize,
) -> Vec<FetchOutcome> {
    ensure_metrics_described();

    let jobs: Vec<(Market, &dyn SourceProvider)> = markets
        .iter()
        .flat_map(|m| providers.iter().map(move |p| (*m, p.as_ref())))
        .collect();

    stream::iter(jobs)
        .map(|(market, p)| async move {
            let t0 = Instant::now();
            let result = match tokio::time::timeout(timeout, p.fetch(market, lookback_days)).await
            {
                Ok(r) => r,
                Err(_) => Err(SourceError::Timeout {
                    provider: p.name(),
                    after: timeout,
                }),
            };
            histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

            match &result {
                Ok(batch) => {
                    counter!("ingest_articles_total").increment(batch.articles.len() as u64);
                    counter!("ingest_malformed_total").increment(batch.malformed as u64);
                    tracing::debug!(
                        target: "ingest",
                        provider = p.name(),
                        %market,
                        articles = batch.articles.len(),
                        malformed = batch.malformed,
                        "fetched"
                    );
                }
                Err(e) => {
                    counter!("ingest_source_errors_total").increment(1);
                    tracing::warn!(target: "ingest", error = %e, provider = p.name(), %market, "provider error");
                }
            }

            FetchOutcome {
                market,
                provider: p.name(),
                result,
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Pool successful batches into one deterministic sequence: stable sort by market, then
/// provider position in `provider_order`, keeping each batch's original order.
pub fn pool_articles(outcomes: &[FetchOutcome], provider_order: &[&'static str]) -> Vec<RawArticle> {
    let mut keyed: Vec<(Market, usize, &RawArticle)> = Vec::new();
    for o in outcomes {
        let Ok(batch) = &o.result else { continue };
        let rank = provider_order
            .iter()
            .position(|n| *n == o.provider)
            .unwrap_or(usize::MAX);
        keyed.extend(batch.articles.iter().map(|a| (o.market, rank, a)));
    }
    keyed.sort_by_key(|(m, rank, _)| (*m, *rank));
    keyed.into_iter().map(|(_, _, a)| a.clone()).collect()
}
