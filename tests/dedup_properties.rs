// tests/dedup_properties.rs
//
// Properties of the dedup stage over mixed-source input.

use chrono::{Duration, TimeZone, Utc};
use std::collections::HashSet;

use regulatory_intel::config::PipelineConfig;
use regulatory_intel::dedup::{deduplicate, normalized_key, DedupRules};
use regulatory_intel::ingest::types::{RawArticle, SourceKind};
use regulatory_intel::market::Market;

fn art(i: i64, source: SourceKind, publisher: &str, market: Market, title: &str, url: &str) -> RawArticle {
    RawArticle {
        source,
        publisher: publisher.into(),
        market,
        title: title.into(),
        url: url.into(),
        published_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(i),
        body_snippet: String::new(),
    }
}

fn sample() -> Vec<RawArticle> {
    use Market::*;
    use SourceKind::*;
    vec![
        art(0, GoogleNews, "Reuters", FR, "ECB Raises Rates", "https://reuters.com/ecb"),
        art(1, NewsApi, "Financial Times", FR, "ecb raises rates!!", "https://ft.com/ecb"),
        art(2, NewsApi, "Reuters", US, "SEC adopts climate rule", "https://reuters.com/sec"),
        art(3, GoogleNews, "Bloomberg", US, "SEC adopts climate rule", "https://bloomberg.com/sec"),
        art(4, GoogleNews, "Cointelegraph", US, "SEC sues crypto exchange", "https://cointelegraph.com/sec"),
        art(5, NewsApi, "Nikkei", JP, "BoJ ends negative rates", "https://asia.nikkei.com/boj"),
        art(6, NewsApi, "Nikkei", JP, "BOJ ends negative rates", "https://asia.nikkei.com/boj"),
        art(7, GoogleNews, "Kyodo", JP, "Tokyo weather update", "https://kyodo.jp/weather"),
        art(8, NewsApi, "Handelsblatt", DE, "BaFin fines Deutsche Bank", "https://handelsblatt.com/bafin"),
        art(9, NewsApi, "Handelsblatt", DE, "BaFin fines bank over AML", "https://handelsblatt.com/bafin"),
        art(10, GoogleNews, "???", UK, "!!!", "https://x.test/empty"),
    ]
}

fn rules() -> DedupRules {
    DedupRules::from_config(&PipelineConfig::default())
}

#[test]
fn ecb_headline_from_two_sources_is_kept_once() {
    let out = deduplicate(&sample()[..2], &rules());
    assert_eq!(out.articles.len(), 1);
    assert_eq!(out.articles[0].article.publisher, "Reuters");
    assert_eq!(out.duplicates, 1);
}

#[test]
fn dedup_is_idempotent() {
    let once = deduplicate(&sample(), &rules());
    let twice = deduplicate(&once.articles, &rules());
    assert_eq!(once.articles, twice.articles);
    assert_eq!(twice.duplicates, 0);
    assert_eq!(twice.off_topic + twice.blocked, 0);
}

#[test]
fn never_increases_cardinality_and_keys_are_unique() {
    let input = sample();
    let out = deduplicate(&input, &rules());
    assert!(out.articles.len() <= input.len());
    assert_eq!(
        out.articles.len() + out.duplicates + out.off_topic + out.blocked,
        input.len()
    );

    let keys: HashSet<_> = out.articles.iter().map(|a| normalized_key(&a.article.title)).collect();
    assert_eq!(keys.len(), out.articles.len());
    let urls: HashSet<_> = out.articles.iter().map(|a| a.article.url.as_str()).collect();
    assert_eq!(urls.len(), out.articles.len());
}

#[test]
fn filters_run_before_dedup() {
    let out = deduplicate(&sample(), &rules());
    assert_eq!(out.blocked, 1); // Cointelegraph
    // "Tokyo weather update" has no JP keyword; "!!!" normalizes to nothing
    assert_eq!(out.off_topic, 2);
    let titles: Vec<_> = out.articles.iter().map(|a| a.article.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "ECB Raises Rates",
            "SEC adopts climate rule",
            "BoJ ends negative rates",
            "BaFin fines Deutsche Bank",
        ]
    );
}

#[test]
fn first_seen_wins_regardless_of_source() {
    let mut input = sample();
    input.swap(0, 1);
    let out = deduplicate(&input[..2], &rules());
    assert_eq!(out.articles[0].article.publisher, "Financial Times");
}

#[test]
fn empty_input_is_empty_output() {
    let out = deduplicate::<RawArticle>(&[], &rules());
    assert!(out.articles.is_empty());
    assert_eq!(out.duplicates, 0);
}
