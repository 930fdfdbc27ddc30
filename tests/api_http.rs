// tests/api_http.rs
//
// HTTP-level tests for the dashboard feed Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::Value as Json;
use std::sync::Arc;
use tower::ServiceExt as _; // for `oneshot`

use regulatory_intel::annotate::{Category, ImpactLevel};
use regulatory_intel::api::{self, AppState};
use regulatory_intel::ingest::types::SourceKind;
use regulatory_intel::market::Market;
use regulatory_intel::pipeline::{MarketCoverage, RunState};
use regulatory_intel::store::{ArticleRecord, Dataset, DatasetStore, JsonFileStore, MemoryStore};

const BODY_LIMIT: usize = 1024 * 1024;

fn rec(market: Market, title: &str, score: Option<u8>, impact: ImpactLevel, cat: Category, regs: &[&str]) -> ArticleRecord {
    ArticleRecord {
        id: title.replace(' ', "-"),
        title: title.into(),
        url: format!("https://example.test/{}", title.replace(' ', "-")),
        source: SourceKind::GoogleNews,
        source_name: "Reuters".into(),
        market,
        market_name: market.display_name().into(),
        published_at: Utc::now(),
        body_snippet: String::new(),
        annotated: score.is_some(),
        relevance_score: score,
        impact_level: score.map(|_| impact),
        category: score.map(|_| cat),
        key_regulators: regs.iter().map(|s| s.to_string()).collect(),
        what_happened: score.map(|_| "x".to_string()),
        why_relevant: score.map(|_| "y".to_string()),
    }
}

fn dataset() -> Dataset {
    use Category::*;
    use ImpactLevel::*;
    Dataset {
        generated_at: Utc::now(),
        run_state: RunState::PartiallyFailed,
        coverage: vec![MarketCoverage::empty(Market::US), MarketCoverage::empty(Market::JP)],
        articles: vec![
            rec(Market::US, "SEC adopts rule", Some(9), High, SecuritiesRegulation, &["SEC"]),
            rec(Market::US, "Fed holds rates", Some(6), Medium, MonetaryPolicy, &["Federal Reserve", "SEC"]),
            rec(Market::US, "Unscored story", None, Low, Other, &[]),
            rec(Market::JP, "BoJ ends negative rates", Some(10), High, MonetaryPolicy, &["BOJ"]),
            rec(Market::FR, "AMF note", Some(2), Low, SecuritiesRegulation, &["AMF"]),
        ],
    }
}

fn test_router(threshold: u8) -> Router {
    let store = Arc::new(MemoryStore::new());
    api::router(AppState::new(store, dataset(), threshold))
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read body");
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

#[tokio::test]
async fn health_returns_ok() {
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = test_router(0).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(std::str::from_utf8(&bytes).unwrap(), "OK");
}

#[tokio::test]
async fn articles_default_threshold_applies() {
    let (s, v) = get_json(test_router(0), "/api/articles").await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(v["count"], 5);

    let (_, v) = get_json(test_router(5), "/api/articles").await;
    assert_eq!(v["count"], 3);
    // explicit query wins over the configured default
    let (_, v) = get_json(test_router(5), "/api/articles?min_relevance=0").await;
    assert_eq!(v["count"], 5);
}

#[tokio::test]
async fn articles_filter_by_market_category_and_impact() {
    let (_, v) = get_json(test_router(0), "/api/articles?market=us,JP&impact=high").await;
    assert_eq!(v["count"], 2);
    let (_, v) = get_json(test_router(0), "/api/articles?category=monetary_policy").await;
    let titles: Vec<_> = v["articles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, vec!["Fed holds rates", "BoJ ends negative rates"]);
    // dashboard field names survive serialization
    assert!(v["articles"][0].get("publishedAt").is_some());
    assert_eq!(v["articles"][0]["market_name"], "United States");
}

#[tokio::test]
async fn invalid_filters_are_400() {
    for uri in [
        "/api/articles?market=Narnia",
        "/api/articles?min_relevance=11",
        "/api/articles?min_relevance=high",
        "/api/insights?category=crypto",
        "/api/markets?impact=severe",
        "/api/top?per_market=0",
    ] {
        let (s, v) = get_json(test_router(0), uri).await;
        assert_eq!(s, StatusCode::BAD_REQUEST, "{uri}");
        assert!(v["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn insights_and_market_summaries() {
    let (_, v) = get_json(test_router(0), "/api/insights").await;
    assert_eq!(v["total_articles"], 5);
    assert_eq!(v["high_impact"], 2);
    assert_eq!(v["markets_covered"], 3);
    assert_eq!(v["markets_total"], 5);
    assert_eq!(v["avg_relevance"], 6.8);

    let (_, v) = get_json(test_router(0), "/api/markets").await;
    let first = &v[0];
    assert_eq!(first["market"], "US");
    assert_eq!(first["article_count"], 3);
    assert_eq!(first["top_regulator"], "SEC (2 mentions)");
    assert_eq!(first["iso3"], "USA");
    assert_eq!(first["avg_relevance"], 7.5);
}

#[tokio::test]
async fn categories_and_top() {
    let (_, v) = get_json(test_router(0), "/api/categories").await;
    assert_eq!(v["US"]["securities_regulation"], 1);
    assert_eq!(v["JP"]["monetary_policy"], 1);

    let (_, v) = get_json(test_router(0), "/api/top?per_market=1").await;
    let markets: Vec<_> = v.as_array().unwrap().iter().map(|t| t["market"].as_str().unwrap()).collect();
    assert_eq!(markets, vec!["US", "JP", "FR"]);
    assert_eq!(v[0]["articles"][0]["title"], "SEC adopts rule");
    assert_eq!(v[0]["articles"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn coverage_reports_run_state() {
    let (_, v) = get_json(test_router(0), "/api/coverage").await;
    assert_eq!(v["run_state"], "partially_failed");
    assert_eq!(v["coverage"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn reload_picks_up_newest_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path()));
    let app = api::router(AppState::load(store.clone(), 0));

    let (_, v) = get_json(app.clone(), "/api/articles").await;
    assert_eq!(v["count"], 0);

    let req = Request::builder().method("POST").uri("/admin/reload").body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    store.write(&dataset()).unwrap();
    let req = Request::builder().method("POST").uri("/admin/reload").body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (_, v) = get_json(app, "/api/articles").await;
    assert_eq!(v["count"], 5);
}
