// src/api.rs
//! Read-only HTTP feed over the latest dataset.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::annotate::{Category, ImpactLevel};
use crate::error::StoreError;
use crate::market::Market;
use crate::store::{Dataset, DatasetStore};
use crate::summary::{self, DashboardFilter};

#[derive(Clone)]
pub struct AppState {
    dataset: Arc<RwLock<Arc<Dataset>>>,
    store: Arc<dyn DatasetStore>,
    /// Default `min_relevance` when the query has none.
    relevance_threshold: u8,
}

impl AppState {
    pub fn new(store: Arc<dyn DatasetStore>, dataset: Dataset, relevance_threshold: u8) -> Self {
        Self {
            dataset: Arc::new(RwLock::new(Arc::new(dataset))),
            store,
            relevance_threshold,
        }
    }

    /// Start from the latest persisted dataset, or an empty one if none exists yet.
    pub fn load(store: Arc<dyn DatasetStore>, relevance_threshold: u8) -> Self {
        let dataset = match store.read_latest() {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(target: "api", error = %e, "no dataset loaded; serving empty feed");
                Dataset::empty()
            }
        };
        Self::new(store, dataset, relevance_threshold)
    }

    fn snapshot(&self) -> Arc<Dataset> {
        self.dataset
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace(&self, fresh: Dataset) {
        let mut w = self
            .dataset
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *w = Arc::new(fresh);
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/articles", get(articles))
        .route("/api/insights", get(insights))
        .route("/api/markets", get(markets))
        .route("/api/categories", get(categories))
        .route("/api/top", get(top))
        .route("/api/coverage", get(coverage))
        .route("/admin/reload", post(admin_reload))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Raw query; values are comma-separated lists.
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    market: Option<String>,
    min_relevance: Option<String>,
    category: Option<String>,
    impact: Option<String>,
    per_market: Option<String>,
}

struct BadRequest(String);

impl IntoResponse for BadRequest {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.0 }))).into_response()
    }
}

fn csv(s: &Option<String>) -> impl Iterator<Item = &str> {
    s.as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FilterQuery {
    fn to_filter(&self, default_min: u8) -> Result<DashboardFilter, BadRequest> {
        let markets: BTreeSet<Market> = csv(&self.market)
            .map(|t| t.parse::<Market>().map_err(BadRequest))
            .collect::<Result<_, _>>()?;
        let categories: BTreeSet<Category> = csv(&self.category)
            .map(|t| Category::parse(t).ok_or_else(|| BadRequest(format!("unknown category '{t}'"))))
            .collect::<Result<_, _>>()?;
        let impacts: BTreeSet<ImpactLevel> = csv(&self.impact)
            .map(|t| ImpactLevel::parse(t).ok_or_else(|| BadRequest(format!("unknown impact '{t}'"))))
            .collect::<Result<_, _>>()?;
        let min_relevance = match self.min_relevance.as_deref().map(str::trim) {
            None | Some("") => default_min,
            Some(s) => s
                .parse::<u8>()
                .ok()
                .filter(|v| *v <= 10)
                .ok_or_else(|| BadRequest(format!("min_relevance must be 0-10, got '{s}'")))?,
        };
        Ok(DashboardFilter {
            markets,
            min_relevance,
            categories,
            impacts,
        })
    }

    fn per_market(&self) -> Result<usize, BadRequest> {
        match self.per_market.as_deref().map(str::trim) {
            None | Some("") => Ok(5),
            Some(s) => s
                .parse::<usize>()
                .ok()
                .filter(|n| (1..=50).contains(n))
                .ok_or_else(|| BadRequest(format!("per_market must be 1-50, got '{s}'"))),
        }
    }
}

#[derive(Serialize)]
struct ArticlesOut<'a> {
    count: usize,
    articles: Vec<&'a crate::store::ArticleRecord>,
}

async fn articles(State(state): State<AppState>, Query(q): Query<FilterQuery>) -> Result<Response, BadRequest> {
    let f = q.to_filter(state.relevance_threshold)?;
    let ds = state.snapshot();
    let articles = f.apply(&ds.articles);
    Ok(Json(ArticlesOut {
        count: articles.len(),
        articles,
    })
    .into_response())
}

async fn insights(State(state): State<AppState>, Query(q): Query<FilterQuery>) -> Result<Response, BadRequest> {
    let f = q.to_filter(state.relevance_threshold)?;
    let ds = state.snapshot();
    Ok(Json(summary::key_insights(f.apply(&ds.articles))).into_response())
}

async fn markets(State(state): State<AppState>, Query(q): Query<FilterQuery>) -> Result<Response, BadRequest> {
    let f = q.to_filter(state.relevance_threshold)?;
    let ds = state.snapshot();
    Ok(Json(summary::market_summaries(f.apply(&ds.articles))).into_response())
}

async fn categories(State(state): State<AppState>, Query(q): Query<FilterQuery>) -> Result<Response, BadRequest> {
    let f = q.to_filter(state.relevance_threshold)?;
    let ds = state.snapshot();
    Ok(Json(summary::category_matrix(f.apply(&ds.articles))).into_response())
}

async fn top(State(state): State<AppState>, Query(q): Query<FilterQuery>) -> Result<Response, BadRequest> {
    let f = q.to_filter(state.relevance_threshold)?;
    let n = q.per_market()?;
    let ds = state.snapshot();
    Ok(Json(summary::top_articles(f.apply(&ds.articles), n)).into_response())
}

async fn coverage(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ds = state.snapshot();
    Json(json!({
        "generated_at": ds.generated_at,
        "run_state": ds.run_state,
        "coverage": ds.coverage,
    }))
}

async fn admin_reload(State(state): State<AppState>) -> Response {
    let store = state.store.clone();
    let res = tokio::task::spawn_blocking(move || store.read_latest()).await;
    match res {
        Ok(Ok(fresh)) => {
            let n = fresh.articles.len();
            state.replace(fresh);
            tracing::info!(target: "api", articles = n, "dataset reloaded");
            Json(json!({ "reloaded": true, "articles": n })).into_response()
        }
        Ok(Err(StoreError::NotFound(p))) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no dataset in {}", p.display()) })),
        )
            .into_response(),
        Ok(Err(e)) => {
            tracing::warn!(target: "api", error = %e, "reload failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}
