// src/pipeline.rs
//! Run orchestration: fetch → deduplicate → annotate → persist.
//!
//! Source and annotation failures are absorbed and counted; only "nothing fetched at
//! all" and a failed write end the run as `Failed`.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::annotate::{annotate_batch, AnnotatedArticle, Annotator};
use crate::config::PipelineConfig;
use crate::dedup::{deduplicate, DedupRules};
use crate::error::PipelineError;
use crate::ingest::providers::google_news::GoogleNewsProvider;
use crate::ingest::providers::newsapi::NewsApiProvider;
use crate::ingest::types::SourceProvider;
use crate::ingest::{fetch_all, pool_articles, FetchOutcome};
use crate::market::Market;
use crate::store::{ArticleRecord, Dataset, DatasetStore, JsonFileStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Fetching,
    Deduplicating,
    Annotating,
    Persisting,
    Done,
    PartiallyFailed,
    Failed,
    Aborted,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Fetching => "fetching",
            RunState::Deduplicating => "deduplicating",
            RunState::Annotating => "annotating",
            RunState::Persisting => "persisting",
            RunState::Done => "done",
            RunState::PartiallyFailed => "partially_failed",
            RunState::Failed => "failed",
            RunState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Done | RunState::PartiallyFailed | RunState::Failed | RunState::Aborted
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable abort switch for a running pipeline.
#[derive(Debug, Clone, Default)]
pub struct RunHandle {
    aborted: Arc<AtomicBool>,
}

impl RunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCoverage {
    pub market: Market,
    pub fetched: usize,
    pub unique: usize,
    pub annotated: usize,
    pub unannotated: usize,
    pub malformed: usize,
    pub source_failures: usize,
}

impl MarketCoverage {
    pub fn empty(market: Market) -> Self {
        Self {
            market,
            fetched: 0,
            unique: 0,
            annotated: 0,
            unannotated: 0,
            malformed: 0,
            source_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub fetched: usize,
    pub malformed: usize,
    pub source_failures: usize,
    pub duplicates: usize,
    pub off_topic: usize,
    pub blocked: usize,
    pub unique: usize,
    pub annotated: usize,
    pub annotation_failures: usize,
    /// Never submitted because of an abort.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    /// Every state entered, in order, ending with the terminal one.
    pub state_history: Vec<RunState>,
    pub coverage: Vec<MarketCoverage>,
    pub totals: RunTotals,
    pub dataset_path: Option<PathBuf>,
    pub failure: Option<PipelineError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Highest-relevance annotated title, for notifications.
    pub top_headline: Option<(String, u8)>,
}

impl RunReport {
    fn start() -> Self {
        Self {
            state: RunState::Fetching,
            state_history: vec![RunState::Fetching],
            coverage: Vec::new(),
            totals: RunTotals::default(),
            dataset_path: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
            top_headline: None,
        }
    }

    fn enter(&mut self, state: RunState) {
        tracing::debug!(target: "pipeline", from = %self.state, to = %state, "state change");
        self.state = state;
        self.state_history.push(state);
    }

    fn finish(mut self, state: RunState, failure: Option<PipelineError>) -> Self {
        self.enter(state);
        self.failure = failure;
        self.finished_at = Some(Utc::now());
        counter!("pipeline_runs_total", "state" => state.as_str()).increment(1);
        gauge!("pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        match &self.failure {
            Some(e) => tracing::warn!(target: "pipeline", state = %state, error = %e, "run finished"),
            None => tracing::info!(
                target: "pipeline",
                state = %state,
                unique = self.totals.unique,
                annotated = self.totals.annotated,
                "run finished"
            ),
        }
        self
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Completed runs by terminal state.");
        describe_gauge!("pipeline_last_run_ts", "Unix time of the last finished run.");
    });
}

pub struct Pipeline {
    cfg: Arc<PipelineConfig>,
    providers: Vec<Box<dyn SourceProvider>>,
    annotator: Annotator,
    store: Box<dyn DatasetStore>,
    handle: RunHandle,
}

impl Pipeline {
    pub fn new(
        cfg: Arc<PipelineConfig>,
        providers: Vec<Box<dyn SourceProvider>>,
        annotator: Annotator,
        store: Box<dyn DatasetStore>,
    ) -> Self {
        Self {
            cfg,
            providers,
            annotator,
            store,
            handle: RunHandle::new(),
        }
    }

    /// Wire the production providers, annotator and JSON store from config.
    pub fn from_config(cfg: Arc<PipelineConfig>) -> anyhow::Result<Self> {
        let providers = providers_from_config(&cfg)?;
        let annotator = Annotator::from_config(&cfg.annotator)?;
        let store = Box::new(JsonFileStore::new(&cfg.store.dir));
        Ok(Self::new(cfg, providers, annotator, store))
    }

    /// Share an existing abort switch instead of the pipeline's own.
    pub fn with_handle(mut self, handle: RunHandle) -> Self {
        self.handle = handle;
        self
    }

    /// Handle that aborts this pipeline's current (or next) run.
    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    pub async fn run(&self) -> RunReport {
        ensure_metrics_described();
        let cfg = &self.cfg;
        let mut report = RunReport::start();
        tracing::info!(
            target: "pipeline",
            markets = cfg.markets.len(),
            providers = self.providers.len(),
            lookback_days = cfg.lookback_days,
            "run started"
        );

        // fetch
        let outcomes = fetch_all(
            &self.providers,
            &cfg.markets,
            cfg.lookback_days,
            cfg.fetch.timeout(),
            cfg.fetch.concurrency,
        )
        .await;
        let mut coverage = coverage_from_fetch(&cfg.markets, &outcomes);
        for c in coverage.values() {
            report.totals.fetched += c.fetched;
            report.totals.malformed += c.malformed;
            report.totals.source_failures += c.source_failures;
        }
        report.coverage = coverage.values().copied().collect();

        if report.totals.fetched == 0 {
            return report.finish(RunState::Failed, Some(PipelineError::NoArticlesFetched));
        }
        if self.handle.is_aborted() {
            return report.finish(RunState::Aborted, Some(PipelineError::Aborted("fetching")));
        }

        // dedup
        report.enter(RunState::Deduplicating);
        let order: Vec<&'static str> = self.providers.iter().map(|p| p.name()).collect();
        let pooled = pool_articles(&outcomes, &order);
        let rules = DedupRules::from_config(cfg);
        let deduped = deduplicate(&pooled, &rules);
        report.totals.duplicates = deduped.duplicates;
        report.totals.off_topic = deduped.off_topic;
        report.totals.blocked = deduped.blocked;
        report.totals.unique = deduped.articles.len();
        for a in &deduped.articles {
            if let Some(c) = coverage.get_mut(&a.article.market) {
                c.unique += 1;
            }
        }
        if self.handle.is_aborted() {
            report.coverage = coverage.values().copied().collect();
            return report.finish(RunState::Aborted, Some(PipelineError::Aborted("deduplicating")));
        }

        // annotate
        report.enter(RunState::Annotating);
        let annotated = annotate_batch(
            &self.annotator,
            deduped.articles,
            cfg.annotator.concurrency,
            &self.handle,
        )
        .await;
        report.totals.annotation_failures = annotated.failures;
        report.totals.skipped = annotated.skipped;
        for a in &annotated.articles {
            if let Some(c) = coverage.get_mut(&a.unique.article.market) {
                if a.annotation.is_some() {
                    c.annotated += 1;
                } else {
                    c.unannotated += 1;
                }
            }
        }
        report.totals.annotated = coverage.values().map(|c| c.annotated).sum();
        report.coverage = coverage.values().copied().collect();
        report.top_headline = top_headline(&annotated.articles);

        if annotated.aborted && !cfg.accept_partial {
            return report.finish(RunState::Aborted, Some(PipelineError::Aborted("annotating")));
        }

        // persist
        report.enter(RunState::Persisting);
        let degraded = report.totals.source_failures > 0
            || report.totals.annotation_failures > 0
            || annotated.aborted;
        let terminal = if degraded {
            RunState::PartiallyFailed
        } else {
            RunState::Done
        };
        let dataset = Dataset {
            generated_at: Utc::now(),
            run_state: terminal,
            coverage: report.coverage.clone(),
            articles: annotated.articles.iter().map(ArticleRecord::from).collect(),
        };
        match self.store.write(&dataset) {
            Ok(path) => {
                report.dataset_path = Some(path);
                report.finish(terminal, None)
            }
            Err(e) => report.finish(RunState::Failed, Some(PipelineError::Persist(e))),
        }
    }
}

/// Google News always (when enabled); NewsAPI only with a resolvable key.
pub fn providers_from_config(cfg: &PipelineConfig) -> anyhow::Result<Vec<Box<dyn SourceProvider>>> {
    let timeout = cfg.fetch.timeout();
    let mut providers: Vec<Box<dyn SourceProvider>> = Vec::new();
    let g = &cfg.sources.google_news;
    if g.enabled {
        providers.push(Box::new(GoogleNewsProvider::from_url(&g.base_url, timeout)?));
    }
    let n = &cfg.sources.newsapi;
    if n.enabled {
        match n.resolved_api_key() {
            Some(key) => {
                tracing::info!(target: "pipeline", key_len = key.len(), "newsapi enabled");
                providers.push(Box::new(NewsApiProvider::from_url(
                    &n.base_url,
                    key,
                    cfg.fetch.page_size,
                    timeout,
                )?));
            }
            None => tracing::warn!(target: "pipeline", "newsapi enabled but no API key; skipping"),
        }
    }
    Ok(providers)
}

fn coverage_from_fetch(markets: &[Market], outcomes: &[FetchOutcome]) -> BTreeMap<Market, MarketCoverage> {
    let mut cov: BTreeMap<Market, MarketCoverage> = markets
        .iter()
        .map(|m| (*m, MarketCoverage::empty(*m)))
        .collect();
    for o in outcomes {
        let c = cov
            .entry(o.market)
            .or_insert_with(|| MarketCoverage::empty(o.market));
        match &o.result {
            Ok(b) => {
                c.fetched += b.articles.len();
                c.malformed += b.malformed;
            }
            Err(_) => c.source_failures += 1,
        }
    }
    cov
}

fn top_headline(articles: &[AnnotatedArticle]) -> Option<(String, u8)> {
    let mut best: Option<(&str, u8)> = None;
    for a in articles {
        let Some(ann) = &a.annotation else { continue };
        let score = ann.relevance_score.get();
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((a.unique.article.title.as_str(), score));
        }
    }
    best.map(|(t, s)| (t.to_string(), s))
}
