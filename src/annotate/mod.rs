// src/annotate/mod.rs
//! LLM annotation of unique articles.
//!
//! Each article is turned into a prompt, sent through an `LlmClient` under a
//! `RetryPolicy`, and the completion is validated into an `Annotation`. Failures are
//! per article: the article stays in the batch with `annotation = None`.

pub mod cache;
pub mod client;
pub mod parse;
pub mod retry;

use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::AnnotatorConfig;
use crate::dedup::UniqueArticle;
use crate::error::AnnotationError;
use crate::pipeline::RunHandle;

pub use cache::{cache_key, AnnotationCache};
pub use client::{build_client, CompletionRequest, DisabledClient, DynLlmClient, LlmClient, MockClient};
pub use parse::parse_annotation;
pub use retry::RetryPolicy;

/// Integer relevance in `0..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RelevanceScore(u8);

impl RelevanceScore {
    pub const MAX: u8 = 10;

    pub fn new(v: u8) -> Option<Self> {
        (v <= Self::MAX).then_some(Self(v))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for RelevanceScore {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::new(v).ok_or_else(|| format!("relevance score {v} out of range 0..=10"))
    }
}

impl From<RelevanceScore> for u8 {
    fn from(s: RelevanceScore) -> u8 {
        s.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
}

impl ImpactLevel {
    pub const ALL: [ImpactLevel; 3] = [ImpactLevel::High, ImpactLevel::Medium, ImpactLevel::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            ImpactLevel::High => "high",
            ImpactLevel::Medium => "medium",
            ImpactLevel::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim();
        Self::ALL.into_iter().find(|l| t.eq_ignore_ascii_case(l.as_str()))
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Regulatory area. Declaration order breaks ties in "primary focus".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MonetaryPolicy,
    BankingRegulation,
    SecuritiesRegulation,
    Other,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::MonetaryPolicy,
        Category::BankingRegulation,
        Category::SecuritiesRegulation,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::MonetaryPolicy => "monetary_policy",
            Category::BankingRegulation => "banking_regulation",
            Category::SecuritiesRegulation => "securities_regulation",
            Category::Other => "other",
        }
    }

    /// Case-insensitive; spaces and hyphens count as underscores.
    pub fn parse(s: &str) -> Option<Self> {
        let folded: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        Self::ALL.into_iter().find(|c| c.as_str() == folded)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub relevance_score: RelevanceScore,
    pub impact_level: ImpactLevel,
    pub category: Category,
    pub key_regulators: BTreeSet<String>,
    pub what_happened: String,
    pub why_relevant: String,
}

/// A unique article with its (possibly absent) annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedArticle {
    #[serde(flatten)]
    pub unique: UniqueArticle,
    pub annotation: Option<Annotation>,
}

impl AnnotatedArticle {
    pub fn unannotated(unique: UniqueArticle) -> Self {
        Self {
            unique,
            annotation: None,
        }
    }
}

pub const SYSTEM_PROMPT: &str = "You are a regulatory analyst for a sovereign investor. \
Assess how relevant a news article is to financial regulation in its market and answer \
with a single JSON object and nothing else, using exactly these keys:\n\
{\"relevance_score\": integer 0-10, \
\"impact_level\": \"high\" | \"medium\" | \"low\", \
\"category\": \"monetary_policy\" | \"banking_regulation\" | \"securities_regulation\" | \"other\", \
\"key_regulators\": [string], \
\"what_happened\": string (one sentence), \
\"why_relevant\": string (one sentence, investor perspective)}";

pub fn build_request(article: &UniqueArticle) -> CompletionRequest {
    let a = &article.article;
    let snippet = if a.body_snippet.is_empty() {
        "(none)"
    } else {
        a.body_snippet.as_str()
    };
    CompletionRequest {
        system: SYSTEM_PROMPT.to_string(),
        user: format!(
            "Market: {} ({})\nPublisher: {}\nPublished: {}\nTitle: {}\nSnippet: {}",
            a.market.display_name(),
            a.market.code(),
            a.publisher,
            a.published_at.format("%Y-%m-%d"),
            a.title,
            snippet
        ),
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("annotate_calls_total", "Annotation requests sent to the LLM (first attempts).");
        describe_counter!("annotate_retries_total", "Annotation retries after transient errors.");
        describe_counter!(
            "annotate_failures_total",
            "Articles left unannotated after the final attempt."
        );
        describe_histogram!("annotate_latency_ms", "Per-article annotation latency in milliseconds.");
    });
}

pub struct Annotator {
    client: DynLlmClient,
    policy: RetryPolicy,
    cache: Option<AnnotationCache>,
    call_timeout: Duration,
}

impl Annotator {
    pub fn new(client: DynLlmClient, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            client,
            policy,
            cache: None,
            call_timeout,
        }
    }

    pub fn with_cache(mut self, cache: AnnotationCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn from_config(cfg: &AnnotatorConfig) -> anyhow::Result<Self> {
        let client = build_client(cfg)?;
        tracing::info!(
            target: "annotate",
            provider = client.provider_name(),
            model = %cfg.model,
            key_len = cfg.resolved_api_key().map(|k| k.len()).unwrap_or(0),
            "annotator ready"
        );
        let annotator = Self::new(client, cfg.retry.policy(), cfg.timeout());
        Ok(match cfg.cache_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => annotator.with_cache(AnnotationCache::new(dir)),
            _ => annotator,
        })
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    /// Annotate one article: cache lookup, then LLM call under the retry policy.
    pub async fn annotate(&self, article: &UniqueArticle) -> Result<Annotation, AnnotationError> {
        ensure_metrics_described();
        let req = build_request(article);
        let key = self.cache.as_ref().map(|_| cache_key(self.client.model(), &req));

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key) {
                tracing::debug!(target: "annotate", id = %article.id, "cache hit");
                return Ok(hit);
            }
        }

        counter!("annotate_calls_total").increment(1);
        let t0 = Instant::now();
        let req = &req;
        let result = self
            .policy
            .run(|| async move {
                let text = match tokio::time::timeout(self.call_timeout, self.client.complete(req)).await {
                    Ok(r) => r?,
                    Err(_) => return Err(AnnotationError::Timeout(self.call_timeout)),
                };
                parse_annotation(&text)
            })
            .await;
        histogram!("annotate_latency_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match &result {
            Ok(ann) => {
                if let (Some(cache), Some(key)) = (&self.cache, &key) {
                    cache.put(key, ann);
                }
            }
            Err(e) => {
                counter!("annotate_failures_total").increment(1);
                tracing::warn!(target: "annotate", id = %article.id, error = %e, "annotation failed");
            }
        }
        result
    }
}

#[derive(Debug, Default)]
pub struct AnnotateOutcome {
    /// Same length and order as the input.
    pub articles: Vec<AnnotatedArticle>,
    pub failures: usize,
    /// Articles never submitted because the run was aborted.
    pub skipped: usize,
    pub aborted: bool,
}

/// Annotate a batch with bounded concurrency, keeping input order and size.
///
/// An abort on `handle` stops new submissions; the remaining articles are returned
/// unannotated and counted in `skipped`.
pub async fn annotate_batch(
    annotator: &Annotator,
    articles: Vec<UniqueArticle>,
    concurrency: usize,
    handle: &RunHandle,
) -> AnnotateOutcome {
    enum Done {
        Annotated(AnnotatedArticle),
        Failed(AnnotatedArticle),
        Skipped(AnnotatedArticle),
    }

    let results: Vec<Done> = stream::iter(articles)
        .map(|unique| async move {
            if handle.is_aborted() {
                return Done::Skipped(AnnotatedArticle::unannotated(unique));
            }
            match annotator.annotate(&unique).await {
                Ok(a) => Done::Annotated(AnnotatedArticle {
                    unique,
                    annotation: Some(a),
                }),
                Err(_) => Done::Failed(AnnotatedArticle::unannotated(unique)),
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut out = AnnotateOutcome {
        articles: Vec::with_capacity(results.len()),
        aborted: handle.is_aborted(),
        ..Default::default()
    };
    for r in results {
        let a = match r {
            Done::Annotated(a) => a,
            Done::Failed(a) => {
                out.failures += 1;
                a
            }
            Done::Skipped(a) => {
                out.skipped += 1;
                a
            }
        };
        out.articles.push(a);
    }
    out
}

/// Convenience for tests and embedding: an annotator over a fixed-response mock.
pub fn mock_annotator(response: impl Into<String>) -> Annotator {
    Annotator::new(
        Arc::new(MockClient::new(response)),
        RetryPolicy::none(),
        Duration::from_secs(5),
    )
}
