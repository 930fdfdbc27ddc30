// src/store.rs
//! Dataset persistence.
//!
//! One run produces one `Dataset` document. `JsonFileStore` writes it as
//! `analyzed_articles_YYYYMMDD_HHMMSS.json` (tmp file + rename) so readers never see a
//! half-written file; `read_latest` returns the newest one by name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::annotate::{AnnotatedArticle, Category, ImpactLevel};
use crate::error::StoreError;
use crate::ingest::types::SourceKind;
use crate::market::Market;
use crate::pipeline::{MarketCoverage, RunState};

pub const FILE_PREFIX: &str = "analyzed_articles_";

/// Flat, dashboard-facing form of an annotated article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: SourceKind,
    pub source_name: String,
    pub market: Market,
    pub market_name: String,
    #[serde(rename = "publishedAt")]
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub body_snippet: String,
    pub annotated: bool,
    #[serde(default)]
    pub relevance_score: Option<u8>,
    #[serde(default)]
    pub impact_level: Option<ImpactLevel>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub key_regulators: Vec<String>,
    #[serde(default)]
    pub what_happened: Option<String>,
    #[serde(default)]
    pub why_relevant: Option<String>,
}

impl From<&AnnotatedArticle> for ArticleRecord {
    fn from(a: &AnnotatedArticle) -> Self {
        let raw = &a.unique.article;
        let ann = a.annotation.as_ref();
        ArticleRecord {
            id: a.unique.id.clone(),
            title: raw.title.clone(),
            url: raw.url.clone(),
            source: raw.source,
            source_name: raw.publisher.clone(),
            market: raw.market,
            market_name: raw.market.display_name().to_string(),
            published_at: raw.published_at,
            body_snippet: raw.body_snippet.clone(),
            annotated: ann.is_some(),
            relevance_score: ann.map(|x| x.relevance_score.get()),
            impact_level: ann.map(|x| x.impact_level),
            category: ann.map(|x| x.category),
            key_regulators: ann
                .map(|x| x.key_regulators.iter().cloned().collect())
                .unwrap_or_default(),
            what_happened: ann.map(|x| x.what_happened.clone()),
            why_relevant: ann.map(|x| x.why_relevant.clone()),
        }
    }
}

impl From<AnnotatedArticle> for ArticleRecord {
    fn from(a: AnnotatedArticle) -> Self {
        ArticleRecord::from(&a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub generated_at: DateTime<Utc>,
    pub run_state: RunState,
    pub coverage: Vec<MarketCoverage>,
    pub articles: Vec<ArticleRecord>,
}

impl Dataset {
    /// Placeholder served before any run has persisted data.
    pub fn empty() -> Self {
        Self {
            generated_at: Utc::now(),
            run_state: RunState::Done,
            coverage: Vec::new(),
            articles: Vec::new(),
        }
    }
}

pub trait DatasetStore: Send + Sync {
    /// Persist `dataset`; returns where it went.
    fn write(&self, dataset: &Dataset) -> Result<PathBuf, StoreError>;
    /// Most recently written dataset.
    fn read_latest(&self) -> Result<Dataset, StoreError>;
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Free file name for `ts`; a second run within the same second gets a `_N` suffix.
    fn target_path(&self, ts: DateTime<Utc>) -> PathBuf {
        let stem = format!("{FILE_PREFIX}{}", ts.format("%Y%m%d_%H%M%S"));
        let mut path = self.dir.join(format!("{stem}.json"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{stem}_{n}.json"));
            n += 1;
        }
        path
    }

    fn latest_path(&self) -> Result<PathBuf, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.dir.clone()))
            }
            Err(e) => return Err(Self::io_err(&self.dir)(e)),
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter_map(|p| {
                let (stem, n) = p.file_name().and_then(|n| n.to_str()).and_then(order_key)?;
                Some(((stem.to_string(), n), p))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, p)| p)
            .ok_or_else(|| StoreError::NotFound(self.dir.clone()))
    }
}

/// `(timestamp stem, collision suffix)` for a dataset file name; `_10` sorts after `_9`.
fn order_key(name: &str) -> Option<(&str, u32)> {
    let body = name.strip_prefix(FILE_PREFIX)?.strip_suffix(".json")?;
    let mut parts = body.splitn(3, '_');
    let date = parts.next()?;
    let time = parts.next()?;
    let n = match parts.next() {
        Some(n) => n.parse().ok()?,
        None => 0,
    };
    Some((&body[..date.len() + 1 + time.len()], n))
}

impl DatasetStore for JsonFileStore {
    fn write(&self, dataset: &Dataset) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(Self::io_err(&self.dir))?;
        let path = self.target_path(dataset.generated_at);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(dataset)?;
        {
            let mut f = fs::File::create(&tmp).map_err(Self::io_err(&tmp))?;
            f.write_all(&json).map_err(Self::io_err(&tmp))?;
            f.sync_all().map_err(Self::io_err(&tmp))?;
        }
        fs::rename(&tmp, &path).map_err(Self::io_err(&path))?;
        tracing::info!(
            target: "pipeline",
            path = %path.display(),
            articles = dataset.articles.len(),
            "dataset written"
        );
        Ok(path)
    }

    fn read_latest(&self) -> Result<Dataset, StoreError> {
        let path = self.latest_path()?;
        let s = fs::read_to_string(&path).map_err(Self::io_err(&path))?;
        Ok(serde_json::from_str(&s)?)
    }
}

/// In-process store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    written: Mutex<Vec<Dataset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.written.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DatasetStore for MemoryStore {
    fn write(&self, dataset: &Dataset) -> Result<PathBuf, StoreError> {
        let mut w = self
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        w.push(dataset.clone());
        Ok(PathBuf::from(format!("memory://{}", w.len())))
    }

    fn read_latest(&self) -> Result<Dataset, StoreError> {
        let w = self
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        w.last()
            .cloned()
            .ok_or_else(|| StoreError::NotFound(PathBuf::from("memory://")))
    }
}

impl<S: DatasetStore + ?Sized> DatasetStore for std::sync::Arc<S> {
    fn write(&self, dataset: &Dataset) -> Result<PathBuf, StoreError> {
        (**self).write(dataset)
    }
    fn read_latest(&self) -> Result<Dataset, StoreError> {
        (**self).read_latest()
    }
}
