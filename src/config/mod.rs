// src/config/mod.rs
//! Immutable run configuration.
//!
//! Loaded once (TOML, every field defaulted), sanitized, then shared read-only with each
//! component through an `Arc<PipelineConfig>`.

pub mod annotator;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub use annotator::{AnnotatorConfig, RetryConfig};

use crate::ingest::config::{FetchConfig, SourcesConfig};
use crate::market::Market;

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_LOOKBACK_DAYS: &str = "LOOKBACK_DAYS";
pub const ENV_RELEVANCE_THRESHOLD: &str = "RELEVANCE_THRESHOLD";

fn default_markets() -> Vec<Market> {
    Market::ALL.to_vec()
}
fn default_lookback_days() -> u32 {
    7
}
fn default_crypto_blocklist() -> BTreeSet<String> {
    ["economictimes.com", "bitcoinist", "cointelegraph"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_markets")]
    pub markets: Vec<Market>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Default minimum relevance for downstream display (0–10).
    #[serde(default)]
    pub relevance_threshold: u8,
    /// Publisher names or domains excluded before dedup.
    #[serde(default = "default_crypto_blocklist")]
    pub crypto_blocklist: BTreeSet<String>,
    /// Per-market keywords; an article must mention at least one. Missing market = no filter.
    #[serde(
        default = "default_keyword_allowlist",
        deserialize_with = "de_market_map"
    )]
    pub keyword_allowlist: BTreeMap<Market, BTreeSet<String>>,
    /// Persist partially-annotated data when a run is aborted mid-annotation.
    #[serde(default)]
    pub accept_partial: bool,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub annotator: AnnotatorConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            markets: default_markets(),
            lookback_days: default_lookback_days(),
            relevance_threshold: 0,
            crypto_blocklist: default_crypto_blocklist(),
            keyword_allowlist: default_keyword_allowlist(),
            accept_partial: false,
            fetch: FetchConfig::default(),
            sources: SourcesConfig::default(),
            annotator: AnnotatorConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

fn default_store_dir() -> String {
    "data/processed".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document and sanitize it. Env overrides are not applied here.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&content)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $PIPELINE_CONFIG_PATH (must exist)
    /// 2) config/pipeline.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(days) = parse_env::<u32>(ENV_LOOKBACK_DAYS) {
            self.lookback_days = days.max(1);
        }
        if let Some(t) = parse_env::<u32>(ENV_RELEVANCE_THRESHOLD) {
            self.relevance_threshold = t.min(10) as u8;
        }
    }

    fn sanitize(&mut self) {
        if self.markets.is_empty() {
            self.markets = default_markets();
        }
        let mut seen = BTreeSet::new();
        self.markets.retain(|m| seen.insert(*m));
        self.markets.sort();

        self.lookback_days = self.lookback_days.max(1);
        self.relevance_threshold = self.relevance_threshold.min(10);
        self.crypto_blocklist = clean_set(std::mem::take(&mut self.crypto_blocklist));
        for words in self.keyword_allowlist.values_mut() {
            *words = clean_set(std::mem::take(words));
        }
        self.fetch.sanitize();
        self.annotator.sanitize();
    }

    pub fn allowlist_for(&self, market: Market) -> Option<&BTreeSet<String>> {
        self.keyword_allowlist.get(&market).filter(|s| !s.is_empty())
    }
}

/// Market keys go through `Market::from_str` so "us" or "Japan" work as table keys.
fn de_market_map<'de, D>(d: D) -> Result<BTreeMap<Market, BTreeSet<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, BTreeSet<String>>::deserialize(d)?;
    let mut out = BTreeMap::new();
    for (k, v) in raw {
        let m: Market = k.parse().map_err(serde::de::Error::custom)?;
        out.entry(m).or_insert_with(BTreeSet::new).extend(v);
    }
    Ok(out)
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn clean_set(items: BTreeSet<String>) -> BTreeSet<String> {
    items
        .into_iter()
        .map(|it| it.trim().to_lowercase())
        .filter(|it| !it.is_empty())
        .collect()
}

/// Built-in regulator/topic vocabulary per market.
pub fn default_keyword_allowlist() -> BTreeMap<Market, BTreeSet<String>> {
    let common = [
        "regulat",
        "rule",
        "supervis",
        "central bank",
        "interest rate",
        "rates",
        "inflation",
        "capital requirement",
        "bank",
        "securities",
        "financial",
        "sanction",
        "fine",
        "compliance",
    ];
    let per_market: [(Market, &[&str]); 5] = [
        (
            Market::US,
            &["sec", "federal reserve", "fed", "fomc", "cftc", "fdic", "occ", "treasury", "powell"],
        ),
        (Market::UK, &["bank of england", "boe", "fca", "pra", "bailey", "ofsi"]),
        (
            Market::FR,
            &["amf", "acpr", "banque de france", "ecb", "villeroy", "france"],
        ),
        (Market::DE, &["bafin", "bundesbank", "ecb", "nagel", "germany"]),
        (
            Market::JP,
            &["bank of japan", "boj", "fsa", "ueda", "japan", "financial services agency"],
        ),
    ];
    per_market
        .into_iter()
        .map(|(m, words)| {
            let set = words
                .iter()
                .chain(common.iter())
                .map(|w| w.to_string())
                .collect();
            (m, set)
        })
        .collect()
}
