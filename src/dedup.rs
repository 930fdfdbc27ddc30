// src/dedup.rs
//! Cross-source quality filter and deduplication.
//!
//! Pure and deterministic: the first article (in input order) wins, and running the
//! stage on its own output is a no-op.

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::PipelineConfig;
use crate::ingest::types::RawArticle;
use crate::market::Market;

/// A raw article that survived dedup, plus its stable identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UniqueArticle {
    pub id: String,
    #[serde(flatten)]
    pub article: RawArticle,
}

impl AsRef<RawArticle> for RawArticle {
    fn as_ref(&self) -> &RawArticle {
        self
    }
}

impl AsRef<RawArticle> for UniqueArticle {
    fn as_ref(&self) -> &RawArticle {
        &self.article
    }
}

/// Filter inputs taken from the run configuration.
#[derive(Debug, Clone, Default)]
pub struct DedupRules {
    /// Normalized keywords per market; absent market = accept all.
    pub keyword_allowlist: BTreeMap<Market, Vec<String>>,
    /// Lowercased publisher names or domains.
    pub crypto_blocklist: BTreeSet<String>,
}

impl DedupRules {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        let keyword_allowlist = cfg
            .keyword_allowlist
            .iter()
            .filter(|(_, words)| !words.is_empty())
            .map(|(m, words)| {
                let mut ks: Vec<String> = words
                    .iter()
                    .map(|w| normalized_key(w))
                    .filter(|w| !w.is_empty())
                    .collect();
                ks.dedup();
                (*m, ks)
            })
            .collect();
        Self {
            keyword_allowlist,
            crypto_blocklist: cfg.crypto_blocklist.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    pub articles: Vec<UniqueArticle>,
    pub duplicates: usize,
    pub off_topic: usize,
    pub blocked: usize,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "dedup_duplicates_total",
            "Articles dropped as duplicates (same normalized title or URL)."
        );
        describe_counter!(
            "dedup_filtered_total",
            "Articles dropped by the keyword allowlist or crypto blocklist."
        );
    });
}

/// Lowercase, drop everything that is neither alphanumeric nor whitespace, collapse whitespace.
pub fn normalized_key(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_space = false;
    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
        } else if ch.is_alphanumeric() {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
    }
    out
}

/// Host part of an http(s) URL, lowercased, without `www.` and port.
pub fn url_host(url: &str) -> Option<String> {
    let rest = url
        .trim()
        .split_once("://")
        .map(|(_, r)| r)
        .unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    (!host.is_empty()).then_some(host)
}

/// Stable identifier: first 8 bytes of SHA-256 over the URL, hex.
pub fn article_id(url: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(url.trim().as_bytes());
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

pub fn is_blocked(a: &RawArticle, blocklist: &BTreeSet<String>) -> bool {
    if blocklist.is_empty() {
        return false;
    }
    let publisher = a.publisher.trim().to_lowercase();
    if blocklist.contains(&publisher) {
        return true;
    }
    let Some(host) = url_host(&a.url) else {
        return false;
    };
    blocklist
        .iter()
        .any(|b| host == *b || host.ends_with(&format!(".{b}")))
}

/// True when title or snippet mentions one of the keywords at a word start.
pub fn matches_keywords(a: &RawArticle, keywords: &[String]) -> bool {
    let haystack = format!(" {} ", normalized_key(&format!("{} {}", a.title, a.body_snippet)));
    keywords
        .iter()
        .any(|kw| haystack.contains(&format!(" {kw}")))
}

pub fn deduplicate<A: AsRef<RawArticle>>(input: &[A], rules: &DedupRules) -> DedupOutcome {
    ensure_metrics_described();

    let mut out = DedupOutcome::default();
    let mut seen_keys: HashSet<String> = HashSet::new();
    let mut seen_urls: HashSet<String> = HashSet::new();

    for item in input {
        let a = item.as_ref();

        if is_blocked(a, &rules.crypto_blocklist) {
            out.blocked += 1;
            continue;
        }
        let key = normalized_key(&a.title);
        let on_topic = rules
            .keyword_allowlist
            .get(&a.market)
            .map_or(true, |kws| matches_keywords(a, kws));
        if key.is_empty() || !on_topic {
            out.off_topic += 1;
            continue;
        }

        let url = a.url.trim().to_string();
        if seen_keys.contains(&key) || seen_urls.contains(&url) {
            out.duplicates += 1;
            continue;
        }
        seen_keys.insert(key);
        seen_urls.insert(url);
        out.articles.push(UniqueArticle {
            id: article_id(&a.url),
            article: a.clone(),
        });
    }

    counter!("dedup_duplicates_total").increment(out.duplicates as u64);
    counter!("dedup_filtered_total").increment((out.off_topic + out.blocked) as u64);
    tracing::debug!(
        target: "dedup",
        input = input.len(),
        kept = out.articles.len(),
        duplicates = out.duplicates,
        off_topic = out.off_topic,
        blocked = out.blocked,
        "dedup pass"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;
    use chrono::Utc;

    fn art(source: SourceKind, publisher: &str, title: &str, url: &str) -> RawArticle {
        RawArticle {
            source,
            publisher: publisher.into(),
            market: Market::FR,
            title: title.into(),
            url: url.into(),
            published_at: Utc::now(),
            body_snippet: String::new(),
        }
    }

    #[test]
    fn normalized_key_strips_punct_and_case() {
        assert_eq!(normalized_key("ECB Raises Rates"), "ecb raises rates");
        assert_eq!(normalized_key("  ecb   raises rates!! "), "ecb raises rates");
        assert_eq!(normalized_key("U.S. SEC: new rule"), "us sec new rule");
        assert_eq!(normalized_key("!!!"), "");
    }

    #[test]
    fn url_host_variants() {
        assert_eq!(url_host("https://www.Reuters.com/a?b=1").as_deref(), Some("reuters.com"));
        assert_eq!(url_host("http://user@news.example.org:8080/x").as_deref(), Some("news.example.org"));
        assert_eq!(url_host("https://"), None);
    }

    #[test]
    fn same_title_from_two_sources_keeps_first() {
        let input = vec![
            art(SourceKind::GoogleNews, "Reuters", "ECB Raises Rates", "https://reuters.com/1"),
            art(SourceKind::NewsApi, "FT", "ecb raises rates!!", "https://ft.com/2"),
        ];
        let out = deduplicate(&input, &DedupRules::default());
        assert_eq!(out.articles.len(), 1);
        assert_eq!(out.articles[0].article.publisher, "Reuters");
        assert_eq!(out.duplicates, 1);
    }

    #[test]
    fn same_url_different_title_is_duplicate() {
        let input = vec![
            art(SourceKind::GoogleNews, "Reuters", "A", "https://reuters.com/1"),
            art(SourceKind::NewsApi, "Reuters", "B", "https://reuters.com/1"),
        ];
        assert_eq!(deduplicate(&input, &DedupRules::default()).articles.len(), 1);
    }

    #[test]
    fn blocklist_matches_publisher_and_domain() {
        let rules = DedupRules {
            crypto_blocklist: ["cointelegraph".to_string(), "economictimes.com".to_string()]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let input = vec![
            art(SourceKind::NewsApi, "Cointelegraph", "Bitcoin rules", "https://x.test/1"),
            art(SourceKind::NewsApi, "ET", "SEBI note", "https://m.economictimes.com/2"),
            art(SourceKind::NewsApi, "Reuters", "AMF rule", "https://reuters.com/3"),
        ];
        let out = deduplicate(&input, &rules);
        assert_eq!(out.blocked, 2);
        assert_eq!(out.articles.len(), 1);
    }

    #[test]
    fn keyword_allowlist_is_per_market() {
        let mut kw = BTreeMap::new();
        kw.insert(Market::FR, vec!["amf".to_string(), "banque de france".to_string()]);
        let rules = DedupRules {
            keyword_allowlist: kw,
            ..Default::default()
        };
        let mut other_market = art(SourceKind::Fixture, "X", "Football results", "https://x.test/3");
        other_market.market = Market::DE;
        let input = vec![
            art(SourceKind::Fixture, "X", "AMF issues warning", "https://x.test/1"),
            art(SourceKind::Fixture, "X", "Football results", "https://x.test/2"),
            other_market,
        ];
        let out = deduplicate(&input, &rules);
        assert_eq!(out.off_topic, 1);
        assert_eq!(out.articles.len(), 2);
    }

    #[test]
    fn ids_are_stable() {
        assert_eq!(article_id("https://a.test/x"), article_id(" https://a.test/x "));
        assert_eq!(article_id("https://a.test/x").len(), 16);
    }
}
