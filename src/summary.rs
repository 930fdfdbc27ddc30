// src/summary.rs
//! Read-only aggregations over a persisted dataset, as the dashboard shows them.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::annotate::{Category, ImpactLevel};
use crate::dedup::normalized_key;
use crate::market::Market;
use crate::store::ArticleRecord;

/// Sidebar filters. Empty sets mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardFilter {
    pub markets: BTreeSet<Market>,
    pub min_relevance: u8,
    pub categories: BTreeSet<Category>,
    pub impacts: BTreeSet<ImpactLevel>,
}

impl DashboardFilter {
    /// Whether any criterion needs annotation fields; unannotated records fail those.
    fn needs_annotation(&self) -> bool {
        self.min_relevance > 0 || !self.categories.is_empty() || !self.impacts.is_empty()
    }

    pub fn matches(&self, r: &ArticleRecord) -> bool {
        if !self.markets.is_empty() && !self.markets.contains(&r.market) {
            return false;
        }
        if !r.annotated {
            return !self.needs_annotation();
        }
        if r.relevance_score.unwrap_or(0) < self.min_relevance {
            return false;
        }
        if !self.categories.is_empty() && !r.category.is_some_and(|c| self.categories.contains(&c)) {
            return false;
        }
        if !self.impacts.is_empty() && !r.impact_level.is_some_and(|i| self.impacts.contains(&i)) {
            return false;
        }
        true
    }

    pub fn apply<'a>(&self, records: &'a [ArticleRecord]) -> Vec<&'a ArticleRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyInsights {
    pub total_articles: usize,
    /// Mean over annotated records, one decimal; `None` when nothing is annotated.
    pub avg_relevance: Option<f64>,
    pub high_impact: usize,
    pub markets_covered: usize,
    pub markets_total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSummary {
    pub market: Market,
    pub market_name: &'static str,
    pub iso3: &'static str,
    pub article_count: usize,
    pub avg_relevance: Option<f64>,
    pub high_impact_count: usize,
    /// "NAME (N mentions)" or "N/A".
    pub top_regulator: String,
    pub primary_focus: Option<Category>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketTop {
    pub market: Market,
    pub articles: Vec<ArticleRecord>,
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn avg_relevance<'a>(records: impl IntoIterator<Item = &'a ArticleRecord>) -> Option<f64> {
    let (sum, n) = records
        .into_iter()
        .filter_map(|r| r.relevance_score)
        .fold((0u64, 0u64), |(s, n), v| (s + v as u64, n + 1));
    (n > 0).then(|| round1(sum as f64 / n as f64))
}

fn is_high(r: &ArticleRecord) -> bool {
    r.impact_level == Some(ImpactLevel::High)
}

pub fn key_insights<'a>(records: impl IntoIterator<Item = &'a ArticleRecord>) -> KeyInsights {
    let records: Vec<&ArticleRecord> = records.into_iter().collect();
    let markets: BTreeSet<Market> = records.iter().map(|r| r.market).collect();
    KeyInsights {
        total_articles: records.len(),
        avg_relevance: avg_relevance(records.iter().copied()),
        high_impact: records.iter().filter(|r| is_high(r)).count(),
        markets_covered: markets.len(),
        markets_total: Market::ALL.len(),
    }
}

pub fn market_summaries<'a>(records: impl IntoIterator<Item = &'a ArticleRecord>) -> Vec<MarketSummary> {
    let mut by_market: BTreeMap<Market, Vec<&ArticleRecord>> = BTreeMap::new();
    for r in records {
        by_market.entry(r.market).or_default().push(r);
    }

    let mut out: Vec<MarketSummary> = by_market
        .into_iter()
        .map(|(market, rs)| MarketSummary {
            market,
            market_name: market.display_name(),
            iso3: market.iso3(),
            article_count: rs.len(),
            avg_relevance: avg_relevance(rs.iter().copied()),
            high_impact_count: rs.iter().filter(|r| is_high(r)).count(),
            top_regulator: top_regulator(&rs),
            primary_focus: primary_focus(&rs),
        })
        .collect();
    // stable: equal counts keep market order
    out.sort_by(|a, b| b.article_count.cmp(&a.article_count));
    out
}

fn top_regulator(rs: &[&ArticleRecord]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for r in rs {
        for reg in &r.key_regulators {
            *counts.entry(reg.as_str()).or_default() += 1;
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (name, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((name, n));
        }
    }
    match best {
        Some((name, n)) => format!("{name} ({n} mentions)"),
        None => "N/A".to_string(),
    }
}

fn primary_focus(rs: &[&ArticleRecord]) -> Option<Category> {
    let mut counts: BTreeMap<Category, usize> = BTreeMap::new();
    for c in rs.iter().filter_map(|r| r.category) {
        *counts.entry(c).or_default() += 1;
    }
    let mut best: Option<(Category, usize)> = None;
    for (c, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((c, n));
        }
    }
    best.map(|(c, _)| c)
}

/// Market × category counts over annotated records.
pub fn category_matrix<'a>(
    records: impl IntoIterator<Item = &'a ArticleRecord>,
) -> BTreeMap<Market, BTreeMap<Category, usize>> {
    let mut m: BTreeMap<Market, BTreeMap<Category, usize>> = BTreeMap::new();
    for r in records {
        if let Some(c) = r.category {
            *m.entry(r.market).or_default().entry(c).or_default() += 1;
        }
    }
    m
}

/// Highest-relevance annotated articles per market, in dashboard order.
pub fn top_articles<'a>(
    records: impl IntoIterator<Item = &'a ArticleRecord>,
    per_market: usize,
) -> Vec<MarketTop> {
    // title dedup keeps the first record in dataset order, before ranking
    let mut seen = HashSet::new();
    let annotated: Vec<&ArticleRecord> = records
        .into_iter()
        .filter(|r| r.relevance_score.is_some())
        .filter(|r| seen.insert(normalized_key(&r.title)))
        .collect();

    let mut out = Vec::new();
    for market in Market::DISPLAY_ORDER {
        let mut rs: Vec<&ArticleRecord> = annotated.iter().copied().filter(|r| r.market == market).collect();
        if rs.is_empty() {
            continue;
        }
        rs.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
        let articles: Vec<ArticleRecord> = rs.into_iter().take(per_market).cloned().collect();
        out.push(MarketTop { market, articles });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;
    use chrono::Utc;

    fn rec(market: Market, title: &str, score: Option<u8>, cat: Option<Category>) -> ArticleRecord {
        ArticleRecord {
            id: title.to_string(),
            title: title.to_string(),
            url: format!("https://x.test/{title}"),
            source: SourceKind::Fixture,
            source_name: "X".into(),
            market,
            market_name: market.display_name().into(),
            published_at: Utc::now(),
            body_snippet: String::new(),
            annotated: score.is_some(),
            relevance_score: score,
            impact_level: score.map(|s| if s >= 8 { ImpactLevel::High } else { ImpactLevel::Low }),
            category: cat,
            key_regulators: vec![],
            what_happened: None,
            why_relevant: None,
        }
    }

    #[test]
    fn unannotated_only_pass_open_filters() {
        let r = rec(Market::US, "a", None, None);
        assert!(DashboardFilter::default().matches(&r));
        let f = DashboardFilter {
            min_relevance: 1,
            ..Default::default()
        };
        assert!(!f.matches(&r));
        let f = DashboardFilter {
            impacts: [ImpactLevel::Low].into_iter().collect(),
            ..Default::default()
        };
        assert!(!f.matches(&r));
    }

    #[test]
    fn insights_average_over_annotated_only() {
        let rs = vec![
            rec(Market::US, "a", Some(9), None),
            rec(Market::US, "b", Some(4), None),
            rec(Market::JP, "c", None, None),
        ];
        let k = key_insights(&rs);
        assert_eq!(k.total_articles, 3);
        assert_eq!(k.avg_relevance, Some(6.5));
        assert_eq!(k.high_impact, 1);
        assert_eq!(k.markets_covered, 2);
        assert_eq!(k.markets_total, 5);
    }

    #[test]
    fn regulator_and_focus() {
        let mut a = rec(Market::DE, "a", Some(5), Some(Category::BankingRegulation));
        a.key_regulators = vec!["BaFin".into(), "ECB".into()];
        let mut b = rec(Market::DE, "b", Some(5), Some(Category::MonetaryPolicy));
        b.key_regulators = vec!["ECB".into()];
        let s = market_summaries(&[a, b]);
        assert_eq!(s[0].top_regulator, "ECB (2 mentions)");
        // tie → category declaration order
        assert_eq!(s[0].primary_focus, Some(Category::MonetaryPolicy));
        assert_eq!(s[0].iso3, "DEU");

        let s = market_summaries(&[rec(Market::FR, "c", None, None)]);
        assert_eq!(s[0].top_regulator, "N/A");
        assert_eq!(s[0].avg_relevance, None);
    }

    #[test]
    fn top_articles_order_and_dedup() {
        let rs = vec![
            rec(Market::FR, "f1", Some(3), None),
            rec(Market::US, "ECB hikes", Some(5), None),
            rec(Market::US, "ecb hikes!", Some(7), None),
            rec(Market::US, "u2", Some(9), None),
            rec(Market::US, "u3", None, None),
        ];
        let top = top_articles(&rs, 5);
        assert_eq!(top.iter().map(|t| t.market).collect::<Vec<_>>(), vec![Market::US, Market::FR]);
        let titles: Vec<_> = top[0].articles.iter().map(|a| a.title.as_str()).collect();
        // the earlier copy survives even though the later one scored higher
        assert_eq!(titles, vec!["u2", "ECB hikes"]);
    }

    #[test]
    fn top_articles_dedup_spans_markets_and_respects_limit() {
        let rs = vec![
            rec(Market::UK, "Basel III delay", Some(4), None),
            rec(Market::DE, "basel iii delay", Some(9), None),
            rec(Market::DE, "d1", Some(2), None),
            rec(Market::DE, "d2", Some(6), None),
            rec(Market::DE, "d3", Some(6), None),
        ];
        let top = top_articles(&rs, 2);
        assert_eq!(top.iter().map(|t| t.market).collect::<Vec<_>>(), vec![Market::UK, Market::DE]);
        let de: Vec<_> = top[1].articles.iter().map(|a| a.title.as_str()).collect();
        // equal scores keep input order
        assert_eq!(de, vec!["d2", "d3"]);
    }

    #[test]
    fn matrix_counts() {
        let rs = vec![
            rec(Market::UK, "a", Some(1), Some(Category::Other)),
            rec(Market::UK, "b", Some(1), Some(Category::Other)),
            rec(Market::UK, "c", None, None),
        ];
        let m = category_matrix(&rs);
        assert_eq!(m[&Market::UK][&Category::Other], 2);
    }
}
