//! Run notifications.
//!
//! A finished `RunReport` is condensed into a `RunNotice` and fanned out to every
//! configured webhook. Delivery failures are logged, never propagated to the run.

pub mod discord;
pub mod slack;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::pipeline::{MarketCoverage, RunReport, RunState, RunTotals};

pub use discord::DiscordNotifier;
pub use slack::SlackNotifier;

#[derive(Debug, Clone)]
pub struct RunNotice {
    pub state: RunState,
    pub totals: RunTotals,
    pub coverage: Vec<MarketCoverage>,
    pub top_headline: Option<(String, u8)>,
    pub failure: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl From<&RunReport> for RunNotice {
    fn from(r: &RunReport) -> Self {
        Self {
            state: r.state,
            totals: r.totals,
            coverage: r.coverage.clone(),
            top_headline: r.top_headline.clone(),
            failure: r.failure.as_ref().map(|e| e.to_string()),
            finished_at: r.finished_at.unwrap_or_else(Utc::now),
        }
    }
}

impl RunNotice {
    pub fn headline(&self) -> String {
        format!(
            "Regulatory run {}: {} unique, {} annotated, {} source failures",
            self.state, self.totals.unique, self.totals.annotated, self.totals.source_failures
        )
    }

    /// One line per market, e.g. `US 12/14 annotated`.
    pub fn market_lines(&self) -> Vec<String> {
        self.coverage
            .iter()
            .map(|c| {
                let mut line = format!("{} {}/{} annotated", c.market, c.annotated, c.unique);
                if c.source_failures > 0 {
                    line.push_str(&format!(" ({} source failure(s))", c.source_failures));
                }
                line
            })
            .collect()
    }

    pub fn top_line(&self) -> Option<String> {
        self.top_headline
            .as_ref()
            .map(|(t, s)| format!("Top: {t} [{s}/10]"))
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: &RunNotice) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Fans a notice out to every configured notifier.
#[derive(Default)]
pub struct NotifierMux {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Slack via `SLACK_WEBHOOK_URL`, Discord via `DISCORD_WEBHOOK_URL`; unset = skipped.
    pub fn from_env() -> Self {
        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        if let Some(url) = env_url("SLACK_WEBHOOK_URL") {
            notifiers.push(Box::new(SlackNotifier::new(url)));
        }
        if let Some(url) = env_url("DISCORD_WEBHOOK_URL") {
            notifiers.push(Box::new(DiscordNotifier::new(url)));
        }
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Returns how many notifiers accepted the notice.
    pub async fn send_all(&self, notice: &RunNotice) -> usize {
        let mut ok = 0;
        for n in &self.notifiers {
            match n.send(notice).await {
                Ok(()) => ok += 1,
                Err(e) => tracing::warn!(target: "pipeline", notifier = n.name(), error = %e, "notification failed"),
            }
        }
        ok
    }
}

fn env_url(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
