use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

use super::{Notifier, RunNotice};

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
    timeout: Duration,
}

impl SlackNotifier {
    pub fn new(url: String) -> Self {
        Self {
            webhook_url: url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

/// Slack mrkdwn body for a run notice.
pub fn render(n: &RunNotice) -> String {
    let mut text = format!("*{}*", n.headline());
    for line in n.market_lines() {
        text.push_str("\n• ");
        text.push_str(&line);
    }
    if let Some(top) = n.top_line() {
        text.push('\n');
        text.push_str(&top);
    }
    if let Some(f) = &n.failure {
        text.push_str(&format!("\n_Failure:_ {f}"));
    }
    text
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, n: &RunNotice) -> Result<()> {
        let body = serde_json::json!({ "text": render(n) });
        self.client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slack"
    }
}
