use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{Notifier, RunNotice};
use crate::pipeline::RunState;

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, n: &RunNotice) -> Result<()> {
        let payload = DiscordWebhookPayload::from_notice(n);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("Discord webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("Discord webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
}

#[derive(Debug, Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn from_notice(n: &RunNotice) -> Self {
        let mut description = n.market_lines().join("\n");
        if let Some(top) = n.top_line() {
            description.push_str("\n\n");
            description.push_str(&top);
        }
        if let Some(f) = &n.failure {
            description.push_str(&format!("\n\n**Failure:** {f}"));
        }
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: n.headline(),
                description,
                color: state_color(n.state),
            }],
        }
    }
}

fn state_color(s: RunState) -> u32 {
    match s {
        RunState::Done => 0x2ecc71,
        RunState::PartiallyFailed => 0xf1c40f,
        _ => 0xe74c3c,
    }
}
