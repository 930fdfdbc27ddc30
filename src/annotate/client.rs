//! LLM completion clients: provider abstraction + OpenAI-compatible implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AnnotatorConfig;
use crate::error::AnnotationError;

pub const ENV_TEST_MODE: &str = "ANNOTATOR_TEST_MODE";

/// Prompt pair sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Return the raw completion text for `req`.
    async fn complete(&self, req: &CompletionRequest) -> Result<String, AnnotationError>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
    /// Model identifier; part of the cache key.
    fn model(&self) -> &str {
        ""
    }
}

pub type DynLlmClient = Arc<dyn LlmClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `ANNOTATOR_TEST_MODE=mock`, returns a deterministic mock client.
/// * Else if disabled, or no API key resolves, returns a disabled client.
/// * Else builds the OpenAI-compatible client.
pub fn build_client(cfg: &AnnotatorConfig) -> anyhow::Result<DynLlmClient> {
    if std::env::var(ENV_TEST_MODE).is_ok_and(|v| v == "mock") {
        return Ok(Arc::new(MockClient::neutral()));
    }
    if !cfg.enabled {
        return Ok(Arc::new(DisabledClient));
    }
    match cfg.resolved_api_key() {
        Some(key) => Ok(Arc::new(OpenAiClient::new(
            &cfg.base_url,
            key,
            &cfg.model,
            cfg.timeout(),
        )?)),
        None => {
            tracing::warn!(target: "annotate", "annotator enabled but no API key; annotations disabled");
            Ok(Arc::new(DisabledClient))
        }
    }
}

/// OpenAI chat completions (or any compatible endpoint).
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: String, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("regulatory-intel/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .context("building LLM http client")?;
        Ok(Self {
            http,
            endpoint: chat_endpoint(base_url),
            api_key,
            model: model.to_string(),
            timeout,
        })
    }
}

/// Resolve the chat completions endpoint from a base URL.
pub fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, req: &CompletionRequest) -> Result<String, AnnotationError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let body = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &req.system,
                },
                Msg {
                    role: "user",
                    content: &req.user,
                },
            ],
            temperature: 0.2,
            max_tokens: 400,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnnotationError::Timeout(self.timeout)
                } else {
                    AnnotationError::Transport(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(AnnotationError::Status(resp.status().as_u16()));
        }
        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| AnnotationError::MalformedResponse(format!("completion envelope: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AnnotationError::MalformedResponse("empty completion".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Always fails with `Disabled`; used when annotation is switched off.
pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    async fn complete(&self, _req: &CompletionRequest) -> Result<String, AnnotationError> {
        Err(AnnotationError::Disabled)
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Returns the same completion text for every request.
#[derive(Clone)]
pub struct MockClient {
    pub fixed: String,
}

impl MockClient {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
        }
    }

    /// Mid-scale annotation for local runs without credentials.
    pub fn neutral() -> Self {
        Self::new(
            r#"{"relevance_score":5,"impact_level":"medium","category":"other","key_regulators":[],"what_happened":"Mock annotation.","why_relevant":"Mock annotation."}"#,
        )
    }
}

#[async_trait]
impl LlmClient for MockClient {
    async fn complete(&self, _req: &CompletionRequest) -> Result<String, AnnotationError> {
        Ok(self.fixed.clone())
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
    fn model(&self) -> &str {
        "mock"
    }
}
