//! HTTP client for the assistant's chat/completion endpoint.
//!
//! Endpoint: POST {base}/chat
//! Auth: optional Bearer token

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{ChatReply, ChatRequest, CompletionService};

/// Completion service reached over HTTP
pub struct HttpCompletionService {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpCompletionService {
    /// Create a new client. `endpoint` is the full chat URL.
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create from configuration, `None` when no endpoint is configured
    pub fn from_config(config: &crate::config::ResolvedConfig) -> Option<Self> {
        let endpoint = config.intent.completion_url.clone()?;
        let token = std::env::var("JOJO_COMPLETION_TOKEN").ok();
        Some(Self::new(endpoint, token))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    fn name(&self) -> &str {
        "http"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatReply> {
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder
            .send()
            .await
            .context("Failed to reach completion service")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Completion service error ({}): {}", status, text.trim());
        }

        response
            .json::<ChatReply>()
            .await
            .context("Failed to parse completion service reply")
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .context("Failed to reach completion service")?;

        // 405 still proves the endpoint exists
        if response.status().is_server_error() {
            anyhow::bail!("Completion service unhealthy: {}", response.status());
        }
        Ok(())
    }
}
