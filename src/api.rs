use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use ideaboard_backend::config::AssistantConfig;
use ideaboard_backend::context::InvocationContext;
use ideaboard_backend::http_client::build_http_client_with_timeout;
use ideaboard_backend::invocation::{
    HealthStatus, InvocationBackend, InvocationError, InvocationResult,
};

const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8787";

/// Slack on top of the CLI timeout so the gateway reports its own timeout
/// before the HTTP request gives up.
const TIMEOUT_MARGIN_SECS: u64 = 15;

/// HTTP client for the assistant gateway served by `ideaboard_backend`.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    prompt: &'a str,
    context: &'a InvocationContext,
}

impl GatewayClient {
    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        let token = std::env::var("IDEABOARD_GATEWAY_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Self::new(
            &config.gateway_url,
            token,
            Duration::from_secs(config.timeout_secs + TIMEOUT_MARGIN_SECS),
        )
    }

    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_http_client_with_timeout(Some(timeout))?,
            base_url: normalize_base_url(base_url),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn chat(&self, prompt: &str, context: &InvocationContext) -> Result<InvocationResult> {
        let response = self
            .request(reqwest::Method::POST, "/api/assistant/chat")
            .json(&ChatRequest { prompt, context })
            .send()
            .await
            .context("POST /api/assistant/chat failed")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read chat response payload")?;

        // 200, 400 and 502 all carry an InvocationResult body
        match serde_json::from_str::<InvocationResult>(&body) {
            Ok(result) if status.is_success() || result.error.is_some() => Ok(result),
            _ if status.is_success() => bail!(
                "Failed to decode chat response. Payload preview: {}",
                body.chars().take(500).collect::<String>()
            ),
            _ => bail!("Gateway returned {}: {}", status, body.trim()),
        }
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self
            .request(reqwest::Method::GET, "/api/assistant/health")
            .send()
            .await
            .context("GET /api/assistant/health failed")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read health payload")?;
        serde_json::from_str::<HealthStatus>(&body)
            .with_context(|| format!("Gateway returned {}: {}", status, body.trim()))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

#[async_trait]
impl InvocationBackend for GatewayClient {
    fn name(&self) -> &'static str {
        "gateway"
    }

    async fn invoke(&self, prompt: &str, context: &InvocationContext) -> InvocationResult {
        if prompt.trim().is_empty() {
            return InvocationResult::failure(&InvocationError::EmptyPrompt);
        }
        match self.chat(prompt, context).await {
            Ok(result) => result,
            Err(e) => InvocationResult::failure(&InvocationError::Transport {
                detail: format!("{:#}", e),
            }),
        }
    }

    async fn check_health(&self) -> HealthStatus {
        match self.health().await {
            Ok(status) => status,
            Err(e) => HealthStatus::unavailable(
                InvocationError::Transport {
                    detail: format!("{:#}", e),
                }
                .to_string(),
            ),
        }
    }
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_GATEWAY_URL.to_string()
    } else {
        trimmed.to_string()
    }
}
