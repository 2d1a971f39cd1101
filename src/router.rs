use std::sync::Arc;

use anyhow::Result;

use ideaboard_backend::config::{AssistantConfig, InvocationMode};
use ideaboard_backend::context::InvocationContext;
use ideaboard_backend::invocation::{HealthStatus, InvocationBackend, InvocationResult};
use ideaboard_backend::subprocess::{locate_binary, SubprocessBackend};

use crate::api::GatewayClient;

/// The single entry point front ends use to reach the assistant. The
/// backend is chosen once, when the router is built.
#[derive(Clone)]
pub struct AssistantRouter {
    backend: Arc<dyn InvocationBackend>,
}

impl AssistantRouter {
    pub fn new(backend: Arc<dyn InvocationBackend>) -> Self {
        Self { backend }
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        let backend: Arc<dyn InvocationBackend> = match resolve_mode(config) {
            InvocationMode::Gateway => {
                let client = GatewayClient::from_config(config)?;
                tracing::info!("Assistant gateway: {}", client.base_url());
                Arc::new(client)
            }
            _ => Arc::new(SubprocessBackend::from_config(config)),
        };
        tracing::info!("Assistant requests go through the {} backend", backend.name());
        Ok(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn send_message(&self, prompt: &str, context: &InvocationContext) -> InvocationResult {
        let result = self.backend.invoke(prompt, context).await;
        match &result.error {
            Some(error) => tracing::warn!("{} invocation failed: {}", self.backend.name(), error),
            None => tracing::debug!(
                "{} replied with {} chars and {} proposed actions",
                self.backend.name(),
                result.message.len(),
                result.actions.len()
            ),
        }
        result
    }

    pub async fn check_health(&self) -> HealthStatus {
        self.backend.check_health().await
    }
}

/// Collapse `auto` into a concrete strategy. A CLI that cannot be found
/// selects the gateway; detection itself never fails.
pub fn resolve_mode(config: &AssistantConfig) -> InvocationMode {
    match config.invocation_mode {
        InvocationMode::Auto => match locate_binary(&config.cli_binary) {
            Some(path) => {
                tracing::debug!("Found {} at {:?}", config.cli_binary, path);
                InvocationMode::Subprocess
            }
            None => {
                tracing::debug!(
                    "{} not found on PATH; using gateway {}",
                    config.cli_binary,
                    config.gateway_url
                );
                InvocationMode::Gateway
            }
        },
        forced => forced,
    }
}
