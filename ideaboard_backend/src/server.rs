//! HTTP gateway exposing the subprocess backend to front ends that cannot
//! spawn processes themselves.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::config::AssistantConfig;
use crate::context::InvocationContext;
use crate::invocation::{InvocationBackend, InvocationError, InvocationResult};
use crate::subprocess::SubprocessBackend;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

#[derive(Clone)]
pub struct GatewayState {
    pub backend: Arc<dyn InvocationBackend>,
    pub auth: GatewayAuthConfig,
}

#[derive(Debug, Clone)]
pub struct GatewayAuthConfig {
    mode: AuthMode,
    token: Option<String>,
}

impl GatewayAuthConfig {
    pub fn disabled() -> Self {
        Self {
            mode: AuthMode::Disabled,
            token: None,
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Required,
            token: Some(token.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Required,
    Disabled,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    prompt: String,
    #[serde(default)]
    context: InvocationContext,
}

/// Bind from `IDEABOARD_GATEWAY_BIND` and serve until the process exits.
pub async fn serve_gateway(config: &AssistantConfig) -> Result<()> {
    let bind_addr = std::env::var("IDEABOARD_GATEWAY_BIND")
        .unwrap_or_else(|_| DEFAULT_BIND.to_string())
        .parse::<SocketAddr>()
        .context("Invalid IDEABOARD_GATEWAY_BIND (expected host:port)")?;

    let state = GatewayState {
        backend: Arc::new(SubprocessBackend::from_config(config)),
        auth: load_auth_config()?,
    };

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {}", bind_addr))?;
    tracing::info!(
        "Assistant gateway listening on http://{} (cli: {}, timeout: {}s)",
        bind_addr,
        config.cli_binary,
        config.timeout_secs
    );
    serve_on(listener, state, config.max_request_bytes).await
}

pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: GatewayState,
    max_request_bytes: usize,
) -> Result<()> {
    axum::serve(listener, gateway_router(state, max_request_bytes))
        .await
        .context("Gateway server failed")?;
    Ok(())
}

pub fn gateway_router(state: GatewayState, max_request_bytes: usize) -> Router {
    let state = Arc::new(state);
    let assistant = Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().nest("/api/assistant", assistant)
}

fn load_auth_config() -> Result<GatewayAuthConfig> {
    let token = std::env::var("IDEABOARD_GATEWAY_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let mode = parse_auth_mode(
        std::env::var("IDEABOARD_GATEWAY_AUTH_MODE").ok(),
        token.is_some(),
    )?;

    if mode == AuthMode::Required && token.is_none() {
        return Err(anyhow!(
            "IDEABOARD_GATEWAY_TOKEN is required when auth mode is 'required'"
        ));
    }
    if mode == AuthMode::Disabled {
        tracing::warn!("Gateway auth is disabled; keep the bind address on loopback");
    }

    Ok(GatewayAuthConfig { mode, token })
}

/// Unset mode follows the token: required when one is configured.
fn parse_auth_mode(raw: Option<String>, has_token: bool) -> Result<AuthMode> {
    let Some(raw) = raw else {
        return Ok(if has_token {
            AuthMode::Required
        } else {
            AuthMode::Disabled
        });
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "required" | "on" | "enabled" | "true" => Ok(AuthMode::Required),
        "disabled" | "off" | "false" => Ok(AuthMode::Disabled),
        "" if has_token => Ok(AuthMode::Required),
        "" => Ok(AuthMode::Disabled),
        other => Err(anyhow!(
            "Invalid IDEABOARD_GATEWAY_AUTH_MODE '{}'. Expected 'required' or 'disabled'",
            other
        )),
    }
}

async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, &state.auth)?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, auth: &GatewayAuthConfig) -> Result<(), StatusCode> {
    if auth.mode == AuthMode::Disabled {
        return Ok(());
    }
    let Some(token) = auth.token.as_deref() else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Some(raw_header) = headers.get(header::AUTHORIZATION) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(auth_value) = raw_header.to_str() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let expected = format!("Bearer {}", token);
    if auth_value.trim() != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn chat(State(state): State<Arc<GatewayState>>, body: Bytes) -> Response {
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("Rejected chat request body: {}", e);
            return bad_request(format!("Invalid request body: {}", e));
        }
    };
    if request.prompt.trim().is_empty() {
        return bad_request(InvocationError::EmptyPrompt.to_string());
    }

    let result = state.backend.invoke(&request.prompt, &request.context).await;
    if let Some(error) = &result.error {
        tracing::warn!("Invocation via {} failed: {}", state.backend.name(), error);
        return (StatusCode::BAD_GATEWAY, Json(result)).into_response();
    }
    Json(result).into_response()
}

async fn health(State(state): State<Arc<GatewayState>>) -> Response {
    let status = state.backend.check_health().await;
    let code = if status.available {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(status)).into_response()
}

fn bad_request(error: String) -> Response {
    let body = InvocationResult {
        error: Some(error),
        ..InvocationResult::default()
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
