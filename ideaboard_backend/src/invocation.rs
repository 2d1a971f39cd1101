//! The contract shared by every way of reaching the assistant model.
//!
//! Backends never fail across this boundary: every failure comes back as an
//! [`InvocationResult`] with `error` set, so callers only handle data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::Proposal;
use crate::context::InvocationContext;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Proposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvocationResult {
    pub fn success(message: String, actions: Vec<Proposal>) -> Self {
        Self {
            message,
            actions,
            error: None,
        }
    }

    pub fn failure(error: &InvocationError) -> Self {
        Self {
            message: String::new(),
            actions: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn available(version: Option<String>) -> Self {
        Self {
            available: true,
            version,
            error: None,
        }
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            available: false,
            version: None,
            error: Some(error.into()),
        }
    }
}

/// Why an invocation failed. Display strings are shown to end users.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    #[error("Prompt cannot be empty")]
    EmptyPrompt,
    #[error("The '{binary}' command was not found. Install the assistant CLI and make sure it is on your PATH.")]
    NotInstalled { binary: String },
    #[error("The assistant CLI is not signed in. Run '{binary}' in a terminal and sign in, then try again.")]
    Authentication { binary: String },
    #[error("The assistant did not respond within {secs} seconds and was stopped.")]
    Timeout { secs: u64 },
    #[error("The assistant CLI exited with status {code}: {detail}")]
    ProcessFailed { code: i32, detail: String },
    #[error("The assistant returned an unreadable response: {detail}")]
    MalformedOutput { detail: String },
    #[error("Could not reach the assistant gateway: {detail}")]
    Transport { detail: String },
    #[error("The request was cancelled.")]
    Cancelled,
}

#[async_trait]
pub trait InvocationBackend: Send + Sync {
    /// Short label for logs (`subprocess`, `gateway`, ...).
    fn name(&self) -> &'static str;

    async fn invoke(&self, prompt: &str, context: &InvocationContext) -> InvocationResult;

    async fn check_health(&self) -> HealthStatus;
}
