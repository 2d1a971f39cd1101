//! Direct invocation of the assistant CLI as a child process.
//!
//! The CLI is run as `<binary> -p <prompt> --output-format json
//! --system-prompt <text>` with credential variables scrubbed from its
//! environment, stdin closed, and a hard wall-clock timeout. The child is
//! spawned with kill-on-drop, so a timeout or a dropped future terminates it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::actions::{parse_reply, ParsedReply};
use crate::config::AssistantConfig;
use crate::context::InvocationContext;
use crate::invocation::{HealthStatus, InvocationBackend, InvocationError, InvocationResult};
use crate::prompt::build_system_prompt;

/// Default wall-clock limit for one invocation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const HEALTH_TIMEOUT_SECS: u64 = 15;

/// Longest slice of stderr/stdout quoted back in an error.
const MAX_ERROR_DETAIL_CHARS: usize = 500;

/// Best-effort markers of a signed-out CLI. The tool has no structured
/// error codes, so this is a last resort after the exit status.
const AUTH_MARKERS: &[&str] = &[
    "not logged in",
    "please run /login",
    "invalid api key",
    "authentication",
    "unauthorized",
    "oauth token",
    "credentials",
];

#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    binary: String,
    timeout: Duration,
    scrubbed_env_vars: Vec<String>,
}

impl SubprocessBackend {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            scrubbed_env_vars: Vec::new(),
        }
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        Self::new(
            config.cli_binary.clone(),
            Duration::from_secs(config.timeout_secs),
        )
        .with_scrubbed_env(config.scrubbed_env_vars.clone())
    }

    pub fn with_scrubbed_env(mut self, vars: Vec<String>) -> Self {
        self.scrubbed_env_vars = vars;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one invocation, returning the parsed reply or a classified error.
    pub async fn run(
        &self,
        prompt: &str,
        context: &InvocationContext,
    ) -> Result<ParsedReply, InvocationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(InvocationError::EmptyPrompt);
        }

        let system_prompt = build_system_prompt(context);
        let timeout_secs = self.timeout.as_secs();

        tracing::info!(
            "Invoking {} (prompt: {} chars, context: {:?}, timeout: {}s)",
            self.binary,
            prompt.len(),
            context.mention_type,
            timeout_secs
        );

        let mut command = tokio::process::Command::new(&self.binary);
        command
            .arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("json")
            .arg("--system-prompt")
            .arg(&system_prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in &self.scrubbed_env_vars {
            command.env_remove(var);
        }

        let child = command.spawn().map_err(|e| self.spawn_error(e))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(InvocationError::ProcessFailed {
                    code: -1,
                    detail: format!("failed to wait for process: {}", e),
                })
            }
            Err(_) => {
                tracing::warn!("{} timed out after {}s; killed", self.binary, timeout_secs);
                return Err(InvocationError::Timeout { secs: timeout_secs });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(self.classify_failure(code, &stderr, &stdout));
        }

        let text = extract_result_text(&stdout).map_err(|detail| {
            tracing::warn!("Unreadable output from {}: {}", self.binary, detail);
            if looks_like_auth_failure(&detail) {
                InvocationError::Authentication {
                    binary: self.binary.clone(),
                }
            } else {
                InvocationError::MalformedOutput { detail }
            }
        })?;

        Ok(parse_reply(&text))
    }

    fn spawn_error(&self, error: std::io::Error) -> InvocationError {
        if error.kind() == std::io::ErrorKind::NotFound {
            InvocationError::NotInstalled {
                binary: self.binary.clone(),
            }
        } else {
            InvocationError::ProcessFailed {
                code: -1,
                detail: format!("failed to start {}: {}", self.binary, error),
            }
        }
    }

    fn classify_failure(&self, code: i32, stderr: &str, stdout: &str) -> InvocationError {
        let combined = format!("{}\n{}", stderr, stdout);
        if looks_like_auth_failure(&combined) {
            return InvocationError::Authentication {
                binary: self.binary.clone(),
            };
        }

        let detail = [stderr, stdout]
            .into_iter()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or("no output");
        InvocationError::ProcessFailed {
            code,
            detail: truncate_chars(detail, MAX_ERROR_DETAIL_CHARS),
        }
    }

    async fn version(&self) -> Result<String, InvocationError> {
        let child = tokio::process::Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let output = tokio::time::timeout(
            Duration::from_secs(HEALTH_TIMEOUT_SECS),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| InvocationError::Timeout {
            secs: HEALTH_TIMEOUT_SECS,
        })?
        .map_err(|e| InvocationError::ProcessFailed {
            code: -1,
            detail: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(self.classify_failure(output.status.code().unwrap_or(-1), &stderr, &stdout));
        }
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl InvocationBackend for SubprocessBackend {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    async fn invoke(&self, prompt: &str, context: &InvocationContext) -> InvocationResult {
        match self.run(prompt, context).await {
            Ok(reply) => InvocationResult::success(reply.message, reply.actions),
            Err(error) => InvocationResult::failure(&error),
        }
    }

    async fn check_health(&self) -> HealthStatus {
        match self.version().await {
            Ok(version) if version.is_empty() => HealthStatus::available(None),
            Ok(version) => HealthStatus::available(Some(version)),
            Err(error) => HealthStatus::unavailable(error.to_string()),
        }
    }
}

/// Pull the reply text out of the CLI's JSON output. Accepts a bare JSON
/// string, or an object with `result`, `content` or `response`; anything
/// else is returned re-serialized.
pub fn extract_result_text(stdout: &str) -> Result<String, String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err("empty output".to_string());
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| {
        format!(
            "{} (output began: {})",
            e,
            truncate_chars(trimmed, 120)
        )
    })?;

    if let Value::Object(map) = &value {
        if map.get("is_error").and_then(Value::as_bool) == Some(true) {
            let detail = map
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or("the assistant reported an error");
            return Err(detail.to_string());
        }
    }

    Ok(match &value {
        Value::String(text) => text.clone(),
        Value::Object(map) => ["result", "content", "response"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    })
}

fn looks_like_auth_failure(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    AUTH_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max).collect();
    truncated.push('…');
    truncated
}

/// Resolve a binary name the way a shell would, without running it.
pub fn locate_binary(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let full = dir.join(binary);
        if full.is_file() {
            return Some(full);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{}.exe", binary));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ProposedAction;

    #[test]
    fn extracts_text_from_every_known_shape() {
        for raw in [
            r#"{"content": "hello"}"#,
            r#"{"response": "hello"}"#,
            r#"{"result": "hello"}"#,
            r#""hello""#,
        ] {
            assert_eq!(extract_result_text(raw).unwrap(), "hello", "shape {}", raw);
        }
    }

    #[test]
    fn result_takes_priority_over_content() {
        let text = extract_result_text(r#"{"content":"b","result":"a"}"#).unwrap();
        assert_eq!(text, "a");
    }

    #[test]
    fn unknown_shape_is_reserialized() {
        let text = extract_result_text(r#"{"answer": 42}"#).unwrap();
        assert_eq!(text, r#"{"answer":42}"#);
    }

    #[test]
    fn empty_or_invalid_output_is_an_error() {
        assert_eq!(extract_result_text("  \n").unwrap_err(), "empty output");
        assert!(extract_result_text("Hello there").is_err());
    }

    #[test]
    fn reported_errors_are_not_treated_as_replies() {
        let err =
            extract_result_text(r#"{"is_error": true, "result": "Credit balance too low"}"#)
                .unwrap_err();
        assert_eq!(err, "Credit balance too low");
    }

    #[test]
    fn auth_markers_are_case_insensitive() {
        assert!(looks_like_auth_failure("Invalid API key · Please run /login"));
        assert!(looks_like_auth_failure("Error: NOT LOGGED IN"));
        assert!(!looks_like_auth_failure("segmentation fault"));
    }

    #[test]
    fn locate_binary_misses_unknown_names() {
        assert!(locate_binary("definitely-not-a-real-binary-7f3a").is_none());
        assert!(locate_binary("/definitely/not/here/claude").is_none());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        fn fake_cli(dir: &tempfile::TempDir, body: &str) -> String {
            let path = dir.path().join("fake-claude");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        fn backend(binary: String, secs: u64) -> SubprocessBackend {
            SubprocessBackend::new(binary, Duration::from_secs(secs))
        }

        #[tokio::test]
        async fn successful_reply_is_parsed_for_actions() {
            let dir = tempfile::tempdir().unwrap();
            let cli = fake_cli(
                &dir,
                r#"cat <<'EOF'
{"type":"result","is_error":false,"result":"Sure\n```actions\n[{\"type\":\"create_card\",\"params\":{\"text\":\"Onboarding\",\"columnId\":\"doing\"}}]\n```"}
EOF"#,
            );

            let result = backend(cli, 10)
                .invoke("add a card", &InvocationContext::default())
                .await;

            assert!(result.error.is_none(), "{:?}", result.error);
            assert_eq!(result.message, "Sure");
            assert_eq!(
                result.actions[0].action,
                ProposedAction::CreateCard {
                    text: "Onboarding".to_string(),
                    column_id: Some("doing".to_string()),
                }
            );
        }

        #[tokio::test]
        async fn arguments_follow_the_cli_contract() {
            let dir = tempfile::tempdir().unwrap();
            let cli = fake_cli(
                &dir,
                r#"printf '{"result":"%s %s %s %s %s"}' "$1" "$2" "$3" "$4" "$5""#,
            );

            let result = backend(cli, 10)
                .invoke("  hi  ", &InvocationContext::default())
                .await;
            assert_eq!(result.message, "-p hi --output-format json --system-prompt");
        }

        #[tokio::test]
        async fn credential_variables_are_scrubbed() {
            std::env::set_var("IDEABOARD_TEST_SCRUBBED_SECRET", "leaked");
            let dir = tempfile::tempdir().unwrap();
            let cli = fake_cli(
                &dir,
                r#"printf '{"result":"%s"}' "${IDEABOARD_TEST_SCRUBBED_SECRET:-unset}""#,
            );

            let result = backend(cli, 10)
                .with_scrubbed_env(vec!["IDEABOARD_TEST_SCRUBBED_SECRET".to_string()])
                .invoke("check env", &InvocationContext::default())
                .await;
            assert_eq!(result.message, "unset");
        }

        #[tokio::test]
        async fn empty_prompt_never_spawns() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("ran");
            let cli = fake_cli(
                &dir,
                &format!("touch '{}'\necho '\"x\"'", marker.display()),
            );

            let result = backend(cli, 10)
                .invoke("   \n\t", &InvocationContext::default())
                .await;
            assert_eq!(result.error.as_deref(), Some("Prompt cannot be empty"));
            assert!(!marker.exists());
        }

        #[tokio::test]
        async fn timeout_kills_the_process_and_names_the_limit() {
            let dir = tempfile::tempdir().unwrap();
            let cli = fake_cli(&dir, "sleep 30\necho '\"late\"'");

            let started = Instant::now();
            let result = backend(cli, 1)
                .invoke("slow please", &InvocationContext::default())
                .await;

            assert!(started.elapsed() < Duration::from_secs(10));
            assert!(result.message.is_empty());
            assert!(result.actions.is_empty());
            assert!(result.error.unwrap().contains("within 1 seconds"));
        }

        #[tokio::test]
        async fn failures_are_classified() {
            let dir = tempfile::tempdir().unwrap();

            let auth = fake_cli(&dir, "echo 'Invalid API key · Please run /login' >&2\nexit 1");
            let result = backend(auth, 10)
                .invoke("hi", &InvocationContext::default())
                .await;
            assert!(result.error.unwrap().contains("not signed in"));

            let crash = fake_cli(&dir, "echo 'boom' >&2\nexit 3");
            let result = backend(crash, 10)
                .invoke("hi", &InvocationContext::default())
                .await;
            let error = result.error.unwrap();
            assert!(error.contains("status 3"));
            assert!(error.contains("boom"));

            let garbage = fake_cli(&dir, "echo 'this is not json'");
            let result = backend(garbage, 10)
                .invoke("hi", &InvocationContext::default())
                .await;
            assert!(result.error.unwrap().contains("unreadable response"));

            let silent = fake_cli(&dir, "exit 0");
            let result = backend(silent, 10)
                .invoke("hi", &InvocationContext::default())
                .await;
            assert!(result.error.unwrap().contains("empty output"));
        }

        #[tokio::test]
        async fn missing_binary_reports_not_installed() {
            let result = backend("/definitely/not/here/claude".to_string(), 10)
                .invoke("hi", &InvocationContext::default())
                .await;
            assert!(result.error.unwrap().contains("was not found"));

            let health = backend("/definitely/not/here/claude".to_string(), 10)
                .check_health()
                .await;
            assert!(!health.available);
        }

        #[tokio::test]
        async fn health_reports_version() {
            let dir = tempfile::tempdir().unwrap();
            let cli = fake_cli(&dir, "echo '2.0.1 (Claude Code)'");
            let health = backend(cli, 10).check_health().await;
            assert!(health.available);
            assert_eq!(health.version.as_deref(), Some("2.0.1 (Claude Code)"));
        }
    }
}
