//! Claude Code headless capability.
//!
//! `ClaudeHeadless` runs the Claude Code CLI in print mode (`-p`) with JSON
//! output and implements [`Capability`] on top of it. Each call is a fresh
//! process; continuity across calls uses `--resume <session>`.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::orchestration::capability::{
    Capability, CapabilityFailure, CapabilityRequest, TextArtifact,
};
use crate::orchestration::prompts;
use crate::sflog_debug;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Default timeout for one CLI call (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// The `result` message the CLI prints at the end of a run.
#[derive(Debug, Deserialize)]
struct ResultMessage {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    structured_output: Option<Value>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClaudeHeadless {
    binary: PathBuf,
    /// Arguments placed before the generated ones (from a multi-word command).
    leading_args: Vec<String>,
    model: Option<String>,
    timeout: Duration,
    workdir: Option<PathBuf>,
}

impl ClaudeHeadless {
    /// Resolve `command` on `PATH`. Extra words become leading arguments,
    /// e.g. `claude --dangerously-skip-permissions`.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityBinaryNotFound` if the binary cannot be located.
    pub fn new(command: &str) -> Result<Self> {
        let mut words = command.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| Error::Validation("capability command is empty".to_string()))?;
        let binary = which::which(program)
            .map_err(|_| Error::CapabilityBinaryNotFound(program.to_string()))?;
        Ok(Self::with_binary(binary).with_leading_args(words.map(str::to_string).collect()))
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.effective_command())?
            .with_model(config.model.clone())
            .with_timeout(config.capability_timeout()))
    }

    /// Use a specific binary path, skipping `PATH` lookup.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary,
            leading_args: Vec::new(),
            model: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            workdir: None,
        }
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory the CLI runs in. Defaults to the current directory.
    pub fn with_workdir(mut self, dir: PathBuf) -> Self {
        self.workdir = Some(dir);
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full argument list for a request, prompt last.
    pub fn build_args(&self, request: &CapabilityRequest) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend([
            "-p".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--append-system-prompt".to_string(),
            prompts::persona(request.role).to_string(),
        ]);
        if let Some(schema) = &request.output_schema {
            args.push("--json-schema".to_string());
            args.push(schema.to_string());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(session) = &request.resume_session {
            args.push("--resume".to_string());
            args.push(session.clone());
        }
        args.push(request.render_prompt());
        args
    }

    /// Parse CLI stdout into a text artifact.
    ///
    /// Accepts either the message array or a single result object. A
    /// structured output, when present, is returned as its JSON text.
    pub fn parse_output(stdout: &str) -> std::result::Result<TextArtifact, CapabilityFailure> {
        let value: Value = serde_json::from_str(stdout.trim())
            .map_err(|e| CapabilityFailure::Malformed(format!("CLI output is not JSON: {}", e)))?;

        let result_value = match value {
            Value::Array(messages) => messages
                .into_iter()
                .rev()
                .find(|msg| msg.get("type").and_then(Value::as_str) == Some("result"))
                .ok_or_else(|| {
                    CapabilityFailure::Malformed("no result message in CLI output".to_string())
                })?,
            single => single,
        };

        let message: ResultMessage = serde_json::from_value(result_value)
            .map_err(|e| CapabilityFailure::Malformed(e.to_string()))?;

        if message.is_error || message.subtype.as_deref().is_some_and(|s| s.starts_with("error")) {
            let detail = message
                .error
                .or(message.result)
                .unwrap_or_else(|| "CLI reported an error".to_string());
            return Err(CapabilityFailure::Unavailable(detail));
        }

        let text = match (message.structured_output, message.result) {
            (Some(structured), _) => structured.to_string(),
            (None, Some(result)) => result,
            (None, None) => {
                return Err(CapabilityFailure::Malformed(
                    "result message has neither structured_output nor result".to_string(),
                ))
            }
        };

        Ok(TextArtifact {
            text,
            session_id: message.session_id,
        })
    }
}

#[async_trait]
impl Capability for ClaudeHeadless {
    async fn invoke(
        &self,
        request: &CapabilityRequest,
    ) -> std::result::Result<TextArtifact, CapabilityFailure> {
        let mut command = Command::new(&self.binary);
        command.args(self.build_args(request)).kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        sflog_debug!(
            "ClaudeHeadless: spawning {} for {}",
            self.binary.display(),
            request.describe()
        );

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| CapabilityFailure::Timeout(self.timeout))?
            .map_err(|e| CapabilityFailure::Unavailable(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match Self::parse_output(&stdout) {
            Ok(artifact) => Ok(artifact),
            Err(failure) if output.status.success() => Err(failure),
            Err(_) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let message = if stderr.trim().is_empty() {
                    format!(
                        "CLI exited with code {}",
                        output.status.code().unwrap_or(-1)
                    )
                } else {
                    stderr.trim().to_string()
                };
                Err(CapabilityFailure::Unavailable(message))
            }
        }
    }

    fn name(&self) -> &str {
        "claude"
    }
}
