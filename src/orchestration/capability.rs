//! Agent capability interface.
//!
//! Every call to the external text-generation collaborator goes through the
//! [`Capability`] trait. Callers never use the trait directly; they go
//! through an [`Invoker`], which applies the retry policy and honors
//! cancellation.

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::{sflog_debug, sflog_trace, sflog_warn};
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Behavioral persona the capability adopts for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Clarifier,
    SpecAuthor,
    Planner,
    Coder,
    Reviewer,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentRole::Clarifier => "clarifier",
            AgentRole::SpecAuthor => "specification-author",
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
            AgentRole::Reviewer => "reviewer",
        };
        write!(f, "{}", name)
    }
}

/// What a call is for. Determines the role and the prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Clarify,
    DraftSpec,
    DraftPlan,
    ExtractTasks,
    Implement,
    Revise,
    Review,
    Handoff,
    TriageFeedback,
}

impl Purpose {
    pub fn role(&self) -> AgentRole {
        match self {
            Purpose::Clarify => AgentRole::Clarifier,
            Purpose::DraftSpec => AgentRole::SpecAuthor,
            Purpose::DraftPlan | Purpose::ExtractTasks | Purpose::TriageFeedback => {
                AgentRole::Planner
            }
            Purpose::Implement | Purpose::Revise | Purpose::Handoff => AgentRole::Coder,
            Purpose::Review => AgentRole::Reviewer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Clarify => "clarify",
            Purpose::DraftSpec => "draft_spec",
            Purpose::DraftPlan => "draft_plan",
            Purpose::ExtractTasks => "extract_tasks",
            Purpose::Implement => "implement",
            Purpose::Revise => "revise",
            Purpose::Review => "review",
            Purpose::Handoff => "handoff",
            Purpose::TriageFeedback => "triage_feedback",
        }
    }
}

/// Failure of a single capability call. Always transient from the caller's
/// point of view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityFailure {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A labelled document passed as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub label: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub role: AgentRole,
    pub purpose: Purpose,
    /// Task the call is about, for task-scoped purposes.
    pub subject: Option<TaskId>,
    /// Ordered context documents.
    pub context: Vec<ContextDocument>,
    pub instructions: String,
    /// JSON schema the response must satisfy, if structured.
    pub output_schema: Option<Value>,
    /// Capability session to continue.
    pub resume_session: Option<String>,
}

impl CapabilityRequest {
    pub fn new(purpose: Purpose, instructions: impl Into<String>) -> Self {
        Self {
            role: purpose.role(),
            purpose,
            subject: None,
            context: Vec::new(),
            instructions: instructions.into(),
            output_schema: None,
            resume_session: None,
        }
    }

    pub fn with_subject(mut self, task_id: TaskId) -> Self {
        self.subject = Some(task_id);
        self
    }

    pub fn with_context(mut self, label: impl Into<String>, body: impl Into<String>) -> Self {
        self.context.push(ContextDocument {
            label: label.into(),
            body: body.into(),
        });
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.resume_session = session_id;
        self
    }

    /// Context documents followed by the instructions, as one prompt.
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::new();
        for doc in &self.context {
            prompt.push_str(&format!("## {}\n\n{}\n\n", doc.label, doc.body.trim()));
        }
        prompt.push_str(self.instructions.trim());
        prompt
    }

    /// Short form for log lines.
    pub fn describe(&self) -> String {
        match &self.subject {
            Some(id) => format!("{} ({}) for {}", self.purpose.as_str(), self.role, id),
            None => format!("{} ({})", self.purpose.as_str(), self.role),
        }
    }
}

/// Textual result of a capability call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextArtifact {
    pub text: String,
    /// Capability session that produced the text, for later continuation.
    pub session_id: Option<String>,
}

impl TextArtifact {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Deserialize the text as JSON, unwrapping a fenced ```json block if
    /// present.
    pub fn parse_json<T: DeserializeOwned>(&self) -> std::result::Result<T, CapabilityFailure> {
        let body = extract_json(&self.text);
        if body.is_empty() {
            return Err(CapabilityFailure::Malformed("empty response".to_string()));
        }
        serde_json::from_str(body).map_err(|e| CapabilityFailure::Malformed(e.to_string()))
    }
}

fn fenced_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```").expect("valid regex literal")
    })
}

/// Locate the JSON payload in a response.
///
/// Prefers a fenced block, then the outermost `{...}` span.
pub fn extract_json(text: &str) -> &str {
    if let Some(caps) = fenced_block().captures(text) {
        if let Some(body) = caps.get(1) {
            return body.as_str().trim();
        }
    }
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// The external text-generation collaborator.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Perform one call. May take arbitrarily long; callers wrap it in
    /// cancellation.
    async fn invoke(
        &self,
        request: &CapabilityRequest,
    ) -> std::result::Result<TextArtifact, CapabilityFailure>;

    fn name(&self) -> &str {
        "capability"
    }
}

/// Exponential backoff settings for capability retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Delay after the given 0-based failed attempt: `base * 2^attempt`, capped.
    pub fn compute_backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Capability plus retry policy. Cheap to clone.
#[derive(Clone)]
pub struct Invoker {
    capability: Arc<dyn Capability>,
    policy: RetryPolicy,
}

impl Invoker {
    pub fn new(capability: Arc<dyn Capability>, policy: RetryPolicy) -> Self {
        Self { capability, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke with retries. Empty responses count as malformed.
    ///
    /// # Errors
    /// `Cancelled` if `cancel` fires first, `CapabilityExhausted` once every
    /// attempt has failed.
    pub async fn invoke(
        &self,
        request: &CapabilityRequest,
        cancel: &CancellationToken,
    ) -> Result<TextArtifact> {
        self.invoke_map(request, cancel, Ok).await
    }

    /// Invoke with retries and deserialize the response. A response that
    /// fails to parse is retried like any other failure.
    pub async fn invoke_json<T>(
        &self,
        request: &CapabilityRequest,
        cancel: &CancellationToken,
    ) -> Result<(T, TextArtifact)>
    where
        T: DeserializeOwned + Send,
    {
        self.invoke_map(request, cancel, |artifact| {
            let parsed = artifact.parse_json::<T>()?;
            Ok((parsed, artifact))
        })
        .await
    }

    /// Invoke with retries, converting each response with `parse`. A
    /// conversion failure counts as a failed attempt.
    pub async fn invoke_map<R, F>(
        &self,
        request: &CapabilityRequest,
        cancel: &CancellationToken,
        mut parse: F,
    ) -> Result<R>
    where
        R: Send,
        F: FnMut(TextArtifact) -> std::result::Result<R, CapabilityFailure> + Send,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut last = CapabilityFailure::Unavailable("no attempt made".to_string());

        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            sflog_debug!(
                "{}: invoking {} (attempt {}/{})",
                self.capability.name(),
                request.describe(),
                attempt + 1,
                attempts
            );
            sflog_trace!("prompt for {}:\n{}", request.describe(), request.render_prompt());

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = self.capability.invoke(request) => outcome,
            };

            let failure = match outcome {
                Ok(artifact) if artifact.text.trim().is_empty() => {
                    CapabilityFailure::Malformed("empty response".to_string())
                }
                Ok(artifact) => {
                    sflog_trace!("response for {}:\n{}", request.describe(), artifact.text);
                    match parse(artifact) {
                        Ok(value) => return Ok(value),
                        Err(failure) => failure,
                    }
                }
                Err(failure) => failure,
            };

            sflog_warn!(
                "{} failed on attempt {}/{}: {}",
                request.describe(),
                attempt + 1,
                attempts,
                failure
            );
            last = failure;

            if attempt + 1 < attempts {
                let delay = self.policy.compute_backoff(attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(Error::CapabilityExhausted {
            role: request.role,
            attempts,
            last,
        })
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("capability", &self.capability.name())
            .field("policy", &self.policy)
            .finish()
    }
}
