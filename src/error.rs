use thiserror::Error;

use crate::core::dag::PlanGraphError;
use crate::core::task::TaskId;
use crate::orchestration::{AgentRole, CapabilityFailure};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Capability binary not found: {0}")]
    CapabilityBinaryNotFound(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Invalid stage transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Capability failed for {role} after {attempts} attempt(s): {last}")]
    CapabilityExhausted {
        role: AgentRole,
        attempts: u32,
        last: CapabilityFailure,
    },

    #[error("Invalid plan graph: {0}")]
    InvalidPlanGraph(#[from] PlanGraphError),

    #[error("Review of task {task_id} reached its iteration cap of {cap}")]
    ReviewIterationCapReached { task_id: TaskId, cap: u32 },

    #[error("Task {task_id} is blocked: {reason}")]
    TaskBlocked { task_id: TaskId, reason: String },

    #[error("Handoff for task {task_id} revision {revision} is already published")]
    HandoffAlreadyPublished { task_id: TaskId, revision: u32 },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("{stage} did not converge after {iterations} iteration(s)")]
    ConvergenceCapReached { stage: String, iterations: u32 },

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error came from cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
