//! Task node model for the plan graph.
//!
//! A `TaskNode` is one unit of work in the development plan. Its identifier
//! comes from the approved plan text, so it is a free-form string that is
//! unique within a plan rather than a generated UUID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a task within a plan (e.g. `T1`, `auth-model`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status in its lifecycle.
///
/// `Pending -> Ready -> Running -> InReview -> Approved | Blocked`, with
/// `Cancelled` as the terminal state for units abandoned on pipeline
/// cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Waiting for predecessors.
    #[default]
    Pending,
    /// Every predecessor is approved; waiting for a session slot.
    Ready,
    /// Coding session active.
    Running,
    /// Review cycle active.
    InReview {
        /// 1-based review round currently in progress.
        iteration: u32,
    },
    /// Review cycle finalized as approved (possibly auto-accepted).
    Approved {
        /// True when accepted at the iteration cap with caveats.
        auto_accepted: bool,
    },
    /// Review escalated or the session failed.
    Blocked {
        /// Reason the task is blocked.
        reason: String,
    },
    /// Session abandoned because the pipeline was cancelled.
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Approved { .. } | TaskStatus::Blocked { .. } | TaskStatus::Cancelled
        )
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, TaskStatus::Approved { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::InReview { .. })
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::InReview { iteration } => write!(f, "in review (round {})", iteration),
            TaskStatus::Approved { auto_accepted: false } => write!(f, "approved"),
            TaskStatus::Approved { auto_accepted: true } => write!(f, "approved (auto-accepted)"),
            TaskStatus::Blocked { reason } => write!(f, "blocked: {}", reason),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single task in the plan graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    /// Prerequisites in plan-declaration order.
    pub predecessors: Vec<TaskId>,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// How many times this task has been executed (rework increments it).
    pub attempts: u32,
}

impl TaskNode {
    pub fn new(id: TaskId, title: &str, description: &str, predecessors: Vec<TaskId>) -> Self {
        Self {
            id,
            title: title.to_string(),
            description: description.to_string(),
            predecessors,
            status: TaskStatus::Pending,
            started_at: None,
            finished_at: None,
            attempts: 0,
        }
    }

    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    /// Begin a coding session.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.attempts += 1;
    }

    pub fn begin_review(&mut self, iteration: u32) {
        self.status = TaskStatus::InReview { iteration };
    }

    pub fn approve(&mut self, auto_accepted: bool) {
        self.status = TaskStatus::Approved { auto_accepted };
        self.finished_at = Some(Utc::now());
    }

    pub fn block(&mut self, reason: &str) {
        self.status = TaskStatus::Blocked {
            reason: reason.to_string(),
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Return the task to `Pending` so it can be executed again.
    ///
    /// Used for rework after final approval and for escalation retries.
    /// Topology is untouched.
    pub fn reopen(&mut self) {
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.finished_at = None;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A task can be admitted only from Pending or Ready.
    pub fn can_start(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Ready)
    }
}
