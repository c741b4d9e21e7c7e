//! Pipeline type definitions.

use crate::core::task::TaskId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub Uuid);

impl PipelineId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID, for file names and display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for PipelineId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PipelineId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle stages, in order.
///
/// Clarify -> Specify -> Plan -> Execute -> FinalApproval -> Done, with
/// FinalApproval able to send affected tasks back to Execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Clarify,
    Specify,
    Plan,
    Execute,
    FinalApproval,
    Done,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Clarify => write!(f, "clarify"),
            PipelineStage::Specify => write!(f, "specify"),
            PipelineStage::Plan => write!(f, "plan"),
            PipelineStage::Execute => write!(f, "execute"),
            PipelineStage::FinalApproval => write!(f, "final_approval"),
            PipelineStage::Done => write!(f, "done"),
        }
    }
}

/// Points at which a human decision is awaited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "gate")]
pub enum GateKind {
    Specification,
    DevelopmentPlan,
    FinalDelivery,
    /// A task was blocked by its review cycle or by capability failure.
    Escalation { task_id: TaskId },
    /// A task reached its review cap with only minor issues.
    AutoAccept { task_id: TaskId },
    /// A drafting stage ran out of capability retries.
    StageFault { stage: PipelineStage },
}

impl GateKind {
    /// Task the gate concerns, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            GateKind::Escalation { task_id } | GateKind::AutoAccept { task_id } => Some(task_id),
            _ => None,
        }
    }
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateKind::Specification => write!(f, "specification approval"),
            GateKind::DevelopmentPlan => write!(f, "development plan approval"),
            GateKind::FinalDelivery => write!(f, "final delivery approval"),
            GateKind::Escalation { task_id } => write!(f, "escalation for task {}", task_id),
            GateKind::AutoAccept { task_id } => {
                write!(f, "auto-accept acknowledgement for task {}", task_id)
            }
            GateKind::StageFault { stage } => write!(f, "fault in stage {}", stage),
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Running,
    /// Done with every task approved.
    Completed,
    /// Done, but some tasks remain blocked or halted.
    CompletedWithBlockedTasks,
    Cancelled,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Running => write!(f, "running"),
            PipelineStatus::Completed => write!(f, "completed"),
            PipelineStatus::CompletedWithBlockedTasks => write!(f, "completed with blocked tasks"),
            PipelineStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
