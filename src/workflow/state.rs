//! Pipeline state with stage transition validation.
//!
//! `PipelineState` tracks the current stage, the stage history, the
//! artifacts committed at each stage boundary, and the human gates still
//! awaiting a decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{GateKind, PipelineId, PipelineStage};

/// A stage entry with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub stage: PipelineStage,
    pub entered_at: DateTime<Utc>,
}

/// Process-wide pipeline state.
///
/// Stages advance strictly in order. The only backward edge is
/// FinalApproval -> Execute, used for rework of affected tasks. Each
/// committed artifact is frozen once its stage is left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    id: PipelineId,
    request: String,
    stage: PipelineStage,
    history: Vec<StageHistoryEntry>,
    outstanding_gates: Vec<GateKind>,
    requirements: Option<String>,
    specification: Option<String>,
    plan: Option<String>,
}

impl PipelineState {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            id: PipelineId::new(),
            request: request.into(),
            stage: PipelineStage::Clarify,
            history: vec![StageHistoryEntry {
                stage: PipelineStage::Clarify,
                entered_at: Utc::now(),
            }],
            outstanding_gates: Vec::new(),
            requirements: None,
            specification: None,
            plan: None,
        }
    }

    pub fn can_transition(&self, target: PipelineStage) -> bool {
        matches!(
            (self.stage, target),
            (PipelineStage::Clarify, PipelineStage::Specify)
                | (PipelineStage::Specify, PipelineStage::Plan)
                | (PipelineStage::Plan, PipelineStage::Execute)
                | (PipelineStage::Execute, PipelineStage::FinalApproval)
                | (PipelineStage::FinalApproval, PipelineStage::Execute)
                | (PipelineStage::FinalApproval, PipelineStage::Done)
        )
    }

    /// Move to `target`.
    ///
    /// Leaving Clarify, Specify or Plan requires that stage's artifact to be
    /// committed, and no stage may be left with a gate still open.
    pub fn transition(&mut self, target: PipelineStage) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.stage.to_string(),
                to: target.to_string(),
            });
        }
        let missing = match self.stage {
            PipelineStage::Clarify if self.requirements.is_none() => Some("clarified requirements"),
            PipelineStage::Specify if self.specification.is_none() => Some("specification"),
            PipelineStage::Plan if self.plan.is_none() => Some("development plan"),
            _ => None,
        };
        if let Some(artifact) = missing {
            return Err(Error::Validation(format!(
                "cannot leave {} without an approved {}",
                self.stage, artifact
            )));
        }
        if let Some(gate) = self.outstanding_gates.first() {
            return Err(Error::Validation(format!(
                "cannot leave {} while {} is outstanding",
                self.stage, gate
            )));
        }

        self.stage = target;
        self.history.push(StageHistoryEntry {
            stage: target,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    fn commit(slot: &mut Option<String>, stage: PipelineStage, expected: PipelineStage, text: String) -> Result<()> {
        if stage != expected {
            return Err(Error::Validation(format!(
                "{} can only be committed during {}, not {}",
                expected, expected, stage
            )));
        }
        *slot = Some(text);
        Ok(())
    }

    pub fn commit_requirements(&mut self, text: String) -> Result<()> {
        Self::commit(&mut self.requirements, self.stage, PipelineStage::Clarify, text)
    }

    pub fn commit_specification(&mut self, text: String) -> Result<()> {
        Self::commit(&mut self.specification, self.stage, PipelineStage::Specify, text)
    }

    pub fn commit_plan(&mut self, text: String) -> Result<()> {
        Self::commit(&mut self.plan, self.stage, PipelineStage::Plan, text)
    }

    /// Record a gate as awaiting a decision. Opening the same gate twice is a no-op.
    pub fn open_gate(&mut self, gate: GateKind) {
        if !self.outstanding_gates.contains(&gate) {
            self.outstanding_gates.push(gate);
        }
    }

    /// Returns whether the gate was outstanding.
    pub fn close_gate(&mut self, gate: &GateKind) -> bool {
        let before = self.outstanding_gates.len();
        self.outstanding_gates.retain(|g| g != gate);
        before != self.outstanding_gates.len()
    }

    pub fn outstanding_gates(&self) -> &[GateKind] {
        &self.outstanding_gates
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn current_stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn stage_history(&self) -> &[StageHistoryEntry] {
        &self.history
    }

    pub fn requirements(&self) -> Option<&str> {
        self.requirements.as_deref()
    }

    pub fn specification(&self) -> Option<&str> {
        self.specification.as_deref()
    }

    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.stage == PipelineStage::Done
    }

    /// Number of times Execute has been entered.
    pub fn execute_passes(&self) -> usize {
        self.history
            .iter()
            .filter(|entry| entry.stage == PipelineStage::Execute)
            .count()
    }
}
