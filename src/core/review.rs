//! Review cycle bookkeeping for a single task.
//!
//! A `ReviewCycle` is the ordered list of (candidate, verdict) rounds for one
//! task. It never holds more rounds than its cap. When the cap is reached
//! with revisions still outstanding, the reviewer's own severity
//! classification decides between auto-accepting with caveats and
//! escalating to a human.

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default maximum number of review rounds per task.
pub const DEFAULT_REVIEW_CAP: u32 = 5;

/// Reviewer's classification of outstanding feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
}

/// Outcome of one review round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum Verdict {
    Approved,
    RevisionRequested {
        issues: Vec<String>,
        severity: Severity,
    },
    Escalate {
        issues: Vec<String>,
    },
}

impl Verdict {
    pub fn issues(&self) -> &[String] {
        match self {
            Verdict::Approved => &[],
            Verdict::RevisionRequested { issues, .. } | Verdict::Escalate { issues } => issues,
        }
    }
}

/// One (candidate, verdict) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRound {
    /// 1-based round number.
    pub iteration: u32,
    pub candidate: String,
    pub verdict: Verdict,
    pub recorded_at: DateTime<Utc>,
}

/// How a finalized cycle resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "resolution")]
pub enum ReviewResolution {
    Approved,
    /// Cap reached with minor issues; they become known caveats.
    AutoAccepted { caveats: Vec<String> },
    /// Needs a human; the task is blocked.
    Escalated { unresolved: Vec<String> },
}

impl ReviewResolution {
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            ReviewResolution::Approved | ReviewResolution::AutoAccepted { .. }
        )
    }

    pub fn caveats(&self) -> &[String] {
        match self {
            ReviewResolution::AutoAccepted { caveats } => caveats,
            _ => &[],
        }
    }
}

/// Where a cycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Drafting,
    RevisionRequested,
    Approved,
    IterationCapReached,
    Escalated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCycle {
    task_id: TaskId,
    cap: u32,
    rounds: Vec<ReviewRound>,
    resolution: Option<ReviewResolution>,
}

impl ReviewCycle {
    pub fn new(task_id: TaskId, cap: u32) -> Self {
        Self {
            task_id,
            cap: cap.max(1),
            rounds: Vec::new(),
            resolution: None,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn rounds(&self) -> &[ReviewRound] {
        &self.rounds
    }

    pub fn iterations(&self) -> u32 {
        self.rounds.len() as u32
    }

    pub fn resolution(&self) -> Option<&ReviewResolution> {
        self.resolution.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn phase(&self) -> CyclePhase {
        match (&self.resolution, self.rounds.last()) {
            (Some(ReviewResolution::Approved), _) => CyclePhase::Approved,
            (Some(ReviewResolution::AutoAccepted { .. }), _) => CyclePhase::IterationCapReached,
            (Some(ReviewResolution::Escalated { .. }), _) => CyclePhase::Escalated,
            (None, Some(round)) if matches!(round.verdict, Verdict::RevisionRequested { .. }) => {
                CyclePhase::RevisionRequested
            }
            (None, _) => CyclePhase::Drafting,
        }
    }

    /// Issues from the latest verdict that the next revision must address.
    pub fn outstanding_issues(&self) -> &[String] {
        self.rounds
            .last()
            .map(|round| round.verdict.issues())
            .unwrap_or(&[])
    }

    /// Record a reviewed candidate.
    ///
    /// Returns the resolution when this round finalizes the cycle.
    ///
    /// # Errors
    /// Fails if the cycle is already finalized, or with
    /// `ReviewIterationCapReached` if the cap has been used up.
    pub fn record(&mut self, candidate: String, verdict: Verdict) -> Result<Option<ReviewResolution>> {
        if self.is_finalized() {
            return Err(Error::Validation(format!(
                "review cycle for {} is already finalized",
                self.task_id
            )));
        }
        if self.iterations() >= self.cap {
            return Err(Error::ReviewIterationCapReached {
                task_id: self.task_id.clone(),
                cap: self.cap,
            });
        }

        let iteration = self.iterations() + 1;
        let resolution = match &verdict {
            Verdict::Approved => Some(ReviewResolution::Approved),
            Verdict::Escalate { issues } => Some(ReviewResolution::Escalated {
                unresolved: issues.clone(),
            }),
            Verdict::RevisionRequested { issues, severity } if iteration >= self.cap => {
                Some(match severity {
                    Severity::Minor => ReviewResolution::AutoAccepted {
                        caveats: issues.clone(),
                    },
                    Severity::Major => ReviewResolution::Escalated {
                        unresolved: issues.clone(),
                    },
                })
            }
            Verdict::RevisionRequested { .. } => None,
        };

        self.rounds.push(ReviewRound {
            iteration,
            candidate,
            verdict,
            recorded_at: Utc::now(),
        });
        self.resolution = resolution.clone();
        Ok(resolution)
    }

    /// Finalize as escalated without a review verdict, e.g. when the coding
    /// session itself reports that it cannot complete the task.
    pub fn escalate(&mut self, unresolved: Vec<String>) -> Result<ReviewResolution> {
        if self.is_finalized() {
            return Err(Error::Validation(format!(
                "review cycle for {} is already finalized",
                self.task_id
            )));
        }
        let resolution = ReviewResolution::Escalated { unresolved };
        self.resolution = Some(resolution.clone());
        Ok(resolution)
    }

    /// Turn an auto-acceptance into an escalation after a human declined to
    /// acknowledge it.
    pub fn reject_auto_accept(&mut self, feedback: &str) -> Result<ReviewResolution> {
        match self.resolution.take() {
            Some(ReviewResolution::AutoAccepted { mut caveats }) => {
                caveats.push(feedback.to_string());
                let resolution = ReviewResolution::Escalated { unresolved: caveats };
                self.resolution = Some(resolution.clone());
                Ok(resolution)
            }
            other => {
                self.resolution = other;
                Err(Error::Validation(format!(
                    "review cycle for {} was not auto-accepted",
                    self.task_id
                )))
            }
        }
    }

    /// One line per round, for escalation context.
    pub fn history(&self) -> Vec<String> {
        self.rounds
            .iter()
            .map(|round| match &round.verdict {
                Verdict::Approved => format!("round {}: approved", round.iteration),
                Verdict::RevisionRequested { issues, severity } => format!(
                    "round {}: revision requested ({:?}): {}",
                    round.iteration,
                    severity,
                    issues.join("; ")
                ),
                Verdict::Escalate { issues } => {
                    format!("round {}: escalated: {}", round.iteration, issues.join("; "))
                }
            })
            .collect()
    }
}
