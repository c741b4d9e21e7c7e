//! Task execution: one coding session per admitted task.
//!
//! The `TaskExecutor` takes an admitted task through implementation and the
//! coder/reviewer cycle, then publishes the task's handoff on approval. A
//! session only ever sees the approved specification, the plan, and the
//! latest handoffs of its direct predecessors. Raw traces of other tasks are
//! never part of its context.

use crate::core::dag::PlanGraph;
use crate::core::handoff::{HandoffArtifact, HandoffStore, SessionTrace, TraceKind};
use crate::core::review::{ReviewCycle, ReviewResolution, Verdict};
use crate::core::task::{TaskId, TaskNode};
use crate::error::{Error, Result};
use crate::orchestration::capability::{ContextDocument, Invoker};
use crate::orchestration::gate::{GateDecision, GateRequest, HumanGate};
use crate::orchestration::handoff::{handoff_context, HandoffGenerator};
use crate::orchestration::pool::SessionHandle;
use crate::orchestration::review::ReviewAgents;
use crate::orchestration::scheduler::SchedulerEvent;
use crate::workflow::GateKind;
use crate::{sflog, sflog_debug, sflog_warn};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// The approved documents every session receives.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    pub specification: String,
    pub plan: String,
}

/// How a task's session ended.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Approved {
        task_id: TaskId,
        auto_accepted: bool,
        caveats: Vec<String>,
        handoff: Arc<HandoffArtifact>,
    },
    Blocked {
        task_id: TaskId,
        reason: String,
        unresolved: Vec<String>,
        history: Vec<String>,
    },
    Cancelled {
        task_id: TaskId,
    },
}

impl TaskOutcome {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskOutcome::Approved { task_id, .. }
            | TaskOutcome::Blocked { task_id, .. }
            | TaskOutcome::Cancelled { task_id } => task_id,
        }
    }
}

/// Settings for the review cycle.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub review_cap: u32,
    /// Ask a human to acknowledge auto-acceptance at the review cap.
    pub acknowledge_auto_accept: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            review_cap: crate::core::review::DEFAULT_REVIEW_CAP,
            acknowledge_auto_accept: false,
        }
    }
}

pub struct TaskExecutor {
    graph: Arc<RwLock<PlanGraph>>,
    handoffs: HandoffStore,
    agents: ReviewAgents,
    generator: HandoffGenerator,
    gate: Arc<dyn HumanGate>,
    context: Arc<SharedContext>,
    settings: ExecutorSettings,
    event_tx: mpsc::UnboundedSender<SchedulerEvent>,
}

impl TaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<RwLock<PlanGraph>>,
        handoffs: HandoffStore,
        invoker: Invoker,
        gate: Arc<dyn HumanGate>,
        context: SharedContext,
        settings: ExecutorSettings,
        event_tx: mpsc::UnboundedSender<SchedulerEvent>,
    ) -> Self {
        Self {
            graph,
            handoffs,
            agents: ReviewAgents::new(invoker.clone()),
            generator: HandoffGenerator::new(invoker),
            gate,
            context: Arc::new(context),
            settings,
            event_tx,
        }
    }

    pub fn handoffs(&self) -> &HandoffStore {
        &self.handoffs
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Run an admitted task to a terminal state.
    ///
    /// The session slot is held for the whole run and released on return.
    /// Capability exhaustion blocks the task; cancellation discards any
    /// partial work and marks it cancelled. Every other failure inside the
    /// session blocks the task with the error as reason. A task with an
    /// unapproved predecessor is refused with `TaskBlocked`.
    pub async fn run(
        &self,
        task_id: TaskId,
        guidance: Option<String>,
        session: SessionHandle,
        cancel: CancellationToken,
    ) -> Result<TaskOutcome> {
        let task = {
            let mut graph = self.graph.write().await;
            if let Some(predecessor) = graph.blocking_predecessor(&task_id) {
                return Err(Error::TaskBlocked {
                    task_id,
                    reason: format!("predecessor {} is not approved", predecessor),
                });
            }
            let node = graph.require_mut(&task_id)?;
            node.start();
            node.clone()
        };
        sflog!(
            "{}: session {} started (attempt {})",
            task_id,
            session.session_id(),
            task.attempts
        );
        self.emit(SchedulerEvent::TaskStarted {
            task_id: task_id.clone(),
            session_id: session.session_id(),
        });

        let outcome = match self.drive(&task, guidance.as_deref(), &cancel).await {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => TaskOutcome::Cancelled {
                task_id: task_id.clone(),
            },
            // Any other failure stays inside this task's branch.
            Err(e) => {
                sflog_warn!("{}: session failed: {}", task_id, e);
                TaskOutcome::Blocked {
                    task_id: task_id.clone(),
                    reason: e.to_string(),
                    unresolved: Vec::new(),
                    history: Vec::new(),
                }
            }
        };

        self.settle(&outcome).await?;
        drop(session);
        Ok(outcome)
    }

    /// Apply the outcome to the graph and announce it.
    async fn settle(&self, outcome: &TaskOutcome) -> Result<()> {
        let mut graph = self.graph.write().await;
        let node = graph.require_mut(outcome.task_id())?;
        match outcome {
            TaskOutcome::Approved {
                task_id,
                auto_accepted,
                ..
            } => {
                node.approve(*auto_accepted);
                sflog!("{}: approved (auto_accepted={})", task_id, auto_accepted);
                self.emit(SchedulerEvent::TaskApproved {
                    task_id: task_id.clone(),
                    auto_accepted: *auto_accepted,
                });
            }
            TaskOutcome::Blocked {
                task_id,
                reason,
                unresolved,
                ..
            } => {
                node.block(reason);
                sflog_warn!("{}: blocked: {}", task_id, reason);
                self.emit(SchedulerEvent::TaskBlocked {
                    task_id: task_id.clone(),
                    reason: reason.clone(),
                    unresolved: unresolved.clone(),
                });
            }
            TaskOutcome::Cancelled { task_id } => {
                node.cancel();
                sflog!("{}: cancelled", task_id);
                self.emit(SchedulerEvent::TaskCancelled {
                    task_id: task_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Context for a task's session, predecessors in declaration order.
    pub async fn context_for(&self, task: &TaskNode) -> Vec<ContextDocument> {
        let mut documents = vec![
            ContextDocument {
                label: "Approved specification".to_string(),
                body: self.context.specification.clone(),
            },
            ContextDocument {
                label: "Approved development plan".to_string(),
                body: self.context.plan.clone(),
            },
        ];
        let handoffs = self.handoffs.latest_for(&task.predecessors).await;
        documents.extend(handoff_context(&handoffs));
        documents
    }

    async fn set_in_review(&self, task_id: &TaskId, iteration: u32) -> Result<()> {
        self.graph
            .write()
            .await
            .require_mut(task_id)?
            .begin_review(iteration);
        self.emit(SchedulerEvent::TaskInReview {
            task_id: task_id.clone(),
            iteration,
        });
        Ok(())
    }

    async fn drive(
        &self,
        task: &TaskNode,
        guidance: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let context = self.context_for(task).await;
        let mut trace = SessionTrace::new(task.id.clone());
        let mut cycle = ReviewCycle::new(task.id.clone(), self.settings.review_cap);

        trace.record(TraceKind::Prompt, task.description.clone());
        if let Some(guidance) = guidance {
            trace.record(TraceKind::Note, format!("Human guidance: {}", guidance));
        }

        let mut candidate = self.agents.implement(task, &context, guidance, cancel).await?;
        trace.record(TraceKind::Implementation, candidate.report());

        loop {
            if candidate.is_blocked() {
                sflog_warn!("{}: coder reported the task cannot be completed", task.id);
                cycle.escalate(vec![format!(
                    "implementation blocked: {}",
                    candidate.report()
                )])?;
                break;
            }

            let round = cycle.iterations() + 1;
            self.set_in_review(&task.id, round).await?;
            let verdict = self
                .agents
                .review(task, &context, &candidate, round, cycle.cap(), cancel)
                .await?;
            trace.record(TraceKind::Review, describe_verdict(round, &verdict));
            sflog_debug!("{}: round {} verdict {:?}", task.id, round, verdict);

            if cycle.record(candidate.report().to_string(), verdict)?.is_some() {
                break;
            }

            candidate = self
                .agents
                .revise(
                    task,
                    &context,
                    cycle.outstanding_issues(),
                    guidance,
                    candidate.session_id.clone(),
                    cancel,
                )
                .await?;
            trace.record(TraceKind::Revision, candidate.report());
        }

        if self.settings.acknowledge_auto_accept {
            self.acknowledge(task, &mut cycle, cancel).await?;
        }

        let resolution = cycle
            .resolution()
            .cloned()
            .ok_or_else(|| Error::Validation(format!("{}: review cycle did not finalize", task.id)))?;

        match resolution {
            ReviewResolution::Escalated { unresolved } => Ok(TaskOutcome::Blocked {
                task_id: task.id.clone(),
                reason: format!("escalated after {} review round(s)", cycle.iterations()),
                unresolved,
                history: cycle.history(),
            }),
            approved => {
                let caveats = approved.caveats().to_vec();
                let revision = self.handoffs.next_revision(&task.id).await;
                let artifact = self
                    .generator
                    .generate(task, &trace, &caveats, revision, cancel)
                    .await?;
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let handoff = self.handoffs.publish(artifact).await?;
                Ok(TaskOutcome::Approved {
                    task_id: task.id.clone(),
                    auto_accepted: matches!(approved, ReviewResolution::AutoAccepted { .. }),
                    caveats,
                    handoff,
                })
            }
        }
    }

    /// Put an auto-acceptance in front of a human. A revise decision turns
    /// it into an escalation.
    async fn acknowledge(
        &self,
        task: &TaskNode,
        cycle: &mut ReviewCycle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let caveats = match cycle.resolution() {
            Some(ReviewResolution::AutoAccepted { caveats }) => caveats.clone(),
            _ => return Ok(()),
        };
        let request = GateRequest::new(
            GateKind::AutoAccept {
                task_id: task.id.clone(),
            },
            format!("Auto-accept task {} with minor issues", task.id),
            cycle.history().join("\n"),
        )
        .with_reasons(caveats);

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            decision = self.gate.decide(&request) => decision?,
        };
        if let GateDecision::Revise(feedback) = decision {
            cycle.reject_auto_accept(&feedback)?;
        }
        Ok(())
    }
}

fn describe_verdict(round: u32, verdict: &Verdict) -> String {
    match verdict {
        Verdict::Approved => format!("Round {}: approved", round),
        Verdict::RevisionRequested { issues, severity } => format!(
            "Round {}: {:?} revision requested\n{}",
            round,
            severity,
            issues.join("\n")
        ),
        Verdict::Escalate { issues } => {
            format!("Round {}: escalated\n{}", round, issues.join("\n"))
        }
    }
}
