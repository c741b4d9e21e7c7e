//! Pipeline controller.
//!
//! Sequences the stages of a run: Clarify, Specify, Plan, Execute,
//! FinalApproval and Done. Every stage boundary is a commit point recorded in
//! [`PipelineState`]; a stage cannot be left while one of its gates is open.
//! FinalApproval may send the affected tasks back to Execute.

use crate::config::Config;
use crate::core::dag::PlanGraph;
use crate::core::handoff::{HandoffArtifact, HandoffStore};
use crate::core::task::{TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::capability::{Capability, CapabilityRequest, Invoker, Purpose};
use crate::orchestration::convergence::{
    CapabilityDrafter, ConvergenceLoop, Evaluator, PriorFeedback,
};
use crate::orchestration::gate::{GateDecision, GateRequest, HumanGate};
use crate::orchestration::pool::SessionPool;
use crate::orchestration::prompts::{self, AffectedTasks, TaskExtraction};
use crate::orchestration::scheduler::{ExecutionReport, HaltedTask, Scheduler, SchedulerEvent};
use crate::orchestration::session::{ExecutorSettings, SharedContext, TaskExecutor};
use crate::workflow::{
    GateKind, Journal, JournalTag, PipelineId, PipelineStage, PipelineState, PipelineStatus,
    StageHistoryEntry,
};
use crate::{sflog, sflog_debug, sflog_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub attempts: u32,
    /// Set when the task never ran because an ancestor did not approve.
    pub halted_by: Option<TaskId>,
    pub handoff_revision: Option<u32>,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub pipeline_id: PipelineId,
    pub request: String,
    pub status: PipelineStatus,
    pub requirements: String,
    pub specification: String,
    pub plan: String,
    pub tasks: Vec<TaskReport>,
    /// Latest revision of each task's handoff.
    pub handoffs: Vec<HandoffArtifact>,
    pub stage_history: Vec<StageHistoryEntry>,
    pub rework_rounds: u32,
    pub finished_at: DateTime<Utc>,
}

impl PipelineReport {
    /// Write the report as `report.json` under `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("report.json");
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskReport> {
        self.tasks.iter().find(|task| &task.task_id == id)
    }
}

/// Drives a request through every stage to Done.
///
/// # Example
///
/// ```ignore
/// let controller = PipelineController::new(config, Arc::new(claude), Arc::new(ConsoleGate::new()))
///     .with_output_dir(config.effective_output_dir()?);
/// let report = controller.run("Build a todo CLI", &cancel).await?;
/// ```
pub struct PipelineController {
    config: Config,
    invoker: Invoker,
    gate: Arc<dyn HumanGate>,
    output_dir: Option<PathBuf>,
    event_tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

/// Per-run resources shared by the execute and approval stages.
struct Execution {
    graph: Arc<RwLock<PlanGraph>>,
    handoffs: HandoffStore,
    scheduler: Scheduler,
}

impl PipelineController {
    pub fn new(config: Config, capability: Arc<dyn Capability>, gate: Arc<dyn HumanGate>) -> Self {
        let invoker = Invoker::new(capability, config.retry_policy());
        Self {
            config,
            invoker,
            gate,
            output_dir: None,
            event_tx: None,
        }
    }

    /// Persist the journal and final report under `dir/<pipeline id>/`.
    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }

    /// Forward scheduler events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Directory holding a run's journal and report.
    pub fn run_dir(&self, id: PipelineId) -> Option<PathBuf> {
        self.output_dir.as_ref().map(|dir| dir.join(id.short()))
    }

    /// Run the full pipeline for `request`.
    ///
    /// # Errors
    /// `Cancelled` when `cancel` fires; `ConvergenceCapReached` when a stage
    /// fails to converge; `CapabilityExhausted` when a human stops a stage
    /// that ran out of retries; I/O errors from the stages.
    pub async fn run(&self, request: &str, cancel: &CancellationToken) -> Result<PipelineReport> {
        let mut state = PipelineState::new(request);
        let journal = match self.run_dir(state.id()) {
            Some(dir) => Journal::new(dir.join("journal.md")),
            None => Journal::disabled(),
        };
        sflog!("Pipeline {}: started", state.id());
        journal.record(JournalTag::UserRequest, "", request).await;

        let mut faults = 0;
        let requirements = loop {
            let result = self.clarify(&state, &journal, cancel).await;
            match result {
                Err(e @ Error::CapabilityExhausted { .. }) => {
                    faults += 1;
                    self.escalate_fault(&mut state, e, faults, &journal, cancel)
                        .await?
                }
                result => break result?,
            }
        };
        state.commit_requirements(requirements)?;
        self.advance(&mut state, PipelineStage::Specify, &journal).await?;

        let mut faults = 0;
        let specification = loop {
            let result = self.specify(&mut state, &journal, cancel).await;
            match result {
                Err(e @ Error::CapabilityExhausted { .. }) => {
                    faults += 1;
                    self.escalate_fault(&mut state, e, faults, &journal, cancel)
                        .await?
                }
                result => break result?,
            }
        };
        state.commit_specification(specification)?;
        self.advance(&mut state, PipelineStage::Plan, &journal).await?;

        let mut faults = 0;
        let (plan, graph) = loop {
            let result = self.plan(&mut state, &journal, cancel).await;
            match result {
                Err(e @ Error::CapabilityExhausted { .. }) => {
                    faults += 1;
                    self.escalate_fault(&mut state, e, faults, &journal, cancel)
                        .await?
                }
                result => break result?,
            }
        };
        state.commit_plan(plan)?;
        journal
            .record(JournalTag::TaskGraph, "", &describe_levels(&graph))
            .await;
        self.advance(&mut state, PipelineStage::Execute, &journal).await?;

        let execution = self.prepare_execution(&state, graph);
        let mut report = self
            .execute_pass(&execution, None, &HashMap::new(), &journal, cancel)
            .await?;
        self.resolve_escalations(&mut state, &execution, &mut report, &journal, cancel)
            .await?;
        self.advance(&mut state, PipelineStage::FinalApproval, &journal)
            .await?;

        let rework_rounds = self
            .final_approval(&mut state, &execution, &mut report, &journal, cancel)
            .await?;
        self.advance(&mut state, PipelineStage::Done, &journal).await?;

        let report = self
            .build_report(&state, &execution, &report, rework_rounds)
            .await;
        if let Some(dir) = self.run_dir(state.id()) {
            let path = report.save(&dir)?;
            sflog!("Pipeline {}: report written to {}", state.id(), path.display());
        }
        sflog!("Pipeline {}: {}", state.id(), report.status);
        Ok(report)
    }

    async fn advance(
        &self,
        state: &mut PipelineState,
        target: PipelineStage,
        journal: &Journal,
    ) -> Result<()> {
        let from = state.current_stage();
        state.transition(target)?;
        sflog!("Pipeline {}: {} -> {}", state.id(), from, target);
        journal
            .record(
                JournalTag::StageTransition,
                "",
                &format!("{} -> {}", from, target),
            )
            .await;
        Ok(())
    }

    /// Put a stage that ran out of capability retries in front of a human.
    /// Returns `Ok` when the stage should be retried, otherwise the fault.
    /// `Revise` retries, `Approve` accepts the fault and ends the run.
    /// Bounded by `max_escalation_rounds`.
    async fn escalate_fault(
        &self,
        state: &mut PipelineState,
        fault: Error,
        round: u32,
        journal: &Journal,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let stage = state.current_stage();
        sflog_warn!("Pipeline {}: {} failed: {}", state.id(), stage, fault);
        if round > self.config.max_escalation_rounds {
            return Err(fault);
        }

        let kind = GateKind::StageFault { stage };
        let request = GateRequest::new(
            kind.clone(),
            format!("Stage {} failed (revise to retry, approve to stop)", stage),
            fault.to_string(),
        )
        .with_reasons(vec![fault.to_string()]);
        journal
            .record_list(JournalTag::Escalation, &stage.to_string(), &request.reasons)
            .await;

        state.open_gate(kind.clone());
        let decision = self.decide(&request, cancel).await?;
        state.close_gate(&kind);

        match decision {
            GateDecision::Approve => Err(fault),
            GateDecision::Revise(feedback) => {
                sflog!("Pipeline {}: retrying {} (round {})", state.id(), stage, round);
                journal
                    .record(JournalTag::HumanFeedback, &stage.to_string(), &feedback)
                    .await;
                Ok(())
            }
        }
    }

    async fn decide(&self, request: &GateRequest, cancel: &CancellationToken) -> Result<GateDecision> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            decision = self.gate.decide(request) => decision,
        }
    }

    // Stages

    async fn clarify(
        &self,
        state: &PipelineState,
        journal: &Journal,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let drafter = CapabilityDrafter::new(
            self.invoker.clone(),
            Purpose::Clarify,
            prompts::clarify_instructions(state.request()),
        );
        ConvergenceLoop::new(
            PipelineStage::Clarify.to_string(),
            self.config.convergence_cap,
            Evaluator::AutoEvaluated,
            self.gate.as_ref(),
            journal,
        )
        .run(&drafter, cancel)
        .await?
        .into_candidate("clarify")
    }

    async fn specify(
        &self,
        state: &mut PipelineState,
        journal: &Journal,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let drafter = CapabilityDrafter::new(
            self.invoker.clone(),
            Purpose::DraftSpec,
            prompts::spec_instructions(),
        )
        .with_context("Clarified requirements", state.requirements().unwrap_or_default());

        state.open_gate(GateKind::Specification);
        let specification = ConvergenceLoop::new(
            PipelineStage::Specify.to_string(),
            self.config.convergence_cap,
            Evaluator::HumanGated(GateKind::Specification),
            self.gate.as_ref(),
            journal,
        )
        .run(&drafter, cancel)
        .await?
        .into_candidate("specify")?;
        state.close_gate(&GateKind::Specification);
        Ok(specification)
    }

    /// Draft the plan until a human approves it and its task graph is valid.
    ///
    /// A structurally invalid graph is never repaired: the defect goes back
    /// to the planner as revision feedback and the redraft needs approval
    /// again.
    async fn plan(
        &self,
        state: &mut PipelineState,
        journal: &Journal,
        cancel: &CancellationToken,
    ) -> Result<(String, PlanGraph)> {
        let drafter = CapabilityDrafter::new(
            self.invoker.clone(),
            Purpose::DraftPlan,
            prompts::plan_instructions(),
        )
        .with_context("Clarified requirements", state.requirements().unwrap_or_default())
        .with_context("Approved specification", state.specification().unwrap_or_default());
        let convergence = ConvergenceLoop::new(
            PipelineStage::Plan.to_string(),
            self.config.convergence_cap,
            Evaluator::HumanGated(GateKind::DevelopmentPlan),
            self.gate.as_ref(),
            journal,
        );

        state.open_gate(GateKind::DevelopmentPlan);
        let mut prior = PriorFeedback::None;
        for attempt in 1..=self.config.convergence_cap {
            let plan = convergence
                .run_from(&drafter, prior, cancel)
                .await?
                .into_candidate("plan")?;

            let request = CapabilityRequest::new(Purpose::ExtractTasks, prompts::extract_tasks_instructions())
                .with_context("Approved development plan", plan.clone())
                .with_schema(prompts::task_extraction_schema());
            let (extraction, _) = self
                .invoker
                .invoke_json::<TaskExtraction>(&request, cancel)
                .await?;
            sflog_debug!("Plan: extracted {} task(s)", extraction.tasks.len());

            match PlanGraph::build(extraction.tasks) {
                Ok(graph) if graph.is_empty() => {
                    sflog_warn!("Plan: attempt {} produced no tasks", attempt);
                    prior = PriorFeedback::Revision(prompts::graph_feedback(
                        "the plan declares no tasks",
                    ));
                }
                Ok(graph) => {
                    state.close_gate(&GateKind::DevelopmentPlan);
                    return Ok((plan, graph));
                }
                Err(Error::InvalidPlanGraph(defect)) => {
                    sflog_warn!("Plan: attempt {} rejected: {}", attempt, defect);
                    let feedback = prompts::graph_feedback(&defect.to_string());
                    journal
                        .record(JournalTag::HumanFeedback, "plan graph", &feedback)
                        .await;
                    prior = PriorFeedback::Revision(feedback);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::ConvergenceCapReached {
            stage: "plan".to_string(),
            iterations: self.config.convergence_cap,
        })
    }

    fn prepare_execution(&self, state: &PipelineState, graph: PlanGraph) -> Execution {
        let graph = Arc::new(RwLock::new(graph));
        let handoffs = HandoffStore::new();
        let event_tx = match &self.event_tx {
            Some(tx) => tx.clone(),
            None => mpsc::unbounded_channel().0,
        };
        let executor = TaskExecutor::new(
            Arc::clone(&graph),
            handoffs.clone(),
            self.invoker.clone(),
            Arc::clone(&self.gate),
            SharedContext {
                specification: state.specification().unwrap_or_default().to_string(),
                plan: state.plan().unwrap_or_default().to_string(),
            },
            ExecutorSettings {
                review_cap: self.config.review_cap,
                acknowledge_auto_accept: self.config.acknowledge_auto_accept,
            },
            event_tx.clone(),
        );
        let scheduler = Scheduler::new(
            Arc::clone(&graph),
            SessionPool::new(self.config.max_concurrency),
            Arc::new(executor),
            event_tx,
        );
        Execution {
            graph,
            handoffs,
            scheduler,
        }
    }

    /// One scheduler pass, over the whole graph or the given targets. Each
    /// handoff published by the pass is journaled.
    async fn execute_pass(
        &self,
        execution: &Execution,
        targets: Option<&[TaskId]>,
        guidance: &HashMap<TaskId, String>,
        journal: &Journal,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        let report = match targets {
            None => execution.scheduler.run(cancel).await?,
            Some(targets) => execution.scheduler.run_scoped(targets, guidance, cancel).await?,
        };
        for id in &report.approved {
            if let Some(handoff) = execution.handoffs.latest(id).await {
                journal
                    .record(
                        JournalTag::Handoff,
                        &format!("{} revision {}", id, handoff.revision),
                        &handoff.to_markdown(),
                    )
                    .await;
            }
        }
        ensure_running(&report, cancel)?;
        Ok(report)
    }

    /// Raise one escalation gate per blocked task. Revised tasks are re-run
    /// with the human's guidance together with their halted successors.
    async fn resolve_escalations(
        &self,
        state: &mut PipelineState,
        execution: &Execution,
        report: &mut ExecutionReport,
        journal: &Journal,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut accepted: HashSet<TaskId> = HashSet::new();

        for round in 1..=self.config.max_escalation_rounds {
            let pending: Vec<_> = report
                .blocked
                .iter()
                .filter(|blocked| !accepted.contains(&blocked.task_id))
                .cloned()
                .collect();
            if pending.is_empty() {
                break;
            }
            sflog!("Escalation round {}: {} blocked task(s)", round, pending.len());

            let mut targets = Vec::new();
            let mut guidance = HashMap::new();
            for blocked in pending {
                let kind = GateKind::Escalation {
                    task_id: blocked.task_id.clone(),
                };
                let mut reasons = vec![blocked.reason.clone()];
                reasons.extend(blocked.unresolved.iter().map(|issue| format!("unresolved: {}", issue)));
                reasons.extend(
                    halted_behind(&report.halted, &blocked.task_id)
                        .map(|id| format!("halted successor: {}", id)),
                );
                let request = GateRequest::new(
                    kind.clone(),
                    format!("Task {} is blocked", blocked.task_id),
                    blocked.history.join("\n"),
                )
                .with_reasons(reasons);
                journal
                    .record_list(JournalTag::Escalation, blocked.task_id.as_str(), &request.reasons)
                    .await;

                state.open_gate(kind.clone());
                let decision = self.decide(&request, cancel).await?;
                state.close_gate(&kind);

                match decision {
                    GateDecision::Approve => {
                        sflog!("Escalation: block of {} accepted", blocked.task_id);
                        accepted.insert(blocked.task_id);
                    }
                    GateDecision::Revise(feedback) => {
                        journal
                            .record(JournalTag::HumanFeedback, blocked.task_id.as_str(), &feedback)
                            .await;
                        targets.push(blocked.task_id.clone());
                        guidance.insert(blocked.task_id, feedback);
                    }
                }
            }
            if targets.is_empty() {
                break;
            }

            let rerun = self
                .execute_pass(execution, Some(&targets), &guidance, journal, cancel)
                .await?;
            report.merge(rerun);
        }
        Ok(())
    }

    /// Final approval of the aggregate delivery. Returns the number of
    /// rework rounds it took.
    async fn final_approval(
        &self,
        state: &mut PipelineState,
        execution: &Execution,
        report: &mut ExecutionReport,
        journal: &Journal,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        let stage = PipelineStage::FinalApproval.to_string();
        let mut rework_rounds = 0;

        loop {
            let (summary, reasons) = self.delivery_summary(execution, report).await;
            journal.record(JournalTag::Draft, &stage, &summary).await;

            let request = GateRequest::new(GateKind::FinalDelivery, "Final delivery", summary)
                .with_reasons(reasons);
            state.open_gate(GateKind::FinalDelivery);
            let decision = self.decide(&request, cancel).await?;
            state.close_gate(&GateKind::FinalDelivery);

            let feedback = match decision {
                GateDecision::Approve => {
                    journal.record(JournalTag::Approved, &stage, "").await;
                    return Ok(rework_rounds);
                }
                GateDecision::Revise(feedback) => feedback,
            };
            if rework_rounds >= self.config.convergence_cap {
                return Err(Error::ConvergenceCapReached {
                    stage,
                    iterations: rework_rounds,
                });
            }
            rework_rounds += 1;
            journal.record(JournalTag::HumanFeedback, &stage, &feedback).await;

            let mut faults = 0;
            let affected = loop {
                let result = self.triage(execution, &feedback, cancel).await;
                match result {
                    Err(e @ Error::CapabilityExhausted { .. }) => {
                        faults += 1;
                        self.escalate_fault(state, e, faults, journal, cancel).await?
                    }
                    result => break result?,
                }
            };
            sflog!(
                "Final approval: reworking {} (round {})",
                join_ids(&affected),
                rework_rounds
            );
            self.advance(state, PipelineStage::Execute, journal).await?;
            let guidance: HashMap<TaskId, String> = affected
                .iter()
                .map(|id| (id.clone(), feedback.clone()))
                .collect();
            let mut rerun = self
                .execute_pass(execution, Some(&affected), &guidance, journal, cancel)
                .await?;
            self.resolve_escalations(state, execution, &mut rerun, journal, cancel)
                .await?;
            report.merge(rerun);
            self.advance(state, PipelineStage::FinalApproval, journal).await?;
        }
    }

    /// Ask the planner which tasks the feedback affects. Unknown ids are
    /// dropped; an empty answer means every task.
    async fn triage(
        &self,
        execution: &Execution,
        feedback: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskId>> {
        let (order, task_list) = {
            let graph = execution.graph.read().await;
            let list = graph
                .nodes()
                .map(|node| format!("- {}: {} ({})", node.id, node.title, node.status))
                .collect::<Vec<_>>()
                .join("\n");
            (graph.declaration_order(), list)
        };
        let handoffs = execution
            .handoffs
            .snapshot()
            .await
            .iter()
            .map(|handoff| handoff.to_markdown())
            .collect::<Vec<_>>()
            .join("\n");

        let request = CapabilityRequest::new(Purpose::TriageFeedback, prompts::triage_instructions(feedback))
            .with_context("Plan tasks", task_list)
            .with_context("Handoffs", handoffs)
            .with_schema(prompts::affected_tasks_schema());
        let (answer, _) = self
            .invoker
            .invoke_json::<AffectedTasks>(&request, cancel)
            .await?;

        let named: HashSet<TaskId> = answer.affected_task_ids.into_iter().collect();
        let affected: Vec<TaskId> = order.iter().filter(|id| named.contains(*id)).cloned().collect();
        if affected.is_empty() {
            sflog_warn!("Final approval: no known task named by triage, reworking all tasks");
            return Ok(order);
        }
        Ok(affected)
    }

    /// Aggregate of all task outcomes and handoffs, plus the reasons a human
    /// should look closer.
    async fn delivery_summary(
        &self,
        execution: &Execution,
        report: &ExecutionReport,
    ) -> (String, Vec<String>) {
        let mut summary = String::from("# Delivery summary\n\n## Tasks\n\n");
        let mut reasons = Vec::new();
        {
            let graph = execution.graph.read().await;
            for node in graph.nodes() {
                summary.push_str(&format!("- {} {}: {}\n", node.id, node.title, node.status));
            }
        }
        for blocked in &report.blocked {
            reasons.push(format!("task {} blocked: {}", blocked.task_id, blocked.reason));
        }
        for halted in &report.halted {
            reasons.push(format!(
                "task {} not started: {} is blocked",
                halted.task_id, halted.blocked_by
            ));
        }

        summary.push_str("\n## Handoffs\n");
        for handoff in execution.handoffs.snapshot().await {
            for caveat in &handoff.caveats {
                reasons.push(format!("task {} caveat: {}", handoff.task_id, caveat));
            }
            summary.push('\n');
            summary.push_str(&handoff.to_markdown());
        }
        (summary, reasons)
    }

    async fn build_report(
        &self,
        state: &PipelineState,
        execution: &Execution,
        report: &ExecutionReport,
        rework_rounds: u32,
    ) -> PipelineReport {
        let handoffs = execution.handoffs.snapshot().await;
        let graph = execution.graph.read().await;
        let tasks: Vec<TaskReport> = graph
            .nodes()
            .map(|node| TaskReport {
                task_id: node.id.clone(),
                title: node.title.clone(),
                status: node.status.clone(),
                attempts: node.attempts,
                halted_by: report
                    .halted
                    .iter()
                    .find(|h| h.task_id == node.id)
                    .map(|h| h.blocked_by.clone()),
                handoff_revision: handoffs
                    .iter()
                    .find(|h| h.task_id == node.id)
                    .map(|h| h.revision),
            })
            .collect();
        let status = if tasks.iter().all(|task| task.status.is_approved()) {
            PipelineStatus::Completed
        } else {
            PipelineStatus::CompletedWithBlockedTasks
        };

        PipelineReport {
            pipeline_id: state.id(),
            request: state.request().to_string(),
            status,
            requirements: state.requirements().unwrap_or_default().to_string(),
            specification: state.specification().unwrap_or_default().to_string(),
            plan: state.plan().unwrap_or_default().to_string(),
            tasks,
            handoffs: handoffs.iter().map(|h| HandoffArtifact::clone(h)).collect(),
            stage_history: state.stage_history().to_vec(),
            rework_rounds,
            finished_at: Utc::now(),
        }
    }
}

fn ensure_running(report: &ExecutionReport, cancel: &CancellationToken) -> Result<()> {
    if report.was_cancelled || cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn halted_behind<'a>(halted: &'a [HaltedTask], root: &'a TaskId) -> impl Iterator<Item = &'a TaskId> {
    halted
        .iter()
        .filter(move |h| &h.blocked_by == root)
        .map(|h| &h.task_id)
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(TaskId::as_str).collect::<Vec<_>>().join(", ")
}

/// One line per execution level.
pub fn describe_levels(graph: &PlanGraph) -> String {
    graph
        .levels()
        .iter()
        .enumerate()
        .map(|(level, ids)| format!("level {}: {}", level, join_ids(ids)))
        .collect::<Vec<_>>()
        .join("\n")
}
