//! Test fixtures for integration tests.
//!
//! Provides:
//! - `ScriptedCapability`: answers each request by purpose and subject task
//! - `ScriptedGate`: scripted human decisions per gate
//! - `ExecutionHarness`: graph, executor and scheduler wired together

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};

use specflow::core::{HandoffStore, PlanGraph, PlanTask, TaskId, TaskStatus};
use specflow::orchestration::{
    Capability, CapabilityFailure, CapabilityRequest, ExecutorSettings, GateDecision, GateRequest,
    HumanGate, Invoker, Purpose, RetryPolicy, Scheduler, SchedulerEvent, SessionPool,
    SharedContext, TaskExecutor, TextArtifact,
};
use specflow::workflow::GateKind;
use specflow::{Error, Result};

/// Review response approving the candidate.
pub fn approve() -> String {
    json!({ "review_result": "APPROVED" }).to_string()
}

pub fn minor(issue: &str) -> String {
    json!({ "review_result": "REQUEST_CHANGES", "issues": [issue], "severity": "minor" }).to_string()
}

pub fn major(issue: &str) -> String {
    json!({ "review_result": "REQUEST_CHANGES", "issues": [issue], "severity": "major" }).to_string()
}

/// Drafting response carrying a candidate.
pub fn draft(text: &str) -> String {
    json!({ "response_type": "draft", "draft": text }).to_string()
}

fn extraction(tasks: &[(&str, &[&str])]) -> String {
    let tasks: Vec<PlanTask> = tasks
        .iter()
        .map(|(id, deps)| {
            PlanTask::new(id, deps).with_description(id, &format!("Implement {}", id))
        })
        .collect();
    json!({ "tasks": tasks }).to_string()
}

/// Capability double. Unscripted calls succeed with a canned answer; every
/// request is recorded.
#[derive(Default)]
pub struct ScriptedCapability {
    drafts: Mutex<HashMap<Purpose, VecDeque<String>>>,
    draft_counts: Mutex<HashMap<Purpose, usize>>,
    extractions: Mutex<VecDeque<String>>,
    implementations: Mutex<HashMap<TaskId, VecDeque<String>>>,
    reviews: Mutex<HashMap<TaskId, VecDeque<String>>>,
    failing: Mutex<HashSet<TaskId>>,
    failing_drafts: Mutex<HashMap<Purpose, usize>>,
    hanging: Mutex<HashSet<TaskId>>,
    triage: Mutex<Vec<String>>,
    delay: Duration,
    requests: Mutex<Vec<CapabilityRequest>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each task call sleeps this long, so sessions overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue raw drafting responses for a purpose.
    pub fn with_drafts(self, purpose: Purpose, responses: &[String]) -> Self {
        self.drafts
            .lock()
            .unwrap()
            .entry(purpose)
            .or_default()
            .extend(responses.iter().cloned());
        self
    }

    /// Queue one task-extraction answer.
    pub fn with_plan(self, tasks: &[(&str, &[&str])]) -> Self {
        self.extractions.lock().unwrap().push_back(extraction(tasks));
        self
    }

    pub fn with_reviews(self, task: &str, reviews: &[String]) -> Self {
        self.reviews
            .lock()
            .unwrap()
            .entry(TaskId::from(task))
            .or_default()
            .extend(reviews.iter().cloned());
        self
    }

    /// The coder reports that the task cannot be done.
    pub fn with_blocked_implementation(self, task: &str) -> Self {
        self.implementations
            .lock()
            .unwrap()
            .entry(TaskId::from(task))
            .or_default()
            .push_back(
                json!({ "status": "IMPLEMENTATION_BLOCKED", "report": "missing credentials" })
                    .to_string(),
            );
        self
    }

    /// Every call for this task fails as unavailable.
    pub fn failing(self, task: &str) -> Self {
        self.failing.lock().unwrap().insert(TaskId::from(task));
        self
    }

    /// The next `calls` drafting calls for `purpose` fail as unavailable.
    pub fn failing_drafts(self, purpose: Purpose, calls: usize) -> Self {
        self.failing_drafts.lock().unwrap().insert(purpose, calls);
        self
    }

    /// Calls for this task never return.
    pub fn hanging(self, task: &str) -> Self {
        self.hanging.lock().unwrap().insert(TaskId::from(task));
        self
    }

    pub fn with_triage(self, affected: &[&str]) -> Self {
        *self.triage.lock().unwrap() = affected.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn requests(&self) -> Vec<CapabilityRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, purpose: Purpose, task: &str) -> Vec<CapabilityRequest> {
        let task = TaskId::from(task);
        self.requests()
            .into_iter()
            .filter(|r| r.purpose == purpose && r.subject.as_ref() == Some(&task))
            .collect()
    }

    pub fn count(&self, purpose: Purpose) -> usize {
        self.requests().iter().filter(|r| r.purpose == purpose).count()
    }

    /// Highest number of task calls in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_draft(&self, purpose: Purpose) -> String {
        if let Some(response) = self
            .drafts
            .lock()
            .unwrap()
            .get_mut(&purpose)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }
        let mut counts = self.draft_counts.lock().unwrap();
        let n = counts.entry(purpose).or_default();
        *n += 1;
        draft(&format!("{} v{}", purpose.as_str(), n))
    }

    fn task_response(&self, request: &CapabilityRequest, task: &TaskId) -> String {
        match request.purpose {
            Purpose::Implement | Purpose::Revise => self
                .implementations
                .lock()
                .unwrap()
                .get_mut(task)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    json!({
                        "status": "IMPLEMENTATION_SUCCESS",
                        "report": format!("{} {}", request.purpose.as_str(), task)
                    })
                    .to_string()
                }),
            Purpose::Review => self
                .reviews
                .lock()
                .unwrap()
                .get_mut(task)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(approve),
            _ => json!({
                "objective": format!("{} done", task),
                "decisions": [format!("{} decision", task)],
                "produced_changes": [format!("src/{}.rs", task.as_str().to_lowercase())],
                "caveats": []
            })
            .to_string(),
        }
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    async fn invoke(
        &self,
        request: &CapabilityRequest,
    ) -> std::result::Result<TextArtifact, CapabilityFailure> {
        self.requests.lock().unwrap().push(request.clone());

        let text = match (&request.purpose, &request.subject) {
            (Purpose::ExtractTasks, _) => self
                .extractions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| extraction(&[("T1", &[])])),
            (Purpose::TriageFeedback, _) => {
                let affected = self.triage.lock().unwrap().clone();
                json!({ "affected_task_ids": affected }).to_string()
            }
            (_, Some(task)) => {
                if self.hanging.lock().unwrap().contains(task) {
                    std::future::pending::<()>().await;
                }
                if self.failing.lock().unwrap().contains(task) {
                    return Err(CapabilityFailure::Unavailable(format!("{} backend down", task)));
                }

                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(now, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let response = self.task_response(request, task);
                self.active.fetch_sub(1, Ordering::SeqCst);
                response
            }
            (purpose, None) => {
                if let Some(left) = self.failing_drafts.lock().unwrap().get_mut(purpose) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(CapabilityFailure::Unavailable(format!(
                            "{} backend down",
                            purpose.as_str()
                        )));
                    }
                }
                self.next_draft(*purpose)
            }
        };

        let session = match &request.subject {
            Some(task) => format!("session-{}", task),
            None => format!("session-{}", request.purpose.as_str()),
        };
        Ok(TextArtifact::new(text).with_session_id(session))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Human gate double. Unscripted gates approve.
#[derive(Default)]
pub struct ScriptedGate {
    decisions: Mutex<HashMap<String, VecDeque<GateDecision>>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    requests: Mutex<Vec<GateRequest>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deciding(self, kind: GateKind, decisions: Vec<GateDecision>) -> Self {
        self.decisions
            .lock()
            .unwrap()
            .entry(kind.to_string())
            .or_default()
            .extend(decisions);
        self
    }

    /// This gate fails the way a console gate does when stdin closes.
    pub fn failing(self, kind: GateKind) -> Self {
        self.failing.lock().unwrap().insert(kind.to_string());
        self
    }

    /// This gate never gets an answer.
    pub fn hanging(self, kind: GateKind) -> Self {
        self.hanging.lock().unwrap().insert(kind.to_string());
        self
    }

    pub fn requests(&self) -> Vec<GateRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, kind: &GateKind) -> Vec<GateRequest> {
        self.requests()
            .into_iter()
            .filter(|r| &r.kind == kind)
            .collect()
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

#[async_trait]
impl HumanGate for ScriptedGate {
    async fn decide(&self, request: &GateRequest) -> Result<GateDecision> {
        self.requests.lock().unwrap().push(request.clone());
        let key = request.kind.to_string();
        if self.hanging.lock().unwrap().contains(&key) {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().unwrap().contains(&key) {
            return Err(Error::Validation(
                "stdin closed while waiting for input".to_string(),
            ));
        }
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(GateDecision::Approve))
    }

    async fn answer(&self, questions: &[String]) -> Result<String> {
        self.questions.lock().unwrap().extend(questions.iter().cloned());
        Ok(questions
            .iter()
            .map(|q| format!("Q: {}\nA: yes", q))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

pub fn revise(feedback: &str) -> GateDecision {
    GateDecision::Revise(feedback.to_string())
}

/// Plan graph, executor and scheduler over scripted collaborators.
pub struct ExecutionHarness {
    pub graph: Arc<RwLock<PlanGraph>>,
    pub handoffs: HandoffStore,
    pub scheduler: Scheduler,
    pub event_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    pub capability: Arc<ScriptedCapability>,
    pub gate: Arc<ScriptedGate>,
}

impl ExecutionHarness {
    pub fn new(tasks: &[(&str, &[&str])], capability: ScriptedCapability) -> Self {
        Self::with_settings(tasks, capability, ScriptedGate::new(), 4, ExecutorSettings::default())
    }

    pub fn with_settings(
        tasks: &[(&str, &[&str])],
        capability: ScriptedCapability,
        gate: ScriptedGate,
        concurrency: usize,
        settings: ExecutorSettings,
    ) -> Self {
        let plan: Vec<PlanTask> = tasks
            .iter()
            .map(|(id, deps)| PlanTask::new(id, deps).with_description(id, &format!("Implement {}", id)))
            .collect();
        let graph = Arc::new(RwLock::new(
            PlanGraph::build(plan).expect("test plan must be valid"),
        ));
        let capability = Arc::new(capability);
        let gate = Arc::new(gate);
        let handoffs = HandoffStore::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let executor = TaskExecutor::new(
            Arc::clone(&graph),
            handoffs.clone(),
            Invoker::new(capability.clone(), RetryPolicy::immediate(2)),
            gate.clone(),
            SharedContext {
                specification: "the specification".to_string(),
                plan: "the plan".to_string(),
            },
            settings,
            event_tx.clone(),
        );
        let scheduler = Scheduler::new(
            Arc::clone(&graph),
            SessionPool::new(concurrency),
            Arc::new(executor),
            event_tx,
        );

        Self {
            graph,
            handoffs,
            scheduler,
            event_rx,
            capability,
            gate,
        }
    }

    pub async fn status(&self, task: &str) -> TaskStatus {
        self.graph
            .read()
            .await
            .status(&TaskId::from(task))
            .cloned()
            .expect("task exists")
    }

    /// Events emitted so far.
    pub fn events(&mut self) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Position of the first event matching `pred`.
pub fn position(events: &[SchedulerEvent], pred: impl Fn(&SchedulerEvent) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .expect("expected event was not emitted")
}

pub fn started(task: &str) -> impl Fn(&SchedulerEvent) -> bool + '_ {
    move |e| matches!(e, SchedulerEvent::TaskStarted { task_id, .. } if task_id.as_str() == task)
}

pub fn approved(task: &str) -> impl Fn(&SchedulerEvent) -> bool + '_ {
    move |e| matches!(e, SchedulerEvent::TaskApproved { task_id, .. } if task_id.as_str() == task)
}
