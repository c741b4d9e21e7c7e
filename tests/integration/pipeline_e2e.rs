//! End-to-end pipeline tests.
//!
//! These tests drive a request through every stage with a scripted
//! capability and scripted human decisions. No real coding sessions run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use specflow::config::{Config, RetryConfig};
use specflow::core::{TaskId, TaskStatus};
use specflow::orchestration::{PipelineController, PipelineReport, Purpose};
use specflow::workflow::{parse_records, GateKind, PipelineStage, PipelineStatus};
use tokio_util::sync::CancellationToken;

use crate::fixtures::{draft, revise, ScriptedCapability, ScriptedGate};

const CHAIN: &[(&str, &[&str])] = &[("A", &[]), ("B", &["A"])];
const FAN_IN: &[(&str, &[&str])] = &[("A", &[]), ("B", &[]), ("C", &["A", "B"])];

fn controller(capability: &Arc<ScriptedCapability>, gate: &Arc<ScriptedGate>) -> PipelineController {
    let config = Config {
        max_concurrency: 2,
        review_cap: 3,
        retry: RetryConfig {
            max_attempts: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 1,
        },
        ..Config::default()
    };
    PipelineController::new(config, capability.clone(), gate.clone())
}

async fn run(
    capability: ScriptedCapability,
    gate: ScriptedGate,
) -> (PipelineReport, Arc<ScriptedCapability>, Arc<ScriptedGate>) {
    let capability = Arc::new(capability);
    let gate = Arc::new(gate);
    let report = controller(&capability, &gate)
        .run("build a todo CLI", &CancellationToken::new())
        .await
        .unwrap();
    (report, capability, gate)
}

fn revision(report: &PipelineReport, task: &str) -> Option<u32> {
    report
        .task(&TaskId::from(task))
        .and_then(|t| t.handoff_revision)
}

fn execute_passes(report: &PipelineReport) -> usize {
    report
        .stage_history
        .iter()
        .filter(|entry| entry.stage == PipelineStage::Execute)
        .count()
}

fn journal_headers(path: &Path) -> Vec<String> {
    let text = std::fs::read_to_string(path).unwrap();
    parse_records(&text).into_iter().map(|(header, _)| header).collect()
}

/// Test: Happy path
/// Given a request that needs one clarifying question
/// When the pipeline runs with every gate approving
/// Then it completes, writes its report and journals each stage in order
#[tokio::test]
async fn test_happy_path_writes_report_and_journal() {
    let output = tempfile::tempdir().unwrap();
    let questions = json!({
        "response_type": "clarifying_questions",
        "questions": ["Which database?"]
    })
    .to_string();
    let capability = Arc::new(
        ScriptedCapability::new()
            .with_drafts(Purpose::Clarify, &[questions, draft("todo CLI backed by sqlite")])
            .with_plan(&[("T1", &[])]),
    );
    let gate = Arc::new(ScriptedGate::new());

    let report = controller(&capability, &gate)
        .with_output_dir(output.path().to_path_buf())
        .run("build a todo CLI", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PipelineStatus::Completed);
    assert_eq!(report.requirements, "todo CLI backed by sqlite");
    assert_eq!(report.specification, "draft_spec v1");
    assert_eq!(report.plan, "draft_plan v1");
    assert_eq!(report.rework_rounds, 0);
    assert_eq!(gate.questions(), vec!["Which database?".to_string()]);

    let stages: Vec<PipelineStage> = report.stage_history.iter().map(|e| e.stage).collect();
    assert_eq!(
        stages,
        vec![
            PipelineStage::Clarify,
            PipelineStage::Specify,
            PipelineStage::Plan,
            PipelineStage::Execute,
            PipelineStage::FinalApproval,
            PipelineStage::Done,
        ]
    );

    let run_dir = output.path().join(report.pipeline_id.short());
    let saved = PipelineReport::load(&run_dir.join("report.json")).unwrap();
    assert_eq!(saved.pipeline_id, report.pipeline_id);
    assert_eq!(saved.handoffs.len(), 1);
    assert_eq!(saved.handoffs[0].objective, "T1 done");

    let headers = journal_headers(&run_dir.join("journal.md"));
    let expected = [
        "USER_REQUEST",
        "CLARIFYING_QUESTIONS clarify",
        "ANSWERS clarify",
        "APPROVED clarify",
        "APPROVED specify",
        "APPROVED plan",
        "TASK_GRAPH",
        "HANDOFF T1 revision 1",
        "APPROVED final_approval",
    ];
    let mut cursor = 0;
    for header in expected {
        let found = headers[cursor..]
            .iter()
            .position(|h| h == header)
            .unwrap_or_else(|| panic!("missing journal record {:?} in {:?}", header, headers));
        cursor += found + 1;
    }
    assert_eq!(
        headers.iter().filter(|h| *h == "STAGE_TRANSITION").count(),
        5
    );
}

/// Test: Specification revision
/// Given a human who asks for a change to the first specification draft
/// Then the drafter redrafts in the same session with the feedback
#[tokio::test]
async fn test_spec_revision_continues_drafting_session() {
    let gate = ScriptedGate::new().deciding(GateKind::Specification, vec![revise("add auth")]);

    let (report, capability, gate) = run(ScriptedCapability::new(), gate).await;

    assert_eq!(report.specification, "draft_spec v2");
    assert_eq!(gate.requests_for(&GateKind::Specification).len(), 2);

    let drafts: Vec<_> = capability
        .requests()
        .into_iter()
        .filter(|r| r.purpose == Purpose::DraftSpec)
        .collect();
    assert_eq!(drafts.len(), 2);
    assert!(drafts[0].resume_session.is_none());
    assert!(drafts[1].instructions.contains("add auth"));
    assert_eq!(drafts[1].resume_session.as_deref(), Some("session-draft_spec"));
}

/// Test: Invalid plan graph
/// Given an approved plan whose tasks form a cycle
/// Then the plan is redrafted with the defect and approved again
#[tokio::test]
async fn test_cyclic_plan_is_sent_back_to_planner() {
    let capability = ScriptedCapability::new()
        .with_plan(&[("A", &["B"]), ("B", &["A"])])
        .with_plan(&[("A", &[])]);

    let (report, capability, gate) = run(capability, ScriptedGate::new()).await;

    assert_eq!(report.status, PipelineStatus::Completed);
    assert_eq!(report.plan, "draft_plan v2");
    assert_eq!(report.tasks.len(), 1);
    assert_eq!(gate.requests_for(&GateKind::DevelopmentPlan).len(), 2);

    let drafts: Vec<_> = capability
        .requests()
        .into_iter()
        .filter(|r| r.purpose == Purpose::DraftPlan)
        .collect();
    assert_eq!(drafts.len(), 2);
    assert!(drafts[1].instructions.contains("dependency cycle"));
}

/// Test: Escalation with guidance
/// Given A blocked on its first attempt and B waiting on A
/// When the human answers the escalation with guidance
/// Then A and B run again and the pipeline completes
#[tokio::test]
async fn test_escalation_revise_reruns_task_and_successors() {
    let capability = ScriptedCapability::new()
        .with_plan(CHAIN)
        .with_blocked_implementation("A");
    let escalation = GateKind::Escalation {
        task_id: TaskId::from("A"),
    };
    let gate = ScriptedGate::new().deciding(escalation.clone(), vec![revise("use the staging key")]);

    let (report, capability, gate) = run(capability, gate).await;

    let requests = gate.requests_for(&escalation);
    assert_eq!(requests.len(), 1);
    assert!(requests[0]
        .reasons
        .contains(&"unresolved: implementation blocked: missing credentials".to_string()));
    assert!(requests[0].reasons.contains(&"halted successor: B".to_string()));

    assert_eq!(report.status, PipelineStatus::Completed);
    assert_eq!(report.task(&TaskId::from("A")).unwrap().attempts, 2);
    assert_eq!(revision(&report, "A"), Some(1));
    assert_eq!(revision(&report, "B"), Some(1));

    let implements = capability.requests_for(Purpose::Implement, "A");
    assert!(implements[1].instructions.contains("use the staging key"));
}

/// Test: Accepted escalation
/// Given A blocked and the human accepting the block
/// Then the run completes with blocked tasks and B halted behind A
#[tokio::test]
async fn test_accepted_escalation_completes_with_blocked_tasks() {
    let capability = ScriptedCapability::new()
        .with_plan(CHAIN)
        .with_blocked_implementation("A");

    let (report, _capability, gate) = run(capability, ScriptedGate::new()).await;

    assert_eq!(report.status, PipelineStatus::CompletedWithBlockedTasks);
    let a = report.task(&TaskId::from("A")).unwrap();
    assert!(matches!(a.status, TaskStatus::Blocked { .. }));
    let b = report.task(&TaskId::from("B")).unwrap();
    assert_eq!(b.status, TaskStatus::Pending);
    assert_eq!(b.halted_by, Some(TaskId::from("A")));
    assert!(report.handoffs.is_empty());

    let escalations = gate.requests_for(&GateKind::Escalation {
        task_id: TaskId::from("A"),
    });
    assert_eq!(escalations.len(), 1);

    let finals = gate.requests_for(&GateKind::FinalDelivery);
    assert_eq!(finals.len(), 1);
    assert!(finals[0].reasons.iter().any(|r| r.starts_with("task A blocked:")));
    assert!(finals[0]
        .reasons
        .contains(&"task B not started: A is blocked".to_string()));
}

/// Test: Final approval rework
/// Given an executed fan-in plan and final feedback that triage maps to A
/// Then A and its successor C are redone while B keeps its handoff
#[tokio::test]
async fn test_final_rework_reruns_affected_tasks() {
    let capability = ScriptedCapability::new()
        .with_plan(FAN_IN)
        .with_triage(&["A"]);
    let gate = ScriptedGate::new().deciding(
        GateKind::FinalDelivery,
        vec![revise("A must validate input")],
    );

    let (report, capability, gate) = run(capability, gate).await;

    assert_eq!(report.status, PipelineStatus::Completed);
    assert_eq!(report.rework_rounds, 1);
    assert_eq!(revision(&report, "A"), Some(2));
    assert_eq!(revision(&report, "B"), Some(1));
    assert_eq!(revision(&report, "C"), Some(2));
    assert_eq!(execute_passes(&report), 2);
    assert_eq!(gate.requests_for(&GateKind::FinalDelivery).len(), 2);

    let implements = capability.requests_for(Purpose::Implement, "A");
    assert!(implements[1].instructions.contains("A must validate input"));
    assert_eq!(capability.requests_for(Purpose::Implement, "B").len(), 1);
}

/// Test: Final approval rework without a usable triage answer
/// Then every task is redone
#[tokio::test]
async fn test_final_rework_with_empty_triage_reruns_everything() {
    let capability = ScriptedCapability::new().with_plan(FAN_IN);
    let gate = ScriptedGate::new().deciding(GateKind::FinalDelivery, vec![revise("start over")]);

    let (report, capability, _gate) = run(capability, gate).await;

    assert_eq!(capability.count(Purpose::TriageFeedback), 1);
    for task in ["A", "B", "C"] {
        assert_eq!(revision(&report, task), Some(2), "task {}", task);
    }
}

/// Test: Cancelled before the first stage
#[tokio::test]
async fn test_precancelled_run_does_nothing() {
    let capability = Arc::new(ScriptedCapability::new());
    let gate = Arc::new(ScriptedGate::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = controller(&capability, &gate)
        .run("build a todo CLI", &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(capability.requests().is_empty());
}

/// Test: Cancelled during execution
/// Given a task whose session never finishes
/// When the run is cancelled
/// Then the pipeline stops with a cancellation error
#[tokio::test]
async fn test_cancel_during_execution() {
    let capability = Arc::new(ScriptedCapability::new().hanging("T1"));
    let gate = Arc::new(ScriptedGate::new());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = controller(&capability, &gate)
        .run("build a todo CLI", &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(gate.requests_for(&GateKind::FinalDelivery).is_empty());
}

/// Test: Drafting stage fault, retried
/// Given a specification drafter that fails past its retries once
/// When the human asks for a retry at the stage fault gate
/// Then the stage is drafted again and the run completes
#[tokio::test]
async fn test_stage_fault_retry_recovers() {
    let capability = ScriptedCapability::new().failing_drafts(Purpose::DraftSpec, 2);
    let fault = GateKind::StageFault {
        stage: PipelineStage::Specify,
    };
    let gate = ScriptedGate::new().deciding(fault.clone(), vec![revise("try again")]);

    let (report, capability, gate) = run(capability, gate).await;

    assert_eq!(report.status, PipelineStatus::Completed);
    assert_eq!(report.specification, "draft_spec v1");
    assert_eq!(capability.count(Purpose::DraftSpec), 3);

    let requests = gate.requests_for(&fault);
    assert_eq!(requests.len(), 1);
    assert!(requests[0].reasons[0].contains("draft_spec backend down"));
}

/// Test: Drafting stage fault, accepted
/// Given a planner that fails past its retries
/// When the human accepts the fault
/// Then the run stops with the capability failure
#[tokio::test]
async fn test_stage_fault_accepted_stops_run() {
    let capability = Arc::new(ScriptedCapability::new().failing_drafts(Purpose::DraftPlan, 2));
    let gate = Arc::new(ScriptedGate::new());

    let err = controller(&capability, &gate)
        .run("build a todo CLI", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, specflow::Error::CapabilityExhausted { .. }));
    let fault = GateKind::StageFault {
        stage: PipelineStage::Plan,
    };
    assert_eq!(gate.requests_for(&fault).len(), 1);
    assert_eq!(capability.count(Purpose::ExtractTasks), 0);
}

/// Test: Stage fault retries are bounded
/// Given a drafter that never recovers and a human who keeps retrying
/// Then the run stops after the allowed escalation rounds
#[tokio::test]
async fn test_stage_fault_retries_are_bounded() {
    let capability = Arc::new(ScriptedCapability::new().failing_drafts(Purpose::Clarify, 100));
    let fault = GateKind::StageFault {
        stage: PipelineStage::Clarify,
    };
    let gate = Arc::new(
        ScriptedGate::new().deciding(fault.clone(), (0..5).map(|_| revise("again")).collect()),
    );

    let err = controller(&capability, &gate)
        .run("build a todo CLI", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, specflow::Error::CapabilityExhausted { .. }));
    // Default max_escalation_rounds is 2.
    assert_eq!(gate.requests_for(&fault).len(), 2);
    assert_eq!(capability.count(Purpose::Clarify), 6);
}
