//! Scheduling correctness tests.
//!
//! These tests verify level ordering, the concurrency bound, FIFO admission,
//! partial-failure isolation and handoff-only context.

use std::time::Duration;

use specflow::core::{TaskId, TaskStatus};
use specflow::orchestration::{ExecutorSettings, Purpose, SchedulerEvent};
use specflow::workflow::GateKind;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{
    approved, major, minor, position, started, ExecutionHarness, ScriptedCapability, ScriptedGate,
};

const FAN_IN: &[(&str, &[&str])] = &[("A", &[]), ("B", &[]), ("C", &["A", "B"])];

/// Test: Fan-in with a single session slot
/// Given {A: [], B: [], C: [A, B]} and concurrency 1
/// When the scheduler runs
/// Then A starts before B, and C starts only after both are approved
#[tokio::test]
async fn test_fan_in_respects_levels_and_fifo() {
    let capability = ScriptedCapability::new().with_delay(Duration::from_millis(5));
    let mut harness = ExecutionHarness::with_settings(
        FAN_IN,
        capability,
        Default::default(),
        1,
        Default::default(),
    );

    let report = harness.scheduler.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        report.started,
        vec![TaskId::from("A"), TaskId::from("B"), TaskId::from("C")]
    );
    assert!(report.is_clean());
    assert_eq!(harness.capability.max_concurrent(), 1);

    let events = harness.events();
    assert!(position(&events, started("A")) < position(&events, started("B")));
    assert!(position(&events, approved("A")) < position(&events, started("C")));
    assert!(position(&events, approved("B")) < position(&events, started("C")));
    assert!(matches!(
        events.last(),
        Some(SchedulerEvent::AllSettled {
            approved: 3,
            blocked: 0,
            halted: 0
        })
    ));
}

/// Test: Concurrency bound
/// Given 4 independent tasks and concurrency 2
/// When the scheduler runs
/// Then never more than 2 sessions work at once, and both slots get used
#[tokio::test]
async fn test_concurrency_is_bounded() {
    let tasks: &[(&str, &[&str])] = &[("A", &[]), ("B", &[]), ("C", &[]), ("D", &[])];
    let capability = ScriptedCapability::new().with_delay(Duration::from_millis(20));
    let harness = ExecutionHarness::with_settings(
        tasks,
        capability,
        Default::default(),
        2,
        Default::default(),
    );

    let report = harness.scheduler.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.approved.len(), 4);
    assert_eq!(harness.capability.max_concurrent(), 2);
    assert_eq!(harness.scheduler.pool().active_count(), 0);
}

/// Test: Blocked branch isolation
/// Given A -> C and an independent B -> D, where A escalates
/// When the scheduler runs
/// Then C is halted behind A while B and D are approved
#[tokio::test]
async fn test_blocked_branch_does_not_stop_independent_branch() {
    let tasks: &[(&str, &[&str])] = &[("A", &[]), ("B", &[]), ("C", &["A"]), ("D", &["B"])];
    let capability = ScriptedCapability::new().with_blocked_implementation("A");
    let mut harness = ExecutionHarness::new(tasks, capability);

    let report = harness.scheduler.run(&CancellationToken::new()).await.unwrap();

    assert!(matches!(harness.status("A").await, TaskStatus::Blocked { .. }));
    assert_eq!(harness.status("C").await, TaskStatus::Pending);
    assert!(harness.status("B").await.is_approved());
    assert!(harness.status("D").await.is_approved());

    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.blocked[0].task_id, TaskId::from("A"));
    assert!(report.blocked[0].unresolved[0].contains("missing credentials"));
    assert_eq!(report.halted.len(), 1);
    assert_eq!(report.halted[0].task_id, TaskId::from("C"));
    assert_eq!(report.halted[0].blocked_by, TaskId::from("A"));

    let events = harness.events();
    assert!(events.contains(&SchedulerEvent::TaskHalted {
        task_id: TaskId::from("C"),
        blocked_by: TaskId::from("A"),
    }));
    assert!(harness.capability.requests_for(Purpose::Implement, "C").is_empty());
}

/// Test: Halting reaches past the first successor
/// Given a chain A -> B -> C where A escalates on review
/// Then B and C are both halted behind A
#[tokio::test]
async fn test_halt_propagates_to_transitive_successors() {
    let tasks: &[(&str, &[&str])] = &[("A", &[]), ("B", &["A"]), ("C", &["B"])];
    let escalate = serde_json::json!({ "review_result": "ESCALATE", "issues": ["needs a product decision"] })
        .to_string();
    let capability = ScriptedCapability::new().with_reviews("A", &[escalate]);
    let harness = ExecutionHarness::new(tasks, capability);

    let report = harness.scheduler.run(&CancellationToken::new()).await.unwrap();

    let halted: Vec<(&str, &str)> = report
        .halted
        .iter()
        .map(|h| (h.task_id.as_str(), h.blocked_by.as_str()))
        .collect();
    assert_eq!(halted, vec![("B", "A"), ("C", "A")]);
    assert_eq!(
        report.blocked[0].unresolved,
        vec!["needs a product decision".to_string()]
    );
}

/// Test: Capability exhaustion blocks only the task
/// Given a task whose capability calls always fail
/// Then it is blocked with the failure as reason and its sibling is approved
#[tokio::test]
async fn test_capability_exhaustion_blocks_task() {
    let tasks: &[(&str, &[&str])] = &[("A", &[]), ("B", &[])];
    let capability = ScriptedCapability::new().failing("A");
    let harness = ExecutionHarness::new(tasks, capability);

    let report = harness.scheduler.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.blocked.len(), 1);
    assert!(report.blocked[0].reason.contains("backend down"));
    // Two attempts with the harness retry policy.
    assert_eq!(harness.capability.requests_for(Purpose::Implement, "A").len(), 2);
    assert!(harness.status("B").await.is_approved());
}

/// Test: Successor context
/// Given the fan-in plan plus an unrelated task U
/// Then C's sessions see the handoffs of A and B in declaration order and nothing of U
#[tokio::test]
async fn test_successor_context_is_predecessor_handoffs() {
    let tasks: &[(&str, &[&str])] = &[("A", &[]), ("U", &[]), ("B", &[]), ("C", &["A", "B"])];
    let harness = ExecutionHarness::new(tasks, ScriptedCapability::new());

    harness.scheduler.run(&CancellationToken::new()).await.unwrap();

    let request = &harness.capability.requests_for(Purpose::Implement, "C")[0];
    let labels: Vec<&str> = request.context.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            "Approved specification",
            "Approved development plan",
            "Handoff from task A",
            "Handoff from task B",
        ]
    );
    assert!(request.context[2].body.contains("# Objective\n\nA done"));
    assert!(request
        .context
        .iter()
        .all(|d| !d.body.contains("implement A")));
}

/// Test: Cancellation
/// Given a task that never finishes and a successor
/// When the pipeline is cancelled mid-run
/// Then the running task is cancelled, its successor never starts, and no handoff exists
#[tokio::test]
async fn test_cancellation_stops_running_sessions() {
    let tasks: &[(&str, &[&str])] = &[("A", &[]), ("B", &["A"])];
    let capability = ScriptedCapability::new().hanging("A");
    let mut harness = ExecutionHarness::new(tasks, capability);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let report = harness.scheduler.run(&cancel).await.unwrap();

    assert!(report.was_cancelled);
    assert_eq!(report.cancelled, vec![TaskId::from("A")]);
    assert_eq!(harness.status("A").await, TaskStatus::Cancelled);
    assert_eq!(harness.status("B").await, TaskStatus::Pending);
    assert!(harness.handoffs.latest(&TaskId::from("A")).await.is_none());
    assert_eq!(harness.scheduler.pool().active_count(), 0);

    let events = harness.events();
    assert!(events.contains(&SchedulerEvent::TaskCancelled {
        task_id: TaskId::from("A")
    }));
    assert!(!events.iter().any(started("B")));
}

/// Test: Scoped re-run
/// Given an executed fan-in plan
/// When A is re-run
/// Then A and C get a second handoff revision and B is untouched
#[tokio::test]
async fn test_scoped_rerun_reopens_downstream_only() {
    let harness = ExecutionHarness::new(FAN_IN, ScriptedCapability::new());
    let cancel = CancellationToken::new();
    harness.scheduler.run(&cancel).await.unwrap();
    let first_a = harness.handoffs.latest(&TaskId::from("A")).await.unwrap();

    let guidance = [(TaskId::from("A"), "use the new schema".to_string())]
        .into_iter()
        .collect();
    let report = harness
        .scheduler
        .run_scoped(&[TaskId::from("A")], &guidance, &cancel)
        .await
        .unwrap();

    assert_eq!(report.started, vec![TaskId::from("A"), TaskId::from("C")]);
    assert_eq!(harness.handoffs.revision_count(&TaskId::from("A")).await, 2);
    assert_eq!(harness.handoffs.revision_count(&TaskId::from("B")).await, 1);
    assert_eq!(harness.handoffs.revision_count(&TaskId::from("C")).await, 2);

    // Revision 1 is never mutated.
    let still_first = harness.handoffs.get(&TaskId::from("A"), 1).await.unwrap();
    assert_eq!(*still_first, *first_a);

    let reruns = harness.capability.requests_for(Purpose::Implement, "A");
    assert!(reruns[1].instructions.contains("use the new schema"));
    assert!(!harness.capability.requests_for(Purpose::Implement, "C")[1]
        .instructions
        .contains("use the new schema"));
}

/// Test: Unknown task in a scoped re-run is rejected
#[tokio::test]
async fn test_scoped_rerun_unknown_task() {
    let harness = ExecutionHarness::new(FAN_IN, ScriptedCapability::new());
    let err = harness
        .scheduler
        .run_scoped(&[TaskId::from("Z")], &Default::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, specflow::Error::TaskNotFound(_)));
}

/// Test: A major review issue on the last allowed round blocks the task
#[tokio::test]
async fn test_major_issue_blocks_without_halting_sibling() {
    let tasks: &[(&str, &[&str])] = &[("A", &[]), ("B", &[])];
    let reviews: Vec<String> = (1..=5).map(|i| major(&format!("no tests (round {})", i))).collect();
    let capability = ScriptedCapability::new().with_reviews("A", &reviews);
    let harness = ExecutionHarness::new(tasks, capability);

    let report = harness.scheduler.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.blocked[0].history.len(), 5);
    assert!(report.halted.is_empty());
    assert!(harness.status("B").await.is_approved());
}

/// Test: A gate failure inside one session stays in its branch
/// Given A and B running side by side, where A's acknowledgement gate errors
///   while B still has calls in flight
/// Then A is blocked, B still runs to approval, and the pass completes
#[tokio::test]
async fn test_gate_failure_does_not_abort_sibling() {
    let tasks: &[(&str, &[&str])] = &[("A", &[]), ("B", &[])];
    let capability = ScriptedCapability::new()
        .with_delay(Duration::from_millis(20))
        .with_reviews("A", &[minor("nit")]);
    let gate = ScriptedGate::new().failing(GateKind::AutoAccept {
        task_id: TaskId::from("A"),
    });
    let mut harness = ExecutionHarness::with_settings(
        tasks,
        capability,
        gate,
        2,
        ExecutorSettings {
            review_cap: 1,
            acknowledge_auto_accept: true,
        },
    );

    let report = harness.scheduler.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.blocked[0].task_id, TaskId::from("A"));
    assert!(report.blocked[0].reason.contains("stdin closed"));
    assert_eq!(report.approved, vec![TaskId::from("B")]);
    assert!(harness.status("B").await.is_approved());
    assert!(harness.graph.read().await.all_terminal());
    assert!(matches!(
        harness.events().last(),
        Some(SchedulerEvent::AllSettled {
            approved: 1,
            blocked: 1,
            halted: 0
        })
    ));
}
