//! Scheduler for parallel task execution.
//!
//! The Scheduler walks the plan graph level by level. Within a level, tasks
//! whose predecessors are all approved are admitted to the session pool in
//! plan-declaration order and run concurrently; the next level starts only
//! when every task in the current one has settled. A task with a blocked,
//! cancelled or halted predecessor is halted: it stays pending and is
//! reported with the blocked ancestor that stopped it, while independent
//! branches carry on.

use crate::core::dag::PlanGraph;
use crate::core::task::{TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::pool::SessionPool;
use crate::orchestration::session::{TaskExecutor, TaskOutcome};
use crate::{sflog, sflog_debug, sflog_error};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Events emitted for task lifecycle changes.
///
/// These allow an observer to follow progress without polling the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// All predecessors approved; waiting for a session slot.
    TaskReady { task_id: TaskId },
    /// A session slot was granted and the coding session began.
    TaskStarted { task_id: TaskId, session_id: Uuid },
    TaskInReview { task_id: TaskId, iteration: u32 },
    TaskApproved { task_id: TaskId, auto_accepted: bool },
    TaskBlocked {
        task_id: TaskId,
        reason: String,
        unresolved: Vec<String>,
    },
    /// Not started because `blocked_by` did not reach approval.
    TaskHalted { task_id: TaskId, blocked_by: TaskId },
    TaskCancelled { task_id: TaskId },
    LevelComplete { level: usize },
    /// Every task in scope is terminal or halted.
    AllSettled {
        approved: usize,
        blocked: usize,
        halted: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub task_id: TaskId,
    pub reason: String,
    pub unresolved: Vec<String>,
    pub history: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltedTask {
    pub task_id: TaskId,
    pub blocked_by: TaskId,
}

/// What one execution pass did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Tasks in the order they were admitted.
    pub started: Vec<TaskId>,
    pub approved: Vec<TaskId>,
    pub auto_accepted: Vec<TaskId>,
    pub blocked: Vec<BlockedTask>,
    pub halted: Vec<HaltedTask>,
    pub cancelled: Vec<TaskId>,
    pub was_cancelled: bool,
}

impl ExecutionReport {
    pub fn is_clean(&self) -> bool {
        self.blocked.is_empty() && self.halted.is_empty() && self.cancelled.is_empty()
    }

    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Approved {
                task_id,
                auto_accepted,
                ..
            } => {
                if auto_accepted {
                    self.auto_accepted.push(task_id.clone());
                }
                self.approved.push(task_id);
            }
            TaskOutcome::Blocked {
                task_id,
                reason,
                unresolved,
                history,
            } => self.blocked.push(BlockedTask {
                task_id,
                reason,
                unresolved,
                history,
            }),
            TaskOutcome::Cancelled { task_id } => self.cancelled.push(task_id),
        }
    }

    /// Fold a later pass into this one. Entries for re-run tasks are replaced.
    pub fn merge(&mut self, later: ExecutionReport) {
        let rerun: HashSet<TaskId> = later
            .started
            .iter()
            .chain(later.halted.iter().map(|h| &h.task_id))
            .cloned()
            .collect();
        self.approved.retain(|id| !rerun.contains(id));
        self.auto_accepted.retain(|id| !rerun.contains(id));
        self.blocked.retain(|b| !rerun.contains(&b.task_id));
        self.halted.retain(|h| !rerun.contains(&h.task_id));
        self.cancelled.retain(|id| !rerun.contains(id));

        self.started.extend(later.started);
        self.approved.extend(later.approved);
        self.auto_accepted.extend(later.auto_accepted);
        self.blocked.extend(later.blocked);
        self.halted.extend(later.halted);
        self.cancelled.extend(later.cancelled);
        self.was_cancelled |= later.was_cancelled;
    }
}

/// Scheduler for parallel task execution.
///
/// # Example
///
/// ```ignore
/// let (event_tx, mut event_rx) = mpsc::unbounded_channel();
/// let executor = Arc::new(TaskExecutor::new(graph.clone(), store, invoker, gate, context, settings, event_tx.clone()));
/// let scheduler = Scheduler::new(graph, SessionPool::new(4), executor, event_tx);
/// let report = scheduler.run(&cancel).await?;
/// ```
pub struct Scheduler {
    graph: Arc<RwLock<PlanGraph>>,
    pool: SessionPool,
    executor: Arc<TaskExecutor>,
    event_tx: mpsc::UnboundedSender<SchedulerEvent>,
}

impl Scheduler {
    pub fn new(
        graph: Arc<RwLock<PlanGraph>>,
        pool: SessionPool,
        executor: Arc<TaskExecutor>,
        event_tx: mpsc::UnboundedSender<SchedulerEvent>,
    ) -> Self {
        Self {
            graph,
            pool,
            executor,
            event_tx,
        }
    }

    pub fn graph(&self) -> &Arc<RwLock<PlanGraph>> {
        &self.graph
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Execute every pending task in the graph.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ExecutionReport> {
        let scope: HashSet<TaskId> = {
            let graph = self.graph.read().await;
            graph
                .nodes()
                .filter(|node| node.can_start())
                .map(|node| node.id.clone())
                .collect()
        };
        self.execute(&scope, &HashMap::new(), cancel).await
    }

    /// Re-execute `targets` and everything downstream of them.
    ///
    /// Targets are reopened whatever their state. Downstream tasks are
    /// reopened too so they rebuild against the new handoffs. `guidance`
    /// is passed to the sessions of the tasks it names.
    pub async fn run_scoped(
        &self,
        targets: &[TaskId],
        guidance: &HashMap<TaskId, String>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        let scope = {
            let mut graph = self.graph.write().await;
            let mut scope = HashSet::new();
            for target in targets {
                if !graph.contains_task(target) {
                    return Err(Error::TaskNotFound(target.clone()));
                }
                scope.insert(target.clone());
                scope.extend(graph.transitive_successors(target));
            }
            for id in &scope {
                graph.require_mut(id)?.reopen();
            }
            scope
        };
        sflog!("Scheduler: re-running {} task(s)", scope.len());
        self.execute(&scope, guidance, cancel).await
    }

    async fn execute(
        &self,
        scope: &HashSet<TaskId>,
        guidance: &HashMap<TaskId, String>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        // Halted task -> the blocked ancestor that stopped it.
        let mut halted_by: HashMap<TaskId, TaskId> = HashMap::new();
        let levels = self.graph.read().await.levels().to_vec();

        for (level, ids) in levels.iter().enumerate() {
            let ids: Vec<&TaskId> = ids.iter().filter(|id| scope.contains(*id)).collect();
            if ids.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                report.was_cancelled = true;
                break;
            }

            let mut running = JoinSet::new();
            for id in ids {
                if let Some(root) = self.halting_ancestor(id, &halted_by).await {
                    sflog!("Scheduler: {} halted by {}", id, root);
                    self.emit(SchedulerEvent::TaskHalted {
                        task_id: id.clone(),
                        blocked_by: root.clone(),
                    });
                    report.halted.push(HaltedTask {
                        task_id: id.clone(),
                        blocked_by: root.clone(),
                    });
                    halted_by.insert(id.clone(), root);
                    continue;
                }

                self.graph.write().await.require_mut(id)?.mark_ready();
                self.emit(SchedulerEvent::TaskReady {
                    task_id: id.clone(),
                });

                let session = match self.pool.acquire(id, cancel).await {
                    Ok(session) => session,
                    Err(Error::Cancelled) => {
                        self.graph.write().await.require_mut(id)?.cancel();
                        self.emit(SchedulerEvent::TaskCancelled {
                            task_id: id.clone(),
                        });
                        report.cancelled.push(id.clone());
                        report.was_cancelled = true;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                sflog_debug!("Scheduler: admitted {} at level {}", id, level);
                report.started.push(id.clone());
                let executor = Arc::clone(&self.executor);
                let task_id = id.clone();
                let task_guidance = guidance.get(id).cloned();
                let task_cancel = cancel.child_token();
                running.spawn(async move {
                    executor
                        .run(task_id, task_guidance, session, task_cancel)
                        .await
                });
            }

            // Every sibling settles before a failure is surfaced.
            let mut failure = None;
            while let Some(joined) = running.join_next().await {
                match joined.map_err(|e| Error::TaskJoin(e.to_string())).and_then(|r| r) {
                    Ok(outcome) => report.record(outcome),
                    Err(e) => {
                        sflog_error!("Scheduler: task at level {} failed: {}", level, e);
                        failure.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }
            self.emit(SchedulerEvent::LevelComplete { level });
        }

        if cancel.is_cancelled() {
            report.was_cancelled = true;
        }
        self.emit(SchedulerEvent::AllSettled {
            approved: report.approved.len(),
            blocked: report.blocked.len(),
            halted: report.halted.len(),
        });
        sflog!(
            "Scheduler: pass finished ({} approved, {} blocked, {} halted, {} cancelled)",
            report.approved.len(),
            report.blocked.len(),
            report.halted.len(),
            report.cancelled.len()
        );
        Ok(report)
    }

    /// The blocked ancestor that prevents `id` from starting, if any.
    async fn halting_ancestor(
        &self,
        id: &TaskId,
        halted_by: &HashMap<TaskId, TaskId>,
    ) -> Option<TaskId> {
        let graph = self.graph.read().await;
        let blocking = graph.blocking_predecessor(id)?;
        if let Some(root) = halted_by.get(&blocking) {
            return Some(root.clone());
        }
        // A predecessor outside this pass that never ran: follow it upwards.
        let mut current = blocking;
        while matches!(graph.status(&current), Some(TaskStatus::Pending | TaskStatus::Ready)) {
            match graph.blocking_predecessor(&current) {
                Some(next) => current = next,
                None => break,
            }
        }
        Some(current)
    }
}
