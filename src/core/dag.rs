//! Plan graph (directed acyclic graph) built from an approved plan.
//!
//! The adjacency list arrives from a language-model capability, so it is
//! treated as untrusted input: duplicate identifiers, dangling predecessor
//! references and cycles are all rejected, never repaired. A validated graph
//! is partitioned into execution levels; nodes in the same level have no
//! ordering constraint between them.

use crate::core::task::{TaskId, TaskNode, TaskStatus};
use crate::error::{Error, Result};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// One entry of the plan's adjacency list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTask {
    pub task_id: TaskId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Prerequisite task identifiers.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

impl PlanTask {
    pub fn new(task_id: &str, dependencies: &[&str]) -> Self {
        Self {
            task_id: TaskId::from(task_id),
            title: task_id.to_string(),
            description: String::new(),
            dependencies: dependencies.iter().map(|d| TaskId::from(*d)).collect(),
        }
    }

    pub fn with_description(mut self, title: &str, description: &str) -> Self {
        self.title = title.to_string();
        self.description = description.to_string();
        self
    }
}

/// A plan file: the adjacency list in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanDocument {
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
}

impl PlanDocument {
    /// Load a plan from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            other => Err(Error::Validation(format!(
                "unsupported plan file extension: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }
}

/// Structural defects found while validating a plan graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanGraphError {
    #[error("task {0} is declared more than once")]
    DuplicateTask(TaskId),

    #[error("task {task} depends on unknown task {missing}")]
    UnknownPredecessor { task: TaskId, missing: TaskId },

    #[error("dependency cycle involving {}", join_ids(.involving))]
    Cycle { involving: Vec<TaskId> },
}

impl PlanGraphError {
    /// Tasks named by this defect, for feedback to the planner.
    pub fn tasks(&self) -> Vec<TaskId> {
        match self {
            PlanGraphError::DuplicateTask(id) => vec![id.clone()],
            PlanGraphError::UnknownPredecessor { task, missing } => {
                vec![task.clone(), missing.clone()]
            }
            PlanGraphError::Cycle { involving } => involving.clone(),
        }
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The validated plan graph.
///
/// Edges run from predecessor to successor. Topology is fixed once built;
/// only node status changes afterwards.
pub struct PlanGraph {
    graph: DiGraph<TaskNode, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
    levels: Vec<Vec<TaskId>>,
    level_of: HashMap<TaskId, usize>,
}

impl PlanGraph {
    /// Build and validate a graph from the plan's adjacency list.
    ///
    /// Declaration order of `tasks` is preserved and used as the FIFO
    /// tie-break everywhere the graph enumerates nodes.
    ///
    /// # Errors
    /// `Error::InvalidPlanGraph` on a duplicate identifier, a predecessor
    /// that is not declared, or a cycle (including a self-dependency).
    pub fn build(tasks: Vec<PlanTask>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut task_index = HashMap::new();

        for task in &tasks {
            if task_index.contains_key(&task.task_id) {
                return Err(PlanGraphError::DuplicateTask(task.task_id.clone()).into());
            }
            let mut seen = HashSet::new();
            let predecessors: Vec<TaskId> = task
                .dependencies
                .iter()
                .filter(|dep| seen.insert((*dep).clone()))
                .cloned()
                .collect();
            let node = TaskNode::new(
                task.task_id.clone(),
                &task.title,
                &task.description,
                predecessors,
            );
            let index = graph.add_node(node);
            task_index.insert(task.task_id.clone(), index);
        }

        let edges: Vec<(NodeIndex, NodeIndex)> = {
            let mut edges = Vec::new();
            for index in graph.node_indices() {
                let node = &graph[index];
                for pred in &node.predecessors {
                    let from = task_index.get(pred).ok_or_else(|| {
                        PlanGraphError::UnknownPredecessor {
                            task: node.id.clone(),
                            missing: pred.clone(),
                        }
                    })?;
                    edges.push((*from, index));
                }
            }
            edges
        };
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        let sorted = toposort(&graph, None).map_err(|cycle| PlanGraphError::Cycle {
            involving: cycle_members(&graph, cycle.node_id()),
        })?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for index in &sorted {
            let level = graph
                .neighbors_directed(*index, Direction::Incoming)
                .filter_map(|pred| depth.get(&pred).map(|d| d + 1))
                .max()
                .unwrap_or(0);
            depth.insert(*index, level);
        }

        let level_count = depth.values().max().map(|m| m + 1).unwrap_or(0);
        let mut buckets: Vec<Vec<NodeIndex>> = vec![Vec::new(); level_count];
        for (index, level) in &depth {
            buckets[*level].push(*index);
        }

        let mut levels = Vec::with_capacity(level_count);
        let mut level_of = HashMap::new();
        for (level, mut bucket) in buckets.into_iter().enumerate() {
            bucket.sort_by_key(|index| index.index());
            let ids: Vec<TaskId> = bucket.iter().map(|index| graph[*index].id.clone()).collect();
            for id in &ids {
                level_of.insert(id.clone(), level);
            }
            levels.push(ids);
        }

        Ok(Self {
            graph,
            task_index,
            levels,
            level_of,
        })
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn node(&self, id: &TaskId) -> Option<&TaskNode> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn node_mut(&mut self, id: &TaskId) -> Option<&mut TaskNode> {
        let index = *self.task_index.get(id)?;
        self.graph.node_weight_mut(index)
    }

    /// Like `node_mut` but reports unknown ids as an error.
    pub fn require_mut(&mut self, id: &TaskId) -> Result<&mut TaskNode> {
        self.node_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))
    }

    pub fn status(&self, id: &TaskId) -> Option<&TaskStatus> {
        self.node(id).map(|node| &node.status)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_weights()
    }

    pub fn declaration_order(&self) -> Vec<TaskId> {
        self.nodes().map(|node| node.id.clone()).collect()
    }

    /// Execution levels; level 0 has no prerequisites.
    pub fn levels(&self) -> &[Vec<TaskId>] {
        &self.levels
    }

    pub fn level_of(&self, id: &TaskId) -> Option<usize> {
        self.level_of.get(id).copied()
    }

    /// A topological order: levels flattened, declaration order within a level.
    pub fn topological_order(&self) -> Vec<TaskId> {
        self.levels.iter().flatten().cloned().collect()
    }

    /// Direct predecessors in declaration order.
    pub fn predecessors(&self, id: &TaskId) -> &[TaskId] {
        self.node(id)
            .map(|node| node.predecessors.as_slice())
            .unwrap_or(&[])
    }

    /// Direct successors in declaration order.
    pub fn successors(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut succ: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect();
        succ.sort_by_key(|i| i.index());
        succ.dedup();
        succ.into_iter().map(|i| self.graph[i].id.clone()).collect()
    }

    /// Every task reachable from `id`, excluding `id`, in declaration order.
    pub fn transitive_successors(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&start) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut reached = Vec::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(index) = dfs.next(&self.graph) {
            if index != start {
                reached.push(index);
            }
        }
        reached.sort_by_key(|i| i.index());
        reached.into_iter().map(|i| self.graph[i].id.clone()).collect()
    }

    /// Whether every direct predecessor of `id` is approved.
    pub fn predecessors_approved(&self, id: &TaskId) -> bool {
        self.predecessors(id)
            .iter()
            .all(|pred| self.status(pred).map(TaskStatus::is_approved).unwrap_or(false))
    }

    /// First predecessor (declaration order) that is not approved.
    pub fn blocking_predecessor(&self, id: &TaskId) -> Option<TaskId> {
        self.predecessors(id)
            .iter()
            .find(|pred| !self.status(pred).map(TaskStatus::is_approved).unwrap_or(false))
            .cloned()
    }

    pub fn all_terminal(&self) -> bool {
        self.nodes().all(TaskNode::is_terminal)
    }

    pub fn count_where(&self, predicate: impl Fn(&TaskStatus) -> bool) -> usize {
        self.nodes().filter(|node| predicate(&node.status)).count()
    }
}

/// Members of the cycle through `start`, in declaration order.
fn cycle_members(graph: &DiGraph<TaskNode, ()>, start: NodeIndex) -> Vec<TaskId> {
    let components = tarjan_scc(graph);
    let is_cyclic = |component: &Vec<NodeIndex>| {
        component.len() > 1 || graph.find_edge(component[0], component[0]).is_some()
    };

    let component = components
        .iter()
        .find(|c| c.contains(&start) && is_cyclic(c))
        .or_else(|| components.iter().find(|c| is_cyclic(c)))
        .cloned()
        .unwrap_or_else(|| vec![start]);

    let mut members = component;
    members.sort_by_key(|i| i.index());
    members.into_iter().map(|i| graph[i].id.clone()).collect()
}

impl std::fmt::Debug for PlanGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .field("levels", &self.levels.len())
            .finish()
    }
}
