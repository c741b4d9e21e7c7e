//! Handoff artifacts and their write-once store.
//!
//! A `HandoffArtifact` is the distilled account of a finished task that
//! successor tasks receive as context. Raw coding-session traces stay in
//! `SessionTrace` and never cross a task boundary.

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Distilled record of a finished task.
///
/// Immutable once published. Rework produces a new revision instead of
/// modifying an existing artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffArtifact {
    pub task_id: TaskId,
    /// 1-based; increments with each rework of the task.
    pub revision: u32,
    pub objective: String,
    pub decisions: Vec<String>,
    pub produced_changes: Vec<String>,
    /// Known issues, including caveats carried over from an auto-accepted review.
    pub caveats: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl HandoffArtifact {
    /// Render as Markdown with one heading per section.
    ///
    /// Empty sections render as `- none` so successors can tell an empty
    /// section from a missing one.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "<!-- handoff {} revision {} -->\n# Objective\n\n{}\n",
            self.task_id,
            self.revision,
            self.objective.trim()
        );
        for (heading, items) in [
            ("Decisions", &self.decisions),
            ("Produced Changes", &self.produced_changes),
            ("Known Caveats", &self.caveats),
        ] {
            out.push_str(&format!("\n# {}\n\n", heading));
            if items.is_empty() {
                out.push_str("- none\n");
            }
            for item in items {
                out.push_str(&format!("- {}\n", item.trim()));
            }
        }
        out
    }
}

/// What a trace entry recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Prompt,
    Implementation,
    Review,
    Revision,
    Note,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub kind: TraceKind,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

/// Full record of one task's coding session. Input to handoff generation only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTrace {
    pub task_id: TaskId,
    entries: Vec<TraceEntry>,
}

impl SessionTrace {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, kind: TraceKind, content: impl Into<String>) {
        self.entries.push(TraceEntry {
            kind,
            content: content.into(),
            recorded_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest entry of the given kind.
    pub fn last_of(&self, kind: TraceKind) -> Option<&TraceEntry> {
        self.entries.iter().rev().find(|entry| entry.kind == kind)
    }

    /// Flatten into a single document for the handoff author.
    pub fn transcript(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("## {:?}\n\n{}\n", entry.kind, entry.content.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Write-once store of published handoffs, keyed by task and revision.
///
/// Cloning shares the same underlying store.
#[derive(Debug, Clone, Default)]
pub struct HandoffStore {
    inner: Arc<RwLock<HashMap<TaskId, Vec<Arc<HandoffArtifact>>>>>,
}

impl HandoffStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an artifact.
    ///
    /// Publishing a revision identical to the stored one is a no-op and
    /// returns the stored artifact. Publishing different content under an
    /// existing revision fails with `HandoffAlreadyPublished`. Revisions must
    /// be published in order.
    pub async fn publish(&self, artifact: HandoffArtifact) -> Result<Arc<HandoffArtifact>> {
        let mut inner = self.inner.write().await;
        let revisions = inner.entry(artifact.task_id.clone()).or_default();

        let index = artifact.revision.checked_sub(1).ok_or_else(|| {
            Error::Validation(format!(
                "handoff revision for {} must start at 1",
                artifact.task_id
            ))
        })? as usize;

        if let Some(existing) = revisions.get(index) {
            if same_content(existing, &artifact) {
                return Ok(Arc::clone(existing));
            }
            return Err(Error::HandoffAlreadyPublished {
                task_id: artifact.task_id,
                revision: artifact.revision,
            });
        }
        if index != revisions.len() {
            return Err(Error::Validation(format!(
                "handoff for {} expected revision {}, got {}",
                artifact.task_id,
                revisions.len() + 1,
                artifact.revision
            )));
        }

        let artifact = Arc::new(artifact);
        revisions.push(Arc::clone(&artifact));
        Ok(artifact)
    }

    /// Most recent revision for a task.
    pub async fn latest(&self, task_id: &TaskId) -> Option<Arc<HandoffArtifact>> {
        let inner = self.inner.read().await;
        inner.get(task_id).and_then(|revs| revs.last().cloned())
    }

    pub async fn get(&self, task_id: &TaskId, revision: u32) -> Option<Arc<HandoffArtifact>> {
        let inner = self.inner.read().await;
        let index = revision.checked_sub(1)? as usize;
        inner.get(task_id).and_then(|revs| revs.get(index).cloned())
    }

    /// Revision number the next publish for this task should carry.
    pub async fn next_revision(&self, task_id: &TaskId) -> u32 {
        let inner = self.inner.read().await;
        inner.get(task_id).map(|revs| revs.len() as u32).unwrap_or(0) + 1
    }

    pub async fn revision_count(&self, task_id: &TaskId) -> usize {
        let inner = self.inner.read().await;
        inner.get(task_id).map(Vec::len).unwrap_or(0)
    }

    /// Latest handoff of each listed task, skipping tasks with none.
    pub async fn latest_for(&self, task_ids: &[TaskId]) -> Vec<Arc<HandoffArtifact>> {
        let inner = self.inner.read().await;
        task_ids
            .iter()
            .filter_map(|id| inner.get(id).and_then(|revs| revs.last().cloned()))
            .collect()
    }

    /// Latest handoff of every task, ordered by task id.
    pub async fn snapshot(&self) -> Vec<Arc<HandoffArtifact>> {
        let inner = self.inner.read().await;
        let mut latest: Vec<_> = inner.values().filter_map(|revs| revs.last().cloned()).collect();
        latest.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        latest
    }
}

fn same_content(a: &HandoffArtifact, b: &HandoffArtifact) -> bool {
    a.objective == b.objective
        && a.decisions == b.decisions
        && a.produced_changes == b.produced_changes
        && a.caveats == b.caveats
}
