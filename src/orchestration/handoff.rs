//! Handoff generation.
//!
//! Turns an approved task's session trace into a [`HandoffArtifact`]. The
//! capability writes the content; the section layout is fixed here.

use crate::core::handoff::{HandoffArtifact, SessionTrace};
use crate::core::task::{TaskId, TaskNode};
use crate::error::Result;
use crate::orchestration::capability::{CapabilityRequest, ContextDocument, Invoker, Purpose};
use crate::orchestration::prompts::{self, HandoffResponse};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct HandoffGenerator {
    invoker: Invoker,
}

impl HandoffGenerator {
    pub fn new(invoker: Invoker) -> Self {
        Self { invoker }
    }

    /// Generate revision `revision` of the task's handoff.
    ///
    /// `review_caveats` are the issues left open by an auto-accepted review;
    /// each ends up in the artifact's caveats even if the capability omits it.
    pub async fn generate(
        &self,
        task: &TaskNode,
        trace: &SessionTrace,
        review_caveats: &[String],
        revision: u32,
        cancel: &CancellationToken,
    ) -> Result<HandoffArtifact> {
        let request = CapabilityRequest::new(
            Purpose::Handoff,
            prompts::handoff_instructions(task, review_caveats),
        )
        .with_subject(task.id.clone())
        .with_context("Session trace", trace.transcript())
        .with_schema(prompts::handoff_schema());

        let (response, _) = self
            .invoker
            .invoke_json::<HandoffResponse>(&request, cancel)
            .await?;
        Ok(assemble(task, revision, response, review_caveats))
    }
}

/// Build the artifact from a capability response.
///
/// Blank entries are dropped, duplicates collapsed, and an empty objective
/// falls back to the task title.
pub fn assemble(
    task: &TaskNode,
    revision: u32,
    response: HandoffResponse,
    review_caveats: &[String],
) -> HandoffArtifact {
    let objective = if response.objective.trim().is_empty() {
        task.title.clone()
    } else {
        response.objective.trim().to_string()
    };
    let caveats = response
        .caveats
        .into_iter()
        .chain(review_caveats.iter().cloned());

    HandoffArtifact {
        task_id: task.id.clone(),
        revision,
        objective,
        decisions: clean(response.decisions),
        produced_changes: clean(response.produced_changes),
        caveats: clean(caveats),
        created_at: Utc::now(),
    }
}

fn clean(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Context documents for a successor: one per predecessor handoff, in the
/// order given.
pub fn handoff_context(handoffs: &[Arc<HandoffArtifact>]) -> Vec<ContextDocument> {
    handoffs
        .iter()
        .map(|handoff| ContextDocument {
            label: handoff_label(&handoff.task_id),
            body: handoff.to_markdown(),
        })
        .collect()
}

pub fn handoff_label(task_id: &TaskId) -> String {
    format!("Handoff from task {}", task_id)
}
