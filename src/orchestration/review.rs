//! Coder and reviewer calls for a task's review cycle.
//!
//! `ReviewAgents` performs the individual capability calls: implement,
//! revise and review. The loop that sequences them and records verdicts in a
//! [`ReviewCycle`](crate::core::review::ReviewCycle) lives in the task
//! executor, which also owns the task's status.

use crate::core::review::Verdict;
use crate::core::task::TaskNode;
use crate::error::Result;
use crate::orchestration::capability::{CapabilityRequest, ContextDocument, Invoker, Purpose};
use crate::orchestration::prompts::{self, ImplementationResult, ReviewResponse};
use crate::sflog_debug;
use tokio_util::sync::CancellationToken;

/// A candidate produced by the coder, with the session to continue.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub result: ImplementationResult,
    pub session_id: Option<String>,
}

impl Candidate {
    pub fn report(&self) -> &str {
        &self.result.report
    }

    pub fn is_blocked(&self) -> bool {
        self.result.is_blocked()
    }
}

#[derive(Debug, Clone)]
pub struct ReviewAgents {
    invoker: Invoker,
}

impl ReviewAgents {
    pub fn new(invoker: Invoker) -> Self {
        Self { invoker }
    }

    fn request(
        purpose: Purpose,
        task: &TaskNode,
        context: &[ContextDocument],
        instructions: String,
    ) -> CapabilityRequest {
        let mut request =
            CapabilityRequest::new(purpose, instructions).with_subject(task.id.clone());
        request.context = context.to_vec();
        request
    }

    /// First implementation of the task. Human guidance from an earlier
    /// escalation or final-approval round is appended when present.
    pub async fn implement(
        &self,
        task: &TaskNode,
        context: &[ContextDocument],
        guidance: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Candidate> {
        let mut instructions = prompts::implement_instructions(task);
        if let Some(guidance) = guidance {
            instructions.push_str(&format!(
                "\n\nThis task is being redone. Human guidance:\n{}",
                guidance.trim()
            ));
        }
        let request = Self::request(Purpose::Implement, task, context, instructions)
            .with_schema(prompts::implementation_schema());

        let (result, artifact) = self
            .invoker
            .invoke_json::<ImplementationResult>(&request, cancel)
            .await?;
        sflog_debug!("{}: implementation status {:?}", task.id, result.status);
        Ok(Candidate {
            result,
            session_id: artifact.session_id,
        })
    }

    /// Revise in the coder's existing session.
    pub async fn revise(
        &self,
        task: &TaskNode,
        context: &[ContextDocument],
        issues: &[String],
        guidance: Option<&str>,
        session_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Candidate> {
        let instructions = prompts::revise_instructions(task, issues, guidance);
        let request = Self::request(Purpose::Revise, task, context, instructions)
            .with_schema(prompts::implementation_schema())
            .with_session(session_id.clone());

        let (result, artifact) = self
            .invoker
            .invoke_json::<ImplementationResult>(&request, cancel)
            .await?;
        Ok(Candidate {
            result,
            session_id: artifact.session_id.or(session_id),
        })
    }

    /// Review a candidate. The reviewer works in a fresh session each round.
    pub async fn review(
        &self,
        task: &TaskNode,
        context: &[ContextDocument],
        candidate: &Candidate,
        round: u32,
        cap: u32,
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        let mut request = Self::request(
            Purpose::Review,
            task,
            context,
            prompts::review_instructions(task, round, cap),
        )
        .with_context(
            format!("Task {} description", task.id),
            task.description.clone(),
        )
        .with_context("Implementation report", candidate.report().to_string());
        request.output_schema = Some(prompts::review_schema());

        let (response, _) = self
            .invoker
            .invoke_json::<ReviewResponse>(&request, cancel)
            .await?;
        Ok(response.into_verdict())
    }
}
