//! Bounded produce/evaluate loop.
//!
//! One abstraction drives clarification, specification drafting, plan
//! drafting and final approval. Stages differ only in their [`Producer`] and
//! their [`Evaluator`]. Each iteration sees exactly the feedback of the
//! iteration before it.

use crate::error::{Error, Result};
use crate::orchestration::capability::{CapabilityRequest, Invoker, Purpose};
use crate::orchestration::gate::{GateDecision, GateRequest, HumanGate};
use crate::orchestration::prompts::{self, DraftResponse};
use crate::workflow::{GateKind, Journal, JournalTag};
use crate::{sflog, sflog_debug};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// What one produce step returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    Candidate(String),
    /// The producer needs answers before it can draft.
    Questions(Vec<String>),
}

/// Evaluator verdict on one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Satisfied,
    NeedsMoreInput(Vec<String>),
    Rejected(String),
}

/// How candidates are judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluator {
    /// The producer decides: any candidate it offers is accepted.
    AutoEvaluated,
    /// A human approves or sends the candidate back with feedback.
    HumanGated(GateKind),
}

/// The previous iteration's feedback, handed to the next produce step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PriorFeedback {
    #[default]
    None,
    Answers(String),
    Revision(String),
}

impl PriorFeedback {
    pub fn revision(&self) -> Option<&str> {
        match self {
            PriorFeedback::Revision(text) => Some(text),
            _ => None,
        }
    }

    pub fn answers(&self) -> Option<&str> {
        match self {
            PriorFeedback::Answers(text) => Some(text),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Producer: Send + Sync {
    /// Produce the next draft. `iteration` is 1-based.
    async fn produce(
        &self,
        iteration: u32,
        prior: &PriorFeedback,
        cancel: &CancellationToken,
    ) -> Result<Draft>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceOutcome {
    Converged { candidate: String, iterations: u32 },
    CapReached { iterations: u32, last_feedback: PriorFeedback },
}

impl ConvergenceOutcome {
    /// The accepted candidate, or `ConvergenceCapReached` for `stage`.
    pub fn into_candidate(self, stage: &str) -> Result<String> {
        match self {
            ConvergenceOutcome::Converged { candidate, .. } => Ok(candidate),
            ConvergenceOutcome::CapReached { iterations, .. } => Err(Error::ConvergenceCapReached {
                stage: stage.to_string(),
                iterations,
            }),
        }
    }
}

pub struct ConvergenceLoop<'a> {
    stage: String,
    cap: u32,
    evaluator: Evaluator,
    gate: &'a dyn HumanGate,
    journal: &'a Journal,
}

impl<'a> ConvergenceLoop<'a> {
    pub fn new(
        stage: impl Into<String>,
        cap: u32,
        evaluator: Evaluator,
        gate: &'a dyn HumanGate,
        journal: &'a Journal,
    ) -> Self {
        Self {
            stage: stage.into(),
            cap: cap.max(1),
            evaluator,
            gate,
            journal,
        }
    }

    pub async fn run(
        &self,
        producer: &dyn Producer,
        cancel: &CancellationToken,
    ) -> Result<ConvergenceOutcome> {
        self.run_from(producer, PriorFeedback::None, cancel).await
    }

    /// Run starting from existing feedback, e.g. a rejection raised outside
    /// the loop.
    pub async fn run_from(
        &self,
        producer: &dyn Producer,
        initial: PriorFeedback,
        cancel: &CancellationToken,
    ) -> Result<ConvergenceOutcome> {
        let mut prior = initial;

        for iteration in 1..=self.cap {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            sflog_debug!("{}: iteration {}/{}", self.stage, iteration, self.cap);

            let draft = producer.produce(iteration, &prior, cancel).await?;
            let evaluation = self.evaluate(iteration, &draft, cancel).await?;

            prior = match (evaluation, draft) {
                (Evaluation::Satisfied, Draft::Candidate(candidate)) => {
                    sflog!("{}: converged after {} iteration(s)", self.stage, iteration);
                    self.journal
                        .record(JournalTag::Approved, &self.stage, &candidate)
                        .await;
                    return Ok(ConvergenceOutcome::Converged {
                        candidate,
                        iterations: iteration,
                    });
                }
                (Evaluation::NeedsMoreInput(questions), _) => {
                    let answers = self.ask(&questions, cancel).await?;
                    PriorFeedback::Answers(answers)
                }
                (Evaluation::Rejected(feedback), _) => {
                    self.journal
                        .record(JournalTag::HumanFeedback, &self.stage, &feedback)
                        .await;
                    PriorFeedback::Revision(feedback)
                }
                (Evaluation::Satisfied, Draft::Questions(_)) => {
                    return Err(Error::Validation(format!(
                        "{}: questions cannot satisfy the evaluator",
                        self.stage
                    )))
                }
            };
        }

        sflog!("{}: iteration cap {} reached", self.stage, self.cap);
        Ok(ConvergenceOutcome::CapReached {
            iterations: self.cap,
            last_feedback: prior,
        })
    }

    async fn evaluate(
        &self,
        iteration: u32,
        draft: &Draft,
        cancel: &CancellationToken,
    ) -> Result<Evaluation> {
        let candidate = match draft {
            Draft::Questions(questions) => {
                self.journal
                    .record_list(JournalTag::ClarifyingQuestions, &self.stage, questions)
                    .await;
                return Ok(Evaluation::NeedsMoreInput(questions.clone()));
            }
            Draft::Candidate(candidate) => candidate,
        };
        self.journal
            .record(
                JournalTag::Draft,
                &format!("{} #{}", self.stage, iteration),
                candidate,
            )
            .await;

        match &self.evaluator {
            Evaluator::AutoEvaluated => Ok(Evaluation::Satisfied),
            Evaluator::HumanGated(kind) => {
                let request = GateRequest::new(
                    kind.clone(),
                    format!("{} draft {}", self.stage, iteration),
                    candidate.clone(),
                );
                let decision = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    decision = self.gate.decide(&request) => decision?,
                };
                sflog!("{}: {} decision: {:?}", self.stage, kind, decision);
                Ok(match decision {
                    GateDecision::Approve => Evaluation::Satisfied,
                    GateDecision::Revise(feedback) => Evaluation::Rejected(feedback),
                })
            }
        }
    }

    async fn ask(&self, questions: &[String], cancel: &CancellationToken) -> Result<String> {
        let answers = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            answers = self.gate.answer(questions) => answers?,
        };
        self.journal
            .record(JournalTag::Answers, &self.stage, &answers)
            .await;
        Ok(answers)
    }
}

/// Producer backed by the capability, for drafting stages.
///
/// Continues the same capability session across iterations.
pub struct CapabilityDrafter {
    invoker: Invoker,
    purpose: Purpose,
    instructions: String,
    context: Vec<(String, String)>,
    session: Mutex<Option<String>>,
}

impl CapabilityDrafter {
    pub fn new(invoker: Invoker, purpose: Purpose, instructions: String) -> Self {
        Self {
            invoker,
            purpose,
            instructions,
            context: Vec::new(),
            session: Mutex::new(None),
        }
    }

    pub fn with_context(mut self, label: impl Into<String>, body: impl Into<String>) -> Self {
        self.context.push((label.into(), body.into()));
        self
    }
}

#[async_trait]
impl Producer for CapabilityDrafter {
    async fn produce(
        &self,
        _iteration: u32,
        prior: &PriorFeedback,
        cancel: &CancellationToken,
    ) -> Result<Draft> {
        let mut session = self.session.lock().await;
        let instructions =
            prompts::with_feedback(self.instructions.clone(), prior.revision(), prior.answers());
        let mut request = CapabilityRequest::new(self.purpose, instructions)
            .with_schema(prompts::draft_schema())
            .with_session(session.clone());
        for (label, body) in &self.context {
            request = request.with_context(label.clone(), body.clone());
        }

        let (draft, session_id) = self
            .invoker
            .invoke_map(&request, cancel, |artifact| {
                let draft = artifact.parse_json::<DraftResponse>()?.into_draft()?;
                Ok((draft, artifact.session_id))
            })
            .await?;
        if session_id.is_some() {
            *session = session_id;
        }
        Ok(draft)
    }
}
