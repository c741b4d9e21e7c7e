//! Personas, prompt templates, output schemas and the typed responses they
//! describe.
//!
//! Templates use `{{PLACEHOLDER}}` markers filled by [`fill`].

use crate::core::dag::PlanTask;
use crate::core::review::{Severity, Verdict};
use crate::core::task::{TaskId, TaskNode};
use crate::orchestration::capability::{AgentRole, CapabilityFailure};
use crate::orchestration::convergence::Draft;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Personas
// ---------------------------------------------------------------------------

pub fn persona(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Clarifier => {
            "You are a requirements analyst. Identify ambiguities in a feature request and \
             either ask the few questions that matter or restate the requirements precisely. \
             Respond only with JSON matching the provided schema."
        }
        AgentRole::SpecAuthor => {
            "You are a specification author. Write a complete, testable specification from \
             clarified requirements. Ask questions only when a decision cannot be made \
             without the user. Respond only with JSON matching the provided schema."
        }
        AgentRole::Planner => {
            "You are a technical planner. Decompose an approved specification into tasks \
             with explicit dependencies that form a directed acyclic graph. Respond only \
             with JSON matching the provided schema."
        }
        AgentRole::Coder => {
            "You are a software engineer implementing one task of a larger plan. Stay within \
             the task's scope, build on upstream handoffs, and report honestly when blocked. \
             Respond only with JSON matching the provided schema."
        }
        AgentRole::Reviewer => {
            "You are a strict code reviewer. Check the implementation against the task and \
             the specification. Classify outstanding issues as minor or major. Respond only \
             with JSON matching the provided schema."
        }
    }
}

/// Replace each `{{KEY}}` with its value.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- none".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Drafting (clarification, specification, plan)
// ---------------------------------------------------------------------------

const CLARIFY_TEMPLATE: &str = r#"Analyze the feature request below.

Feature request:
{{REQUEST}}

If anything essential is ambiguous, set response_type to "clarifying_questions" and list
between 1 and 5 questions. Otherwise set response_type to "draft" and put a precise
restatement of the requirements in "draft"."#;

const SPEC_TEMPLATE: &str = r#"Write the specification for the clarified requirements provided as context.

Set response_type to "draft" and put the full specification in Markdown in "draft".
If a decision cannot be made without the user, set response_type to "clarifying_questions"
and list between 1 and 5 questions instead."#;

const PLAN_TEMPLATE: &str = r#"Write the development plan for the approved specification provided as context.

Break the work into tasks. Give every task a unique identifier and list the identifiers of
the tasks it depends on. Dependencies must not form a cycle.
Set response_type to "draft" and put the plan in Markdown in "draft"."#;

const REVISION_SUFFIX: &str = r#"

Revise your previous draft to address this feedback:
{{FEEDBACK}}"#;

const ANSWERS_SUFFIX: &str = r#"

Answers to your previous questions:
{{ANSWERS}}"#;

pub fn clarify_instructions(request: &str) -> String {
    fill(CLARIFY_TEMPLATE, &[("REQUEST", request.trim())])
}

pub fn spec_instructions() -> String {
    SPEC_TEMPLATE.to_string()
}

pub fn plan_instructions() -> String {
    PLAN_TEMPLATE.to_string()
}

/// Append the prior iteration's feedback or answers to drafting instructions.
pub fn with_feedback(instructions: String, feedback: Option<&str>, answers: Option<&str>) -> String {
    let mut out = instructions;
    if let Some(feedback) = feedback {
        out.push_str(&fill(REVISION_SUFFIX, &[("FEEDBACK", feedback.trim())]));
    }
    if let Some(answers) = answers {
        out.push_str(&fill(ANSWERS_SUFFIX, &[("ANSWERS", answers.trim())]));
    }
    out
}

pub fn draft_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "response_type": {
                "type": "string",
                "enum": ["draft", "clarifying_questions"]
            },
            "draft": { "type": "string" },
            "questions": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
                "maxItems": 5
            }
        },
        "required": ["response_type"],
        "additionalProperties": false
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftKind {
    Draft,
    ClarifyingQuestions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftResponse {
    pub response_type: DraftKind,
    #[serde(default)]
    pub draft: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
}

impl DraftResponse {
    pub fn into_draft(self) -> std::result::Result<Draft, CapabilityFailure> {
        match self.response_type {
            DraftKind::Draft => match self.draft {
                Some(text) if !text.trim().is_empty() => Ok(Draft::Candidate(text)),
                _ => Err(CapabilityFailure::Malformed(
                    "response_type is draft but draft is empty".to_string(),
                )),
            },
            DraftKind::ClarifyingQuestions => {
                let questions: Vec<String> = self
                    .questions
                    .into_iter()
                    .filter(|q| !q.trim().is_empty())
                    .collect();
                if questions.is_empty() {
                    return Err(CapabilityFailure::Malformed(
                        "clarifying_questions without any question".to_string(),
                    ));
                }
                Ok(Draft::Questions(questions))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Task extraction
// ---------------------------------------------------------------------------

const EXTRACT_TEMPLATE: &str = r#"Extract every implementation task from the approved development plan provided as context.

Rules:
- Each task has a unique task_id taken from the plan.
- description carries all implementation details the plan gives for that task.
- dependencies lists the task_ids of direct prerequisites; use an empty array for none.
- Keep the order in which the plan declares the tasks."#;

const GRAPH_FEEDBACK_TEMPLATE: &str = r#"The plan's task graph was rejected: {{ERROR}}
Revise the plan so that every dependency refers to a declared task and no dependency cycle remains."#;

pub fn extract_tasks_instructions() -> String {
    EXTRACT_TEMPLATE.to_string()
}

/// Planner feedback for a structurally invalid task graph.
pub fn graph_feedback(error: &str) -> String {
    fill(GRAPH_FEEDBACK_TEMPLATE, &[("ERROR", error)])
}

pub fn task_extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "task_id": { "type": "string" },
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "dependencies": {
                            "type": "array",
                            "items": { "type": "string" }
                        }
                    },
                    "required": ["task_id", "title", "description", "dependencies"],
                    "additionalProperties": false
                },
                "minItems": 1
            }
        },
        "required": ["tasks"],
        "additionalProperties": false
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExtraction {
    pub tasks: Vec<PlanTask>,
}

// ---------------------------------------------------------------------------
// Implementation and review
// ---------------------------------------------------------------------------

const IMPLEMENT_TEMPLATE: &str = r#"Implement the following task of the development plan.

Task ID: {{TASK_ID}}
Task Title: {{TASK_TITLE}}
Task Description:
{{TASK_DESCRIPTION}}

The specification, the plan and the handoffs of upstream tasks are provided as context.
When finished, report status IMPLEMENTATION_SUCCESS with a report covering key decisions,
what changed and known issues. If the task cannot be completed, report
IMPLEMENTATION_BLOCKED and explain why in the report."#;

const REVISE_TEMPLATE: &str = r#"Revise your implementation of task {{TASK_ID}} ({{TASK_TITLE}}).

Address every issue below:
{{ISSUES}}
{{GUIDANCE}}
Report status and report as before."#;

const REVIEW_TEMPLATE: &str = r#"Review the implementation of task {{TASK_ID}} ({{TASK_TITLE}}), review round {{ROUND}} of {{CAP}}.

The task description, specification and the implementation report are provided as context.

Set review_result to:
- APPROVED if the task is done and correct;
- REQUEST_CHANGES if issues remain, listing each in "issues" and setting "severity" to
  "minor" when every remaining issue is cosmetic or low-risk, otherwise "major";
- ESCALATE if a human decision is needed (contradictory requirements, missing access)."#;

pub fn implement_instructions(task: &TaskNode) -> String {
    fill(
        IMPLEMENT_TEMPLATE,
        &[
            ("TASK_ID", task.id.as_str()),
            ("TASK_TITLE", &task.title),
            ("TASK_DESCRIPTION", task.description.trim()),
        ],
    )
}

pub fn revise_instructions(task: &TaskNode, issues: &[String], guidance: Option<&str>) -> String {
    let guidance = guidance
        .map(|g| format!("\nHuman guidance:\n{}\n", g.trim()))
        .unwrap_or_default();
    fill(
        REVISE_TEMPLATE,
        &[
            ("TASK_ID", task.id.as_str()),
            ("TASK_TITLE", &task.title),
            ("ISSUES", &bullet_list(issues)),
            ("GUIDANCE", &guidance),
        ],
    )
}

pub fn review_instructions(task: &TaskNode, round: u32, cap: u32) -> String {
    fill(
        REVIEW_TEMPLATE,
        &[
            ("TASK_ID", task.id.as_str()),
            ("TASK_TITLE", &task.title),
            ("ROUND", &round.to_string()),
            ("CAP", &cap.to_string()),
        ],
    )
}

pub fn implementation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "enum": ["IMPLEMENTATION_SUCCESS", "IMPLEMENTATION_BLOCKED"]
            },
            "report": { "type": "string" }
        },
        "required": ["status", "report"],
        "additionalProperties": false
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImplementationStatus {
    ImplementationSuccess,
    ImplementationBlocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationResult {
    pub status: ImplementationStatus,
    pub report: String,
}

impl ImplementationResult {
    pub fn is_blocked(&self) -> bool {
        self.status == ImplementationStatus::ImplementationBlocked
    }
}

pub fn review_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "review_result": {
                "type": "string",
                "enum": ["APPROVED", "REQUEST_CHANGES", "ESCALATE"]
            },
            "issues": {
                "type": "array",
                "items": { "type": "string" }
            },
            "severity": {
                "type": "string",
                "enum": ["minor", "major"]
            },
            "review_comment": { "type": "string" }
        },
        "required": ["review_result"],
        "additionalProperties": false
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewOutcome {
    Approved,
    RequestChanges,
    Escalate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub review_result: ReviewOutcome,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub review_comment: String,
}

impl ReviewResponse {
    /// Convert to a verdict.
    ///
    /// Missing severity is treated as major. When no issue is listed the
    /// review comment stands in as the single issue.
    pub fn into_verdict(self) -> Verdict {
        let mut issues: Vec<String> = self
            .issues
            .into_iter()
            .filter(|issue| !issue.trim().is_empty())
            .collect();
        if issues.is_empty() && !self.review_comment.trim().is_empty() {
            issues.push(self.review_comment.trim().to_string());
        }
        match self.review_result {
            ReviewOutcome::Approved => Verdict::Approved,
            ReviewOutcome::RequestChanges => Verdict::RevisionRequested {
                issues,
                severity: self.severity.unwrap_or(Severity::Major),
            },
            ReviewOutcome::Escalate => Verdict::Escalate { issues },
        }
    }
}

// ---------------------------------------------------------------------------
// Handoff and final-approval triage
// ---------------------------------------------------------------------------

const HANDOFF_TEMPLATE: &str = r#"Task {{TASK_ID}} ({{TASK_TITLE}}) has been approved. Its session trace is provided as context.

Write the handoff that tasks depending on it will start from:
- objective: what the task set out to do, in one or two sentences;
- decisions: design decisions a successor must respect;
- produced_changes: files, interfaces and behavior that now exist;
- caveats: known issues and limitations.
Do not restate the trace.{{CAVEATS}}"#;

const TRIAGE_TEMPLATE: &str = r#"The delivered work was sent back at final approval with this feedback:
{{FEEDBACK}}

The tasks of the plan and their handoffs are provided as context. List in
affected_task_ids the task_ids that must be reworked to address the feedback.
Use only task_ids that appear in the plan."#;

pub fn handoff_instructions(task: &TaskNode, caveats: &[String]) -> String {
    let caveats = if caveats.is_empty() {
        String::new()
    } else {
        format!(
            "\n\nThe review accepted the task with these outstanding issues; include each in caveats:\n{}",
            bullet_list(caveats)
        )
    };
    fill(
        HANDOFF_TEMPLATE,
        &[
            ("TASK_ID", task.id.as_str()),
            ("TASK_TITLE", &task.title),
            ("CAVEATS", &caveats),
        ],
    )
}

pub fn triage_instructions(feedback: &str) -> String {
    fill(TRIAGE_TEMPLATE, &[("FEEDBACK", feedback.trim())])
}

pub fn handoff_schema() -> Value {
    let list = json!({ "type": "array", "items": { "type": "string" } });
    json!({
        "type": "object",
        "properties": {
            "objective": { "type": "string" },
            "decisions": list,
            "produced_changes": list,
            "caveats": list
        },
        "required": ["objective", "decisions", "produced_changes", "caveats"],
        "additionalProperties": false
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffResponse {
    pub objective: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub produced_changes: Vec<String>,
    #[serde(default)]
    pub caveats: Vec<String>,
}

pub fn affected_tasks_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "affected_task_ids": {
                "type": "array",
                "items": { "type": "string" }
            }
        },
        "required": ["affected_task_ids"],
        "additionalProperties": false
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedTasks {
    pub affected_task_ids: Vec<TaskId>,
}
