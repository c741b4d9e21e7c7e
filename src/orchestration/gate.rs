//! Human approval gates.
//!
//! A gate presents an artifact and awaits a decision. The same seam answers
//! clarifying questions raised by a drafting capability.

use crate::error::{Error, Result};
use crate::workflow::GateKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// What a human is asked to approve, and why the gate was raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRequest {
    pub kind: GateKind,
    pub title: String,
    /// The artifact under decision (spec, plan, delivery summary, ...).
    pub artifact: String,
    /// Specific reasons the gate exists: unresolved feedback, caveats, failures.
    pub reasons: Vec<String>,
}

impl GateRequest {
    pub fn new(kind: GateKind, title: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            artifact: artifact.into(),
            reasons: Vec::new(),
        }
    }

    pub fn with_reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "feedback")]
pub enum GateDecision {
    Approve,
    Revise(String),
}

impl GateDecision {
    pub fn is_approve(&self) -> bool {
        matches!(self, GateDecision::Approve)
    }
}

#[async_trait]
pub trait HumanGate: Send + Sync {
    /// Present the request and wait for a decision.
    async fn decide(&self, request: &GateRequest) -> Result<GateDecision>;

    /// Answer clarifying questions. Returns the answers as one document.
    async fn answer(&self, questions: &[String]) -> Result<String>;
}

/// Parse a typed decision: `a`/`approve`/`y`, or `r`/`revise` followed by
/// optional inline feedback (`r: use postgres`).
pub fn parse_decision(input: &str) -> Option<(bool, Option<String>)> {
    let trimmed = input.trim();
    let (head, rest) = match trimmed.find([':', ' ']) {
        Some(pos) => (&trimmed[..pos], trimmed[pos + 1..].trim()),
        None => (trimmed, ""),
    };
    let inline = (!rest.is_empty()).then(|| rest.to_string());
    match head.to_ascii_lowercase().as_str() {
        "a" | "approve" | "y" | "yes" => Some((true, None)),
        "r" | "revise" | "n" | "no" => Some((false, inline)),
        _ => None,
    }
}

/// Interactive gate on stdin/stdout.
pub struct ConsoleGate {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleGate {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    async fn print(text: &str) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> Result<String> {
        lines
            .next_line()
            .await?
            .ok_or_else(|| Error::Validation("stdin closed while waiting for input".to_string()))
    }

    /// Read lines until an empty one.
    async fn read_block(lines: &mut Lines<BufReader<Stdin>>) -> Result<String> {
        let mut block = Vec::new();
        loop {
            let line = Self::read_line(lines).await?;
            if line.trim().is_empty() {
                break;
            }
            block.push(line);
        }
        Ok(block.join("\n"))
    }
}

impl Default for ConsoleGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HumanGate for ConsoleGate {
    async fn decide(&self, request: &GateRequest) -> Result<GateDecision> {
        let mut lines = self.lines.lock().await;

        let mut screen = format!("\n=== {} ({}) ===\n\n{}\n", request.title, request.kind, request.artifact.trim());
        if !request.reasons.is_empty() {
            screen.push_str("\nRaised because:\n");
            for reason in &request.reasons {
                screen.push_str(&format!("  - {}\n", reason));
            }
        }
        Self::print(&screen).await?;

        loop {
            Self::print("\n[a]pprove or [r]evise? ").await?;
            let input = Self::read_line(&mut lines).await?;
            match parse_decision(&input) {
                Some((true, _)) => return Ok(GateDecision::Approve),
                Some((false, Some(feedback))) => return Ok(GateDecision::Revise(feedback)),
                Some((false, None)) => {
                    Self::print("Feedback (end with an empty line):\n").await?;
                    let feedback = Self::read_block(&mut lines).await?;
                    if !feedback.trim().is_empty() {
                        return Ok(GateDecision::Revise(feedback));
                    }
                    Self::print("Feedback is required to revise.\n").await?;
                }
                None => Self::print("Please answer 'a' or 'r'.\n").await?,
            }
        }
    }

    async fn answer(&self, questions: &[String]) -> Result<String> {
        let mut lines = self.lines.lock().await;
        let mut answers = Vec::with_capacity(questions.len());
        Self::print("\nPlease answer the following questions.\n").await?;
        for (i, question) in questions.iter().enumerate() {
            Self::print(&format!("\n{}. {}\n> ", i + 1, question)).await?;
            let answer = Self::read_line(&mut lines).await?;
            answers.push(format_answer(question, &answer));
        }
        Ok(answers.join("\n\n"))
    }
}

/// Question/answer pair as handed back to the capability.
pub fn format_answer(question: &str, answer: &str) -> String {
    format!("Q: {}\nA: {}", question.trim(), answer.trim())
}
