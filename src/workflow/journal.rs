//! Append-only run journal.
//!
//! Each record is written as
//!
//! ```text
//! BEGIN <TAG>
//! <content>
//! END <TAG>
//! ```
//!
//! so a run can be reconstructed from the file alone.

use crate::error::Result;
use crate::sflog_warn;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Kinds of journal records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalTag {
    UserRequest,
    Draft,
    ClarifyingQuestions,
    Answers,
    HumanFeedback,
    Approved,
    TaskGraph,
    Escalation,
    Handoff,
    StageTransition,
}

impl JournalTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalTag::UserRequest => "USER_REQUEST",
            JournalTag::Draft => "DRAFT",
            JournalTag::ClarifyingQuestions => "CLARIFYING_QUESTIONS",
            JournalTag::Answers => "ANSWERS",
            JournalTag::HumanFeedback => "HUMAN_FEEDBACK",
            JournalTag::Approved => "APPROVED",
            JournalTag::TaskGraph => "TASK_GRAPH",
            JournalTag::Escalation => "ESCALATION",
            JournalTag::Handoff => "HANDOFF",
            JournalTag::StageTransition => "STAGE_TRANSITION",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Journal {
    path: Option<PathBuf>,
}

impl Journal {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// A journal that records nothing.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one record. `label` qualifies the tag, e.g. the stage or task.
    pub async fn append(&self, tag: JournalTag, label: &str, content: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(format_record(tag, label, content).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }

    /// Append, logging instead of failing. The journal is a record, not a
    /// dependency of the run.
    pub async fn record(&self, tag: JournalTag, label: &str, content: &str) {
        if let Err(e) = self.append(tag, label, content).await {
            sflog_warn!("journal write failed for {}: {}", tag.as_str(), e);
        }
    }

    pub async fn record_list(&self, tag: JournalTag, label: &str, items: &[String]) {
        let content = items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, item))
            .collect::<Vec<_>>()
            .join("\n");
        self.record(tag, label, &content).await;
    }
}

fn format_record(tag: JournalTag, label: &str, content: &str) -> String {
    let header = if label.is_empty() {
        tag.as_str().to_string()
    } else {
        format!("{} {}", tag.as_str(), label)
    };
    format!(
        "BEGIN {}\n{}\nEND {}\n",
        header,
        content.trim_end(),
        tag.as_str()
    )
}

/// Parse a journal back into `(header, content)` pairs.
pub fn parse_records(text: &str) -> Vec<(String, String)> {
    let mut records = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    for line in text.lines() {
        let mut closed = false;
        if let Some((header, body)) = current.as_mut() {
            let tag = header.split_whitespace().next().unwrap_or_default();
            if line == format!("END {}", tag) {
                closed = true;
            } else {
                body.push(line);
            }
        } else if let Some(header) = line.strip_prefix("BEGIN ") {
            current = Some((header.to_string(), Vec::new()));
        }
        if closed {
            if let Some((header, body)) = current.take() {
                records.push((header, body.join("\n")));
            }
        }
    }
    records
}
