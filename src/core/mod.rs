//! Core domain models for specflow.
//!
//! Tasks and the plan graph, review-cycle bookkeeping, and handoff artifacts.
//! Nothing here talks to an agent capability.

pub mod dag;
pub mod handoff;
pub mod review;
pub mod task;

pub use dag::{PlanDocument, PlanGraph, PlanGraphError, PlanTask};
pub use handoff::{HandoffArtifact, HandoffStore, SessionTrace, TraceKind};
pub use review::{ReviewCycle, ReviewResolution, Severity, Verdict};
pub use task::{TaskId, TaskNode, TaskStatus};
