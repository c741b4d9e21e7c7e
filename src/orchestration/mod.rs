//! Orchestration layer.
//!
//! Everything that drives agents: the capability seam and its headless CLI
//! backend, the bounded convergence loop used by the drafting stages, human
//! gates, the session pool, per-task execution with its review cycle, the
//! level-by-level scheduler, and the pipeline controller on top.

mod capability;
mod claude;
mod convergence;
mod gate;
mod handoff;
mod pipeline;
mod pool;
pub mod prompts;
mod review;
mod scheduler;
mod session;

pub use capability::{
    extract_json, AgentRole, Capability, CapabilityFailure, CapabilityRequest, ContextDocument,
    Invoker, Purpose, RetryPolicy, TextArtifact,
};
pub use claude::{ClaudeHeadless, DEFAULT_TIMEOUT_SECS};
pub use convergence::{
    CapabilityDrafter, ConvergenceLoop, ConvergenceOutcome, Draft, Evaluation, Evaluator,
    PriorFeedback, Producer,
};
pub use gate::{format_answer, parse_decision, ConsoleGate, GateDecision, GateRequest, HumanGate};
pub use handoff::{assemble as assemble_handoff, handoff_context, HandoffGenerator};
pub use pipeline::{describe_levels, PipelineController, PipelineReport, TaskReport};
pub use pool::{SessionHandle, SessionInfo, SessionPool};
pub use review::{Candidate, ReviewAgents};
pub use scheduler::{BlockedTask, ExecutionReport, HaltedTask, Scheduler, SchedulerEvent};
pub use session::{ExecutorSettings, SharedContext, TaskExecutor, TaskOutcome};
