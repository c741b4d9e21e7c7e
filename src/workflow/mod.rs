//! Pipeline lifecycle types for the specflow orchestrator.
//!
//! Stage identifiers, gate kinds, the stage-transition state machine, and
//! the run journal.

mod journal;
mod state;
mod types;

pub use journal::{parse_records, Journal, JournalTag};
pub use state::{PipelineState, StageHistoryEntry};
pub use types::{GateKind, PipelineId, PipelineStage, PipelineStatus};
