//! Specflow: staged multi-agent development pipeline.
//!
//! A request is clarified, specified and planned under human approval. The
//! approved plan becomes a task graph that is executed level by level, each
//! task in its own coding session with a bounded coder/reviewer cycle, and
//! the result goes through a final human approval with targeted rework.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod workflow;

pub use error::{Error, Result};
