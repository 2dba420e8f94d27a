//! The concurrent log-set processing engine.
//!
//! The orchestrator decomposes a log set into per-file tasks, runs them on a
//! fixed worker pool over a bounded queue, fans parsed lines out to the
//! consumers registered for each log type, classifies failures, and folds
//! everything into a structured run result.

mod processor;
mod types;
mod worker;

pub use processor::ProcessingEngine;
pub use types::{FileResult, FileTask, RunResult, TypeResult};
