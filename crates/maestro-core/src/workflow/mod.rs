//! Workflow execution
//!
//! Executes approved plans step by step in topological order, with
//! checkpoints before mutating steps, bounded retries, reverse-order
//! rollback on failure, and resumable persisted state.

pub mod engine;
pub mod state;

pub use engine::{ExecutionSummary, ProgressEvent, ProgressKind, WorkflowEngine, WorkflowOutcome};
pub use state::{Checkpoint, WorkflowState};
