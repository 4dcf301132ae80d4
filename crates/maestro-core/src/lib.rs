//! Maestro core — concurrent multi-agent orchestration runtime.
//!
//! A main agent backed by an OpenAI-compatible chat-completions endpoint
//! coordinates specialised sub-agents, each with an isolated conversation
//! history. Agents can embed tool operations and multi-step workflow plans
//! in their output; plans are validated, approved by the user, and executed
//! by a workflow engine with checkpointing and rollback.
//!
//! The CLI in `maestro-cli` is a thin presentation layer over
//! [`orchestrator::Orchestrator`].

pub mod agent;
pub mod ai;
pub mod config;
pub mod constants;
pub mod error;
pub mod orchestrator;
pub mod paths;
pub mod plan;
pub mod tools;
pub mod workflow;

pub use error::{OrchestratorError, Result};
