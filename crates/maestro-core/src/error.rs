//! Error types for maestro-core
//!
//! Tool failures are deliberately absent: the tool executor returns
//! structured [`crate::tools::ToolResult`] values and never propagates an
//! error to its caller.

use thiserror::Error;

/// Orchestrator error type
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed config, missing required secret, unknown role. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Spawn rejected by the concurrent-agent cap.
    #[error("capacity: {active} active agents (max {max})")]
    Capacity { active: usize, max: usize },

    /// HTTP 4xx/5xx, connection refused, or malformed SSE from the provider.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Plan failed validation; rejected before execution.
    #[error("plan validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Step retries exhausted or rollback was required.
    #[error("execution failed: {0}")]
    Execution(String),

    /// No agent registered under this id.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// No pending plan under this id.
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    /// Internal cancellation signal.
    #[error("cancelled")]
    Cancelled,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, OrchestratorError>;
