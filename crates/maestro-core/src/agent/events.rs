//! Canonical event protocol for the orchestrator's output sink.
//!
//! Every agent emits these as it streams; the CLI (or any other consumer)
//! maps them to its own presentation. Events from a single agent arrive in
//! production order.

use serde::Serialize;

use super::parser::TextRole;
use super::{AgentId, AgentRole, AgentStatus};

/// Events emitted by agents and the manager.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Text content delta, tagged with the emitting agent and which stream
    /// (thinking or response) it belongs to.
    TextDelta {
        agent_id: AgentId,
        role: AgentRole,
        kind: TextRole,
        delta: String,
    },

    /// A `[SUMMARY]` block closed in a sub-agent's stream.
    SummaryCaptured {
        agent_id: AgentId,
        role: AgentRole,
        text: String,
    },

    /// A summary was appended to the parent's history.
    SummaryDelivered { from: AgentId, to: AgentId },

    /// A `[PLAN]` block closed in an agent's stream.
    PlanDetected { agent_id: AgentId },

    /// Plan mode queued a file operation instead of executing it.
    FileOpQueued { agent_id: AgentId, description: String },

    /// A file operation from the stream was executed.
    ToolResult {
        agent_id: AgentId,
        tool: String,
        success: bool,
    },

    /// Lifecycle transition.
    StatusChanged {
        agent_id: AgentId,
        status: AgentStatus,
    },

    AgentSpawned {
        agent_id: AgentId,
        role: AgentRole,
        task: String,
    },

    AgentTerminated { agent_id: AgentId },

    /// Per-turn token accounting; `estimated` marks counts derived from
    /// byte length rather than provider usage.
    TurnStats {
        agent_id: AgentId,
        prompt_tokens: usize,
        completion_tokens: usize,
        estimated: bool,
    },

    Error { agent_id: AgentId, error: String },
}
