//! Agents
//!
//! An agent owns a conversation history and a streaming connection to one
//! model. [`Agent::send_user_turn`] runs the stream → parse → dispatch
//! loop: text events go to the output sink, file operations are executed
//! (or queued under plan mode) with their results fed back as synthetic
//! user turns, summaries and plans are collected for the manager and
//! orchestrator.

pub mod events;
pub mod manager;
pub mod parser;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ai::{AiClient, ChatMessage, ClientConfig, StreamPart, Usage};
use crate::config::AgentProfile;
use crate::constants::agent::{ESTIMATE_BYTES_PER_TOKEN, MAX_TOOL_TURNS};
use crate::error::{OrchestratorError, Result};
use crate::tools::{ToolExecutor, ToolResult};
use events::AgentEvent;
use parser::{FileOperation, ParseEvent, TagParser};

/// Opaque agent identifier; `main` is reserved for the primary agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn main() -> Self {
        Self("main".to_string())
    }

    /// Role name plus a short uuid suffix, e.g. `reviewer-3fa9c1d2`.
    pub fn generate(role: AgentRole) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{role}-{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_main(&self) -> bool {
        self.0 == "main"
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Closed set of agent specialisations. A role is configuration, not code:
/// a (prompt, model, temperature, token cap) tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Main,
    Reviewer,
    Researcher,
    Implementer,
    Tester,
    Optimizer,
}

impl AgentRole {
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Main,
        AgentRole::Reviewer,
        AgentRole::Researcher,
        AgentRole::Implementer,
        AgentRole::Tester,
        AgentRole::Optimizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Reviewer => "reviewer",
            Self::Researcher => "researcher",
            Self::Implementer => "implementer",
            Self::Tester => "tester",
            Self::Optimizer => "optimizer",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or(())
    }
}

/// Agent lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Idle,
    Working,
    Completed,
    Error,
    Terminated,
}

/// Text a sub-agent emitted between `[SUMMARY]` markers, addressed to its
/// parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub source_agent_id: AgentId,
    pub task_description: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// What one user turn produced, beyond what already went to the sink.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Raw assistant text accumulated over the turn (tags included).
    pub response_text: String,
    /// `[PLAN]` bodies, in emission order, for the orchestrator to parse.
    pub plans: Vec<String>,
    pub usage: Usage,
    pub usage_estimated: bool,
}

/// A conversation-owning agent bound to one model.
pub struct Agent {
    id: AgentId,
    role: AgentRole,
    client: AiClient,
    stream_enabled: bool,
    history: Vec<ChatMessage>,
    pending_summary: Option<StructuredSummary>,
    parent_id: Option<AgentId>,
    spawn_time: DateTime<Utc>,
    task_description: String,
    plan_mode: bool,
    queued_file_ops: Vec<FileOperation>,
    executor: Arc<ToolExecutor>,
    sink: mpsc::UnboundedSender<AgentEvent>,
}

impl Agent {
    pub fn new(
        id: AgentId,
        profile: &AgentProfile,
        parent_id: Option<AgentId>,
        task_description: impl Into<String>,
        plan_mode: bool,
        executor: Arc<ToolExecutor>,
        sink: mpsc::UnboundedSender<AgentEvent>,
    ) -> Self {
        Self {
            id,
            role: profile.role,
            client: AiClient::new(ClientConfig::from_profile(profile)),
            stream_enabled: profile.stream_enabled,
            history: vec![ChatMessage::system(profile.system_prompt.clone())],
            pending_summary: None,
            parent_id,
            spawn_time: Utc::now(),
            task_description: task_description.into(),
            plan_mode,
            queued_file_ops: Vec::new(),
            executor,
            sink,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn parent_id(&self) -> Option<&AgentId> {
        self.parent_id.as_ref()
    }

    pub fn spawn_time(&self) -> DateTime<Utc> {
        self.spawn_time
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// File operations queued under plan mode, awaiting an approved plan.
    pub fn queued_file_ops(&self) -> &[FileOperation] {
        &self.queued_file_ops
    }

    /// Take the most recent summary, clearing it.
    pub fn take_pending_summary(&mut self) -> Option<StructuredSummary> {
        self.pending_summary.take()
    }

    /// Append a message from another agent. Does not trigger a completion.
    pub fn receive_message(&mut self, from: &AgentId, text: &str) {
        self.history
            .push(ChatMessage::user(format!("[FROM {from}] {text}")));
    }

    /// Clear history down to the system prompt.
    pub fn reset_history(&mut self) {
        self.history.truncate(1);
        self.pending_summary = None;
        self.queued_file_ops.clear();
        info!(agent = %self.id, "conversation reset");
    }

    /// Send a user turn and run the completion loop until the model stops
    /// asking for tool work (or the turn cap is reached).
    pub async fn send_user_turn(&mut self, text: &str) -> Result<TurnOutcome> {
        self.history.push(ChatMessage::user(text));

        let mut outcome = TurnOutcome::default();
        for turn in 1..=MAX_TOOL_TURNS {
            let collected = self.stream_once().await?;

            if !collected.raw.is_empty() {
                self.history.push(ChatMessage::assistant(collected.raw.clone()));
                outcome.response_text.push_str(&collected.raw);
            }
            outcome.plans.extend(collected.plans);

            if collected.usage.total_tokens > 0 {
                outcome.usage.prompt_tokens += collected.usage.prompt_tokens;
                outcome.usage.completion_tokens += collected.usage.completion_tokens;
            } else {
                outcome.usage.completion_tokens +=
                    collected.raw.len() / ESTIMATE_BYTES_PER_TOKEN;
                outcome.usage_estimated = true;
            }
            outcome.usage.total_tokens =
                outcome.usage.prompt_tokens + outcome.usage.completion_tokens;

            if let Some(text) = collected.summary {
                self.pending_summary = Some(StructuredSummary {
                    source_agent_id: self.id.clone(),
                    task_description: self.task_description.clone(),
                    text,
                    created_at: Utc::now(),
                });
            }

            if collected.file_ops.is_empty() {
                break;
            }

            // Plan mode: the main agent's direct file ops become
            // suggestions, not executions.
            if self.id.is_main() && self.plan_mode {
                for op in collected.file_ops {
                    self.emit(AgentEvent::FileOpQueued {
                        agent_id: self.id.clone(),
                        description: describe_op(&op),
                    });
                    self.queued_file_ops.push(op);
                }
                break;
            }

            let results = self.execute_file_ops(collected.file_ops).await;
            self.history.push(ChatMessage::user(results));

            if turn == MAX_TOOL_TURNS {
                warn!(agent = %self.id, "tool turn cap reached, ending turn");
            }
        }

        self.emit(AgentEvent::TurnStats {
            agent_id: self.id.clone(),
            prompt_tokens: outcome.usage.prompt_tokens,
            completion_tokens: outcome.usage.completion_tokens,
            estimated: outcome.usage_estimated,
        });

        Ok(outcome)
    }

    /// One completion request: stream deltas through the tag parser,
    /// forwarding text to the sink and collecting structured events.
    async fn stream_once(&mut self) -> Result<Collected> {
        let mut collected = Collected::default();
        let mut parser = TagParser::new();

        if self.stream_enabled {
            let mut rx = self
                .client
                .call_streaming(&self.history)
                .await
                .map_err(|e| OrchestratorError::Upstream(e.to_string()))?;

            while let Some(part) = rx.recv().await {
                match part {
                    StreamPart::TextDelta { delta } => {
                        collected.raw.push_str(&delta);
                        let events = parser.push(&delta);
                        self.consume(events, &mut collected);
                    }
                    StreamPart::Usage { usage } => collected.usage = usage,
                    StreamPart::Error { error } => {
                        return Err(OrchestratorError::Upstream(error));
                    }
                }
            }
        } else {
            let (content, usage) = self
                .client
                .call(&self.history)
                .await
                .map_err(|e| OrchestratorError::Upstream(e.to_string()))?;
            collected.raw = content.clone();
            if let Some(usage) = usage {
                collected.usage = usage;
            }
            let events = parser.push(&content);
            self.consume(events, &mut collected);
        }

        let events = parser.finish();
        self.consume(events, &mut collected);
        debug!(
            agent = %self.id,
            chars = collected.raw.len(),
            file_ops = collected.file_ops.len(),
            "stream closed"
        );
        Ok(collected)
    }

    fn consume(&self, events: Vec<ParseEvent>, collected: &mut Collected) {
        for event in events {
            match event {
                ParseEvent::Text { role, chunk } => {
                    self.emit(AgentEvent::TextDelta {
                        agent_id: self.id.clone(),
                        role: self.role,
                        kind: role,
                        delta: chunk,
                    });
                }
                ParseEvent::Summary { text } => {
                    self.emit(AgentEvent::SummaryCaptured {
                        agent_id: self.id.clone(),
                        role: self.role,
                        text: text.clone(),
                    });
                    collected.summary = Some(text);
                }
                ParseEvent::Plan { text } => {
                    self.emit(AgentEvent::PlanDetected {
                        agent_id: self.id.clone(),
                    });
                    collected.plans.push(text);
                }
                ParseEvent::FileOp { op } => collected.file_ops.push(op),
            }
        }
    }

    /// Execute embedded file operations, emitting a tool-result turn for
    /// the model to react to.
    async fn execute_file_ops(&mut self, ops: Vec<FileOperation>) -> String {
        let mut feedback = String::new();
        for op in ops {
            let description = describe_op(&op);
            let result = self.dispatch_op(&op).await;
            self.emit(AgentEvent::ToolResult {
                agent_id: self.id.clone(),
                tool: description.clone(),
                success: result.success,
            });

            feedback.push_str("[TOOL RESULT] ");
            feedback.push_str(&description);
            feedback.push_str(": ");
            if result.success {
                feedback.push_str(result.stdout.as_deref().unwrap_or("ok"));
            } else {
                feedback.push_str("error: ");
                feedback.push_str(result.error.as_deref().unwrap_or("failed"));
            }
            feedback.push('\n');
        }
        feedback
    }

    async fn dispatch_op(&self, op: &FileOperation) -> ToolResult {
        match op {
            FileOperation::Read { path } => self.executor.read_file(path).await,
            FileOperation::Write { path, content } => {
                self.executor.write_file(path, content, true).await
            }
            FileOperation::Edit { path, find, replace } => {
                self.executor.edit_file(path, find, replace).await
            }
        }
    }

    fn emit(&self, event: AgentEvent) {
        // A dropped sink must never take the agent down with it.
        let _ = self.sink.send(event);
    }
}

#[derive(Default)]
struct Collected {
    raw: String,
    summary: Option<String>,
    plans: Vec<String>,
    file_ops: Vec<FileOperation>,
    usage: Usage,
}

fn describe_op(op: &FileOperation) -> String {
    match op {
        FileOperation::Read { path } => format!("read {path}"),
        FileOperation::Write { path, .. } => format!("write {path}"),
        FileOperation::Edit { path, .. } => format!("edit {path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_round_trip() {
        for role in AgentRole::ALL {
            assert_eq!(role.as_str().parse::<AgentRole>().unwrap(), role);
        }
        assert!("wizard".parse::<AgentRole>().is_err());
    }

    #[test]
    fn generated_ids_carry_role_and_are_unique() {
        let a = AgentId::generate(AgentRole::Reviewer);
        let b = AgentId::generate(AgentRole::Reviewer);
        assert!(a.as_str().starts_with("reviewer-"));
        assert_ne!(a, b);
        assert!(!a.is_main());
        assert!(AgentId::main().is_main());
    }
}
