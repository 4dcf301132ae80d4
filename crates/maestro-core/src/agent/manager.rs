//! Agent manager
//!
//! Process-wide registry of agents keyed by [`AgentId`]. The manager owns
//! every agent (behind an async mutex each); agents hold only their own id
//! and call back through handles, which keeps ownership one-way. Sub-agent
//! turns run as spawned tasks; their summaries are appended to the
//! parent's history as single user-role turns on completion.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::tools::ToolExecutor;

use super::events::AgentEvent;
use super::{Agent, AgentId, AgentRole, AgentStatus, TurnOutcome};

/// Registry view of one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub parent_id: Option<AgentId>,
    pub task: Option<String>,
}

struct AgentEntry {
    agent: Arc<AsyncMutex<Agent>>,
    snapshot: AgentSnapshot,
    handle: Option<tokio::task::JoinHandle<()>>,
}

/// Aggregate statistics over the registry.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub total_agents: usize,
    pub active_agents: usize,
    pub agents_by_role: HashMap<String, usize>,
}

/// Registry and lifecycle coordinator for all agents.
pub struct AgentManager {
    config: Arc<OrchestratorConfig>,
    executor: Arc<ToolExecutor>,
    sink: mpsc::UnboundedSender<AgentEvent>,
    registry: Mutex<HashMap<AgentId, AgentEntry>>,
}

impl AgentManager {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        executor: Arc<ToolExecutor>,
        sink: mpsc::UnboundedSender<AgentEvent>,
    ) -> Self {
        Self {
            config,
            executor,
            sink,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Create the main agent. Must be called once before any spawn.
    pub fn init_main(&self) -> Result<AgentId> {
        let profile = self
            .config
            .profile(AgentRole::Main)
            .ok_or_else(|| OrchestratorError::Configuration("no main profile".into()))?;

        let id = AgentId::main();
        let agent = Agent::new(
            id.clone(),
            profile,
            None,
            "primary orchestration agent",
            self.config.plan_mode,
            self.executor.clone(),
            self.sink.clone(),
        );
        self.insert(agent, None, None);
        self.set_status(&id, AgentStatus::Idle);
        info!(model = %profile.model_id, "main agent initialized");
        Ok(id)
    }

    /// Spawn a sub-agent for a task. The agent's first turn runs
    /// concurrently with the caller; its summary (or error report) lands in
    /// the parent's history when the stream closes.
    pub fn spawn(
        self: &Arc<Self>,
        role: AgentRole,
        task: &str,
        parent_id: Option<AgentId>,
    ) -> Result<AgentId> {
        let parent_id = parent_id.unwrap_or_else(AgentId::main);

        {
            let registry = self.registry.lock().expect("registry lock");
            let active = registry
                .values()
                .filter(|e| {
                    matches!(
                        e.snapshot.status,
                        AgentStatus::Initializing | AgentStatus::Idle | AgentStatus::Working
                    )
                })
                .count();
            if active >= self.config.max_concurrent_agents {
                return Err(OrchestratorError::Capacity {
                    active,
                    max: self.config.max_concurrent_agents,
                });
            }
            if !registry.contains_key(&parent_id) {
                return Err(OrchestratorError::UnknownAgent(parent_id.to_string()));
            }
        }

        let profile = self.config.profile(role).ok_or_else(|| {
            OrchestratorError::Configuration(format!("no profile configured for role '{role}'"))
        })?;

        let id = AgentId::generate(role);
        let agent = Agent::new(
            id.clone(),
            profile,
            Some(parent_id.clone()),
            task,
            false,
            self.executor.clone(),
            self.sink.clone(),
        );
        self.insert(agent, Some(parent_id), Some(task.to_string()));

        let _ = self.sink.send(AgentEvent::AgentSpawned {
            agent_id: id.clone(),
            role,
            task: task.to_string(),
        });
        info!(agent = %id, %role, "spawned sub-agent");

        let manager = Arc::clone(self);
        let task_id = id.clone();
        let task_text = task.to_string();
        let handle = tokio::spawn(async move {
            manager.run_subagent(task_id, task_text).await;
        });
        if let Some(entry) = self
            .registry
            .lock()
            .expect("registry lock")
            .get_mut(&id)
        {
            entry.handle = Some(handle);
        }

        Ok(id)
    }

    /// Run one turn on a registered agent, holding its lock for the whole
    /// turn so history is never shared mid-stream.
    pub async fn run_turn(&self, id: &AgentId, text: &str) -> Result<TurnOutcome> {
        let agent = self.agent_arc(id)?;
        self.set_status(id, AgentStatus::Working);

        let result = {
            let mut agent = agent.lock().await;
            agent.send_user_turn(text).await
        };

        match &result {
            Ok(_) => {
                // Main stays available; one-shot sub-agents are done.
                let next = if id.is_main() {
                    AgentStatus::Idle
                } else {
                    AgentStatus::Completed
                };
                self.set_status(id, next);
            }
            Err(e) => {
                warn!(agent = %id, error = %e, "agent turn failed");
                self.set_status(id, AgentStatus::Error);
            }
        }
        result
    }

    async fn run_subagent(self: Arc<Self>, id: AgentId, task: String) {
        match self.run_turn(&id, &task).await {
            Ok(_) => {
                if let Err(e) = self.deliver_summary(&id).await {
                    warn!(agent = %id, error = %e, "summary delivery failed");
                }
            }
            Err(e) => {
                let _ = self.sink.send(AgentEvent::Error {
                    agent_id: id.clone(),
                    error: e.to_string(),
                });
                if let Err(e) = self.deliver_error(&id, &e.to_string()).await {
                    warn!(agent = %id, error = %e, "error delivery failed");
                }
            }
        }
    }

    /// Move a finished sub-agent's pending summary into its parent's
    /// history as a `[SUMMARY from <role>]` user turn.
    pub async fn deliver_summary(&self, from: &AgentId) -> Result<()> {
        let agent = self.agent_arc(from)?;
        let (summary, role, parent_id) = {
            let mut agent = agent.lock().await;
            let parent = agent.parent_id().cloned();
            (agent.take_pending_summary(), agent.role(), parent)
        };

        let Some(summary) = summary else {
            return Ok(());
        };
        let Some(parent_id) = parent_id else {
            return Ok(());
        };

        let parent = self.agent_arc(&parent_id)?;
        {
            let mut parent = parent.lock().await;
            parent.receive_message(from, &format!("[SUMMARY from {role}] {}", summary.text));
        }
        let _ = self.sink.send(AgentEvent::SummaryDelivered {
            from: from.clone(),
            to: parent_id,
        });
        Ok(())
    }

    async fn deliver_error(&self, from: &AgentId, error: &str) -> Result<()> {
        let agent = self.agent_arc(from)?;
        let (role, parent_id) = {
            let agent = agent.lock().await;
            (agent.role(), agent.parent_id().cloned())
        };
        let Some(parent_id) = parent_id else {
            return Ok(());
        };

        let parent = self.agent_arc(&parent_id)?;
        let mut parent = parent.lock().await;
        parent.receive_message(from, &format!("[ERROR from {role}] {error}"));
        Ok(())
    }

    /// Send a line straight to a specific agent (`@agent_id` syntax).
    pub async fn route_direct(&self, to: &AgentId, text: &str) -> Result<TurnOutcome> {
        self.run_turn(to, text).await
    }

    /// Clear an agent's conversation down to its system prompt.
    pub async fn reset_history(&self, id: &AgentId) -> Result<()> {
        let agent = self.agent_arc(id)?;
        agent.lock().await.reset_history();
        Ok(())
    }

    /// Cancel an agent's in-flight work and mark it terminated.
    pub fn terminate(&self, id: &AgentId) -> Result<()> {
        let mut registry = self.registry.lock().expect("registry lock");
        let entry = registry
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::UnknownAgent(id.to_string()))?;

        if let Some(handle) = entry.handle.take() {
            // Aborting drops the in-flight HTTP stream at its next await.
            handle.abort();
        }
        entry.snapshot.status = AgentStatus::Terminated;
        drop(registry);

        let _ = self.sink.send(AgentEvent::AgentTerminated { agent_id: id.clone() });
        let _ = self.sink.send(AgentEvent::StatusChanged {
            agent_id: id.clone(),
            status: AgentStatus::Terminated,
        });
        info!(agent = %id, "terminated");
        Ok(())
    }

    /// Terminate every sub-agent of a parent.
    pub fn terminate_children(&self, parent_id: &AgentId) -> Vec<AgentId> {
        let children: Vec<AgentId> = {
            let registry = self.registry.lock().expect("registry lock");
            registry
                .values()
                .filter(|e| {
                    e.snapshot.parent_id.as_ref() == Some(parent_id)
                        && e.snapshot.status != AgentStatus::Terminated
                })
                .map(|e| e.snapshot.id.clone())
                .collect()
        };
        for child in &children {
            let _ = self.terminate(child);
        }
        children
    }

    /// Scan user input for role keywords and spawn matching agents.
    /// Capacity rejections are logged, not fatal.
    pub fn check_and_auto_spawn(self: &Arc<Self>, user_text: &str) -> Vec<AgentId> {
        if !self.config.auto_spawn_on_keywords {
            return Vec::new();
        }

        let lower = user_text.to_lowercase();
        let mut spawned = Vec::new();
        for role in AgentRole::ALL {
            if role == AgentRole::Main {
                continue;
            }
            let Some(profile) = self.config.profile(role) else {
                continue;
            };
            let matched = profile
                .spawn_keywords
                .iter()
                .any(|keyword| lower.contains(&keyword.to_lowercase()));
            if !matched {
                continue;
            }

            match self.spawn(role, user_text, None) {
                Ok(id) => spawned.push(id),
                Err(e) => warn!(%role, error = %e, "auto-spawn rejected"),
            }
        }
        spawned
    }

    pub fn list(&self) -> Vec<AgentSnapshot> {
        let registry = self.registry.lock().expect("registry lock");
        let mut agents: Vec<AgentSnapshot> =
            registry.values().map(|e| e.snapshot.clone()).collect();
        agents.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        agents
    }

    /// Runtime agent catalogue for plan validation: role names plus live
    /// agent ids.
    pub fn catalogue(&self) -> BTreeSet<String> {
        let mut catalogue: BTreeSet<String> =
            self.config.roles().map(|r| r.to_string()).collect();
        let registry = self.registry.lock().expect("registry lock");
        catalogue.extend(registry.keys().map(|id| id.to_string()));
        catalogue
    }

    pub fn stats(&self) -> ManagerStats {
        let registry = self.registry.lock().expect("registry lock");
        let mut by_role: HashMap<String, usize> = HashMap::new();
        let mut active = 0;
        for entry in registry.values() {
            *by_role
                .entry(entry.snapshot.role.to_string())
                .or_default() += 1;
            if !matches!(
                entry.snapshot.status,
                AgentStatus::Terminated | AgentStatus::Completed | AgentStatus::Error
            ) {
                active += 1;
            }
        }
        ManagerStats {
            total_agents: registry.len(),
            active_agents: active,
            agents_by_role: by_role,
        }
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn insert(&self, agent: Agent, parent_id: Option<AgentId>, task: Option<String>) {
        let snapshot = AgentSnapshot {
            id: agent.id().clone(),
            role: agent.role(),
            status: AgentStatus::Initializing,
            started_at: agent.spawn_time(),
            parent_id,
            task,
        };
        let mut registry = self.registry.lock().expect("registry lock");
        registry.insert(
            snapshot.id.clone(),
            AgentEntry {
                agent: Arc::new(AsyncMutex::new(agent)),
                snapshot,
                handle: None,
            },
        );
    }

    fn agent_arc(&self, id: &AgentId) -> Result<Arc<AsyncMutex<Agent>>> {
        let registry = self.registry.lock().expect("registry lock");
        registry
            .get(id)
            .map(|e| Arc::clone(&e.agent))
            .ok_or_else(|| OrchestratorError::UnknownAgent(id.to_string()))
    }

    fn set_status(&self, id: &AgentId, status: AgentStatus) {
        {
            let mut registry = self.registry.lock().expect("registry lock");
            if let Some(entry) = registry.get_mut(id) {
                // Terminated is terminal.
                if entry.snapshot.status == AgentStatus::Terminated {
                    return;
                }
                entry.snapshot.status = status;
            } else {
                return;
            }
        }
        let _ = self.sink.send(AgentEvent::StatusChanged {
            agent_id: id.clone(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secrets::SecretStore;
    use crate::config::{FileOpsPolicy, ToolPolicy};
    use tempfile::TempDir;

    fn test_config(max_agents: usize) -> Arc<OrchestratorConfig> {
        let json = format!(
            r#"{{
                "max_concurrent_agents": {max_agents},
                "auto_spawn_on_keywords": true,
                "profiles": {{
                    "main": {{
                        "provider": "ollama",
                        "base_url": "http://127.0.0.1:1",
                        "model_id": "big"
                    }},
                    "reviewer": {{
                        "provider": "ollama",
                        "base_url": "http://127.0.0.1:1",
                        "model_id": "small",
                        "spawn_keywords": ["review", "check"]
                    }}
                }}
            }}"#
        );
        Arc::new(OrchestratorConfig::from_json(&json, &SecretStore::empty()).unwrap())
    }

    fn manager(max_agents: usize) -> (Arc<AgentManager>, mpsc::UnboundedReceiver<AgentEvent>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().to_path_buf();
        let executor = Arc::new(ToolExecutor::new(
            work.clone(),
            FileOpsPolicy {
                allowed_directories: vec![work],
                ..Default::default()
            },
            ToolPolicy::default(),
        ));
        let (sink, events) = mpsc::unbounded_channel();
        let manager = Arc::new(AgentManager::new(test_config(max_agents), executor, sink));
        manager.init_main().unwrap();
        (manager, events, tmp)
    }

    #[tokio::test]
    async fn main_agent_registers_idle() {
        let (manager, _events, _tmp) = manager(4);
        let agents = manager.list();
        assert_eq!(agents.len(), 1);
        assert!(agents[0].id.is_main());
        assert_eq!(agents[0].status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn capacity_gate_rejects_spawn() {
        // Cap of 1 is consumed by the main agent.
        let (manager, _events, _tmp) = manager(1);
        let err = manager
            .spawn(AgentRole::Reviewer, "check this", None)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Capacity { .. }));
    }

    #[tokio::test]
    async fn spawned_agent_is_listed_with_parent() {
        let (manager, _events, _tmp) = manager(4);
        let id = manager
            .spawn(AgentRole::Reviewer, "review the diff", None)
            .unwrap();

        let agents = manager.list();
        let entry = agents.iter().find(|a| a.id == id).unwrap();
        assert_eq!(entry.role, AgentRole::Reviewer);
        assert_eq!(entry.parent_id, Some(AgentId::main()));
        assert_eq!(entry.task.as_deref(), Some("review the diff"));

        // The unreachable endpoint fails the turn; the registry must end in
        // error, not hang.
        for _ in 0..200 {
            let status = manager
                .list()
                .iter()
                .find(|a| a.id == id)
                .unwrap()
                .status;
            if status == AgentStatus::Error {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("sub-agent never reached error state");
    }

    #[tokio::test]
    async fn failed_subagent_reports_error_to_parent() {
        let (manager, _events, _tmp) = manager(4);
        let id = manager
            .spawn(AgentRole::Reviewer, "review something", None)
            .unwrap();

        for _ in 0..200 {
            let main = manager.agent_arc(&AgentId::main()).unwrap();
            let history_hit = {
                let main = main.lock().await;
                main.history().iter().any(|m| {
                    m.content.contains("[ERROR from reviewer]")
                        && m.content.contains(&format!("[FROM {id}]"))
                })
            };
            if history_hit {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("error report never reached the parent history");
    }

    #[tokio::test]
    async fn terminate_marks_and_is_terminal() {
        let (manager, _events, _tmp) = manager(4);
        let id = manager
            .spawn(AgentRole::Reviewer, "review", None)
            .unwrap();

        manager.terminate(&id).unwrap();
        let status = manager.list().iter().find(|a| a.id == id).unwrap().status;
        assert_eq!(status, AgentStatus::Terminated);

        // Late status writes do not resurrect it.
        manager.set_status(&id, AgentStatus::Idle);
        let status = manager.list().iter().find(|a| a.id == id).unwrap().status;
        assert_eq!(status, AgentStatus::Terminated);
    }

    #[tokio::test]
    async fn auto_spawn_matches_keywords() {
        let (manager, _events, _tmp) = manager(8);
        let spawned = manager.check_and_auto_spawn("please review my patch");
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].as_str().starts_with("reviewer-"));

        assert!(manager.check_and_auto_spawn("nothing relevant").is_empty());
    }

    #[tokio::test]
    async fn catalogue_includes_roles_and_live_ids() {
        let (manager, _events, _tmp) = manager(4);
        let id = manager.spawn(AgentRole::Reviewer, "review", None).unwrap();

        let catalogue = manager.catalogue();
        assert!(catalogue.contains("main"));
        assert!(catalogue.contains("reviewer"));
        assert!(catalogue.contains(id.as_str()));
    }

    #[tokio::test]
    async fn unknown_agent_is_an_error() {
        let (manager, _events, _tmp) = manager(4);
        let ghost = AgentId::from("ghost-123");
        assert!(matches!(
            manager.terminate(&ghost),
            Err(OrchestratorError::UnknownAgent(_))
        ));
        assert!(manager.run_turn(&ghost, "hi").await.is_err());
    }
}
