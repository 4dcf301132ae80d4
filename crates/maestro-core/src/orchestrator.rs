//! Orchestrator
//!
//! The surface the CLI drives. Wires the agent manager, tool executor,
//! plan parser, and workflow engine together: user lines go to the main
//! agent, plans lifted from its stream are held as drafts until the user
//! approves or rejects them, and approved plans run on the engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::agent::events::AgentEvent;
use crate::agent::manager::{AgentManager, AgentSnapshot, ManagerStats};
use crate::agent::{AgentId, AgentRole};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::plan::{Plan, PlanParser, PlanStatus};
use crate::tools::ToolExecutor;
use crate::workflow::{ExecutionSummary, ProgressEvent, WorkflowEngine, WorkflowOutcome};

/// Listing view of a draft plan.
#[derive(Debug, Clone, Serialize)]
pub struct PendingPlan {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub steps: usize,
    pub total_estimated_seconds: u64,
    pub estimated_cost: f64,
}

/// Aggregate system statistics.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub agents: ManagerStats,
    pub pending_plans: usize,
    pub last_workflow: Option<ExecutionSummary>,
}

/// Top-level runtime handle.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    manager: Arc<AgentManager>,
    engine: Arc<WorkflowEngine>,
    plan_parser: PlanParser,
    pending_plans: Mutex<HashMap<Uuid, Plan>>,
}

impl Orchestrator {
    /// Build the runtime. Returns the orchestrator plus the output-sink
    /// receiver the caller renders events from.
    pub fn new(
        config: OrchestratorConfig,
        working_dir: PathBuf,
        state_path: Option<PathBuf>,
        progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<AgentEvent>)> {
        let config = Arc::new(config);
        let executor = Arc::new(ToolExecutor::new(
            working_dir,
            config.file_ops.clone(),
            config.tool_policy.clone(),
        ));

        let (sink, events) = mpsc::unbounded_channel();
        let manager = Arc::new(AgentManager::new(
            config.clone(),
            executor.clone(),
            sink,
        ));
        manager.init_main()?;

        let mut engine = WorkflowEngine::new(executor);
        if let Some(path) = state_path {
            engine = engine.with_state_path(path);
        }
        if let Some(callback) = progress {
            engine = engine.with_progress(callback);
        }

        Ok((
            Self {
                config,
                manager,
                engine: Arc::new(engine),
                plan_parser: PlanParser::new(),
                pending_plans: Mutex::new(HashMap::new()),
            },
            events,
        ))
    }

    // ── Conversation ───────────────────────────────────────────────────

    /// Handle one user line: auto-spawn on keywords, run the main agent's
    /// turn, and collect any plans it proposed. Returns ids of drafts now
    /// awaiting approval.
    pub async fn handle_user_line(&self, text: &str) -> Result<Vec<Uuid>> {
        self.manager.check_and_auto_spawn(text);

        let outcome = self.manager.run_turn(&AgentId::main(), text).await?;

        let mut submitted = Vec::new();
        for plan_text in &outcome.plans {
            if let Some(plan) = self.plan_parser.parse(plan_text) {
                submitted.push(self.submit_plan(plan));
            }
        }
        Ok(submitted)
    }

    /// Send a line straight to one agent (`@agent_id` syntax).
    pub async fn route_direct(&self, agent_id: &str, text: &str) -> Result<()> {
        self.manager
            .route_direct(&AgentId::from(agent_id), text)
            .await?;
        Ok(())
    }

    /// Reset the main conversation to its system prompt.
    pub async fn reset(&self) -> Result<()> {
        self.manager.reset_history(&AgentId::main()).await
    }

    // ── Agents ─────────────────────────────────────────────────────────

    pub fn spawn(&self, role: &str, task: &str) -> Result<AgentId> {
        let role: AgentRole = role
            .parse()
            .map_err(|_| OrchestratorError::Configuration(format!("unknown role '{role}'")))?;
        self.manager.spawn(role, task, None)
    }

    pub fn terminate(&self, agent_id: &str) -> Result<()> {
        self.manager.terminate(&AgentId::from(agent_id))
    }

    pub fn terminate_all_subagents(&self) -> Vec<AgentId> {
        self.manager.terminate_children(&AgentId::main())
    }

    pub fn list_agents(&self) -> Vec<AgentSnapshot> {
        self.manager.list()
    }

    // ── Plans & workflows ──────────────────────────────────────────────

    /// Register a draft plan awaiting approval.
    pub fn submit_plan(&self, plan: Plan) -> Uuid {
        let id = plan.id;
        info!(plan = %plan.name, steps = plan.steps.len(), "plan submitted for approval");
        self.pending_plans
            .lock()
            .expect("plans lock")
            .insert(id, plan);
        id
    }

    pub fn pending_plans(&self) -> Vec<PendingPlan> {
        let costs: HashMap<String, f64> = self
            .config
            .role_costs()
            .into_iter()
            .map(|(role, cost)| (role.to_string(), cost))
            .collect();

        let plans = self.pending_plans.lock().expect("plans lock");
        let mut listing: Vec<PendingPlan> = plans
            .values()
            .map(|p| PendingPlan {
                id: p.id,
                name: p.name.clone(),
                description: p.description.clone(),
                steps: p.steps.len(),
                total_estimated_seconds: p.total_estimated_seconds(),
                estimated_cost: p.estimated_cost(&costs),
            })
            .collect();
        listing.sort_by_key(|p| p.id);
        listing
    }

    pub fn plan_details(&self, plan_id: Uuid) -> Option<Plan> {
        self.pending_plans
            .lock()
            .expect("plans lock")
            .get(&plan_id)
            .cloned()
    }

    /// Approve a draft and execute it. The plan leaves the pending set
    /// whatever the outcome; a rejected validation is reported in the
    /// outcome message.
    pub async fn approve(&self, plan_id: Uuid) -> Result<WorkflowOutcome> {
        let mut plan = self
            .pending_plans
            .lock()
            .expect("plans lock")
            .remove(&plan_id)
            .ok_or_else(|| OrchestratorError::UnknownPlan(plan_id.to_string()))?;

        plan.approved = true;
        plan.status = PlanStatus::Approved;

        let catalogue = self.manager.catalogue();
        let outcome = self.engine.execute(&mut plan, &catalogue).await;
        info!(
            plan = %plan.name,
            success = outcome.success,
            message = %outcome.message,
            "workflow finished"
        );
        Ok(outcome)
    }

    pub fn reject(&self, plan_id: Uuid) -> Result<String> {
        let plan = self
            .pending_plans
            .lock()
            .expect("plans lock")
            .remove(&plan_id)
            .ok_or_else(|| OrchestratorError::UnknownPlan(plan_id.to_string()))?;
        info!(plan = %plan.name, "plan rejected");
        Ok(plan.name)
    }

    pub fn cancel_workflow(&self) {
        self.engine.cancel();
    }

    pub fn pause_workflow(&self) {
        self.engine.pause();
    }

    pub fn resume_workflow(&self) {
        self.engine.resume();
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            agents: self.manager.stats(),
            pending_plans: self.pending_plans.lock().expect("plans lock").len(),
            last_workflow: self.engine.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secrets::SecretStore;
    use crate::plan::PlanStep;
    use serde_json::json;
    use tempfile::TempDir;

    fn orchestrator() -> (Orchestrator, TempDir) {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let json = format!(
            r#"{{
                "file_ops": {{"allowed_directories": ["{}"]}},
                "profiles": {{
                    "main": {{
                        "provider": "ollama",
                        "base_url": "http://127.0.0.1:1",
                        "model_id": "big"
                    }}
                }}
            }}"#,
            work.display()
        );
        let config = OrchestratorConfig::from_json(&json, &SecretStore::empty()).unwrap();
        let (orchestrator, _events) = Orchestrator::new(config, work, None, None).unwrap();
        (orchestrator, tmp)
    }

    fn runnable_plan(work: &std::path::Path) -> Plan {
        let mut plan = Plan::new("write one file", "");
        let mut step = PlanStep::new(1, "write a.txt");
        step.tool = "write_file_tool".to_string();
        step.arguments = json!({
            "path": work.join("a.txt").display().to_string(),
            "content": "from plan"
        });
        plan.steps.push(step);
        plan
    }

    #[tokio::test]
    async fn approve_executes_pending_plan() {
        let (orchestrator, tmp) = orchestrator();
        let work = tmp.path().join("work");

        let id = orchestrator.submit_plan(runnable_plan(&work));
        assert_eq!(orchestrator.pending_plans().len(), 1);

        let outcome = orchestrator.approve(id).await.unwrap();
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(
            std::fs::read_to_string(work.join("a.txt")).unwrap(),
            "from plan"
        );
        assert!(orchestrator.pending_plans().is_empty());
    }

    #[tokio::test]
    async fn reject_removes_pending_plan() {
        let (orchestrator, tmp) = orchestrator();
        let id = orchestrator.submit_plan(runnable_plan(&tmp.path().join("work")));

        let name = orchestrator.reject(id).unwrap();
        assert_eq!(name, "write one file");
        assert!(orchestrator.pending_plans().is_empty());
        assert!(matches!(
            orchestrator.reject(id),
            Err(OrchestratorError::UnknownPlan(_))
        ));
    }

    #[tokio::test]
    async fn unknown_plan_id_is_an_error() {
        let (orchestrator, _tmp) = orchestrator();
        assert!(matches!(
            orchestrator.approve(Uuid::new_v4()).await,
            Err(OrchestratorError::UnknownPlan(_))
        ));
    }

    #[tokio::test]
    async fn spawn_with_unknown_role_fails() {
        let (orchestrator, _tmp) = orchestrator();
        assert!(orchestrator.spawn("wizard", "task").is_err());
        // Known role without a configured profile also fails cleanly.
        assert!(orchestrator.spawn("reviewer", "task").is_err());
    }

    #[tokio::test]
    async fn stats_cover_agents_and_plans() {
        let (orchestrator, tmp) = orchestrator();
        orchestrator.submit_plan(runnable_plan(&tmp.path().join("work")));

        let stats = orchestrator.stats();
        assert_eq!(stats.agents.total_agents, 1);
        assert_eq!(stats.pending_plans, 1);
        assert!(stats.last_workflow.is_none());
    }
}
