//! Plan data model
//!
//! A plan is an acyclic set of steps, each binding an agent to a tool
//! invocation. Steps reference each other by UUID; `agent_id` and `tool`
//! stay raw strings so the parser can retain unknown references verbatim
//! for validation to flag.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tools::{ToolResult, ToolSpec};

/// Status of a plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Status of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Approved,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One node in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: Uuid,
    /// Textual step number from the source plan; breaks topological ties.
    pub order_hint: u32,
    pub description: String,
    pub agent_id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub dependencies: BTreeSet<Uuid>,
    pub estimated_seconds: u64,
    pub status: StepStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Default time estimate when a step declares none.
pub const DEFAULT_STEP_SECONDS: u64 = 30;

impl PlanStep {
    pub fn new(order_hint: u32, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_hint,
            description: description.into(),
            agent_id: "main".to_string(),
            tool: String::new(),
            arguments: serde_json::Value::Object(Default::default()),
            dependencies: BTreeSet::new(),
            estimated_seconds: DEFAULT_STEP_SECONDS,
            status: StepStatus::Pending,
            attempts: 0,
            result: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// The tool, when it names a member of the closed set.
    pub fn tool_spec(&self) -> Option<ToolSpec> {
        self.tool.parse().ok()
    }

    /// A bash/python step may declare itself read-only in its arguments.
    pub fn is_mutating(&self) -> bool {
        let Some(tool) = self.tool_spec() else {
            return false;
        };
        if !tool.can_mutate() {
            return false;
        }
        !self
            .arguments
            .get("read_only")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Paths this step declares it will touch (`path` plus a `paths` list).
    pub fn declared_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        if let Some(path) = self.arguments.get("path").and_then(|p| p.as_str()) {
            paths.push(path.to_string());
        }
        if let Some(list) = self.arguments.get("paths").and_then(|p| p.as_array()) {
            paths.extend(list.iter().filter_map(|p| p.as_str().map(str::to_string)));
        }
        paths
    }
}

/// A complete workflow plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub steps: Vec<PlanStep>,
    pub approved: bool,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
            approved: false,
            status: PlanStatus::Draft,
            created_at: Utc::now(),
        }
    }

    pub fn step(&self, id: Uuid) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: Uuid) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Validate structure against the runtime agent catalogue. An empty
    /// return means the plan is executable.
    pub fn validate(&self, known_agents: &BTreeSet<String>) -> Vec<String> {
        let mut errors = Vec::new();

        if self.steps.is_empty() {
            errors.push("plan has no steps".to_string());
            return errors;
        }

        let ids: HashSet<Uuid> = self.steps.iter().map(|s| s.id).collect();
        if ids.len() != self.steps.len() {
            errors.push("duplicate step ids".to_string());
        }

        for (index, step) in self.steps.iter().enumerate() {
            let label = index + 1;
            for dep in &step.dependencies {
                if !ids.contains(dep) {
                    errors.push(format!("step {label}: dependency {dep} not found"));
                }
            }
            if step.tool_spec().is_none() {
                errors.push(format!("step {label}: unknown tool '{}'", step.tool));
            }
            if !known_agents.contains(&step.agent_id) {
                errors.push(format!("step {label}: unknown agent '{}'", step.agent_id));
            }
        }

        if let Some(cycle_step) = self.find_cycle() {
            let label = self
                .steps
                .iter()
                .position(|s| s.id == cycle_step)
                .map(|i| i + 1)
                .unwrap_or(0);
            errors.push(format!("dependency cycle detected at step {label}"));
        }

        errors
    }

    /// DFS with back-edge detection; returns a step on a cycle, if any.
    fn find_cycle(&self) -> Option<Uuid> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        fn visit(
            id: Uuid,
            plan: &Plan,
            marks: &mut HashMap<Uuid, Mark>,
        ) -> Option<Uuid> {
            match marks.get(&id).copied().unwrap_or(Mark::White) {
                Mark::Grey => return Some(id),
                Mark::Black => return None,
                Mark::White => {}
            }
            marks.insert(id, Mark::Grey);
            if let Some(step) = plan.step(id) {
                for dep in &step.dependencies {
                    if let Some(found) = visit(*dep, plan, marks) {
                        return Some(found);
                    }
                }
            }
            marks.insert(id, Mark::Black);
            None
        }

        let mut marks = HashMap::new();
        for step in &self.steps {
            if let Some(found) = visit(step.id, self, &mut marks) {
                return Some(found);
            }
        }
        None
    }

    /// Topological execution order (Kahn's algorithm), ties broken by
    /// `order_hint` ascending. Errors when the graph has a cycle.
    pub fn execution_order(&self) -> Result<Vec<Uuid>, String> {
        let mut in_degree: HashMap<Uuid, usize> = self
            .steps
            .iter()
            .map(|s| (s.id, s.dependencies.len()))
            .collect();

        let mut ready: Vec<&PlanStep> = self
            .steps
            .iter()
            .filter(|s| s.dependencies.is_empty())
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while !ready.is_empty() {
            ready.sort_by_key(|s| (s.order_hint, s.id));
            let current = ready.remove(0);
            order.push(current.id);

            for step in &self.steps {
                if step.dependencies.contains(&current.id) {
                    let degree = in_degree.get_mut(&step.id).expect("step in degree map");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(step);
                    }
                }
            }
        }

        if order.len() != self.steps.len() {
            return Err("dependency cycle detected".to_string());
        }
        Ok(order)
    }

    /// Fraction of steps completed, in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let completed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        completed as f64 / self.steps.len() as f64
    }

    pub fn total_estimated_seconds(&self) -> u64 {
        self.steps.iter().map(|s| s.estimated_seconds).sum()
    }

    /// Estimated API cost: per-step default token count for the role,
    /// priced at the role's cost per 1k tokens; roles with no configured
    /// cost fall back to flat per-request figures.
    pub fn estimated_cost(&self, cost_per_1k_by_agent: &HashMap<String, f64>) -> f64 {
        self.steps
            .iter()
            .map(|step| {
                let tokens = default_step_tokens(&step.agent_id);
                match cost_per_1k_by_agent.get(&step.agent_id) {
                    Some(per_1k) => tokens as f64 * per_1k / 1000.0,
                    None if step.agent_id == "main" => 0.10,
                    None => 0.02,
                }
            })
            .sum()
    }

    /// Stable serialised form; [`Plan::from_portable`] round-trips it.
    pub fn to_portable(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("plan serialises")
    }

    pub fn from_portable(value: &serde_json::Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|e| format!("malformed plan: {e}"))
    }
}

fn default_step_tokens(agent_id: &str) -> u64 {
    if agent_id == "main" {
        2000
    } else {
        1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalogue() -> BTreeSet<String> {
        ["main", "reviewer", "researcher", "implementer", "tester", "optimizer"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn step(order: u32, tool: &str) -> PlanStep {
        let mut step = PlanStep::new(order, format!("step {order}"));
        step.tool = tool.to_string();
        step
    }

    fn three_step_chain() -> Plan {
        let mut plan = Plan::new("chain", "three dependent steps");
        let a = step(1, "write_file_tool");
        let mut b = step(2, "read_file_tool");
        let mut c = step(3, "list_files_tool");
        b.dependencies.insert(a.id);
        c.dependencies.insert(b.id);
        plan.steps = vec![a, b, c];
        plan
    }

    #[test]
    fn valid_plan_passes_validation() {
        let plan = three_step_chain();
        assert!(plan.validate(&catalogue()).is_empty());
    }

    #[test]
    fn missing_dependency_is_flagged() {
        let mut plan = three_step_chain();
        plan.steps[1].dependencies.insert(Uuid::new_v4());
        let errors = plan.validate(&catalogue());
        assert!(errors.iter().any(|e| e.contains("not found")), "{errors:?}");
    }

    #[test]
    fn cycle_is_flagged_and_order_fails() {
        let mut plan = Plan::new("cycle", "two mutually dependent steps");
        let mut a = step(1, "read_file_tool");
        let mut b = step(2, "read_file_tool");
        let (a_id, b_id) = (a.id, b.id);
        a.dependencies.insert(b_id);
        b.dependencies.insert(a_id);
        plan.steps = vec![a, b];

        let errors = plan.validate(&catalogue());
        assert!(errors.iter().any(|e| e.contains("cycle")), "{errors:?}");
        assert!(plan.execution_order().is_err());
    }

    #[test]
    fn unknown_tool_and_agent_are_flagged() {
        let mut plan = Plan::new("bad refs", "");
        let mut s = step(1, "teleport_tool");
        s.agent_id = "wizard".to_string();
        plan.steps = vec![s];

        let errors = plan.validate(&catalogue());
        assert!(errors.iter().any(|e| e.contains("unknown tool 'teleport_tool'")));
        assert!(errors.iter().any(|e| e.contains("unknown agent 'wizard'")));
    }

    #[test]
    fn execution_order_respects_dependencies() {
        let plan = three_step_chain();
        let order = plan.execution_order().unwrap();
        assert_eq!(order.len(), 3);

        let position = |id: Uuid| order.iter().position(|o| *o == id).unwrap();
        for s in &plan.steps {
            for dep in &s.dependencies {
                assert!(position(*dep) < position(s.id));
            }
        }
    }

    #[test]
    fn order_hint_breaks_ties() {
        let mut plan = Plan::new("ties", "independent steps keep textual order");
        let mut steps: Vec<PlanStep> = (1..=4).map(|n| step(n, "read_file_tool")).collect();
        steps.reverse();
        plan.steps = steps;

        let order = plan.execution_order().unwrap();
        let hints: Vec<u32> = order
            .iter()
            .map(|id| plan.step(*id).unwrap().order_hint)
            .collect();
        assert_eq!(hints, vec![1, 2, 3, 4]);
    }

    #[test]
    fn progress_counts_completed() {
        let mut plan = three_step_chain();
        assert_eq!(plan.progress(), 0.0);
        plan.steps[0].status = StepStatus::Completed;
        assert!((plan.progress() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn rollups_sum_estimates() {
        let mut plan = three_step_chain();
        plan.steps[0].estimated_seconds = 10;
        plan.steps[1].estimated_seconds = 20;
        plan.steps[2].estimated_seconds = 30;
        assert_eq!(plan.total_estimated_seconds(), 60);

        let costs = HashMap::from([("main".to_string(), 0.05)]);
        // 3 main steps × 2000 tokens × $0.05/1k
        assert!((plan.estimated_cost(&costs) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn portable_round_trip_preserves_plan() {
        let mut plan = three_step_chain();
        plan.approved = true;
        plan.status = PlanStatus::Approved;
        plan.steps[0].status = StepStatus::Completed;
        plan.steps[0].attempts = 2;
        plan.steps[0].arguments = json!({"path": "./work/a.txt", "content": "x"});

        let restored = Plan::from_portable(&plan.to_portable()).unwrap();
        assert_eq!(restored, plan);
    }

    #[test]
    fn mutating_classification() {
        let mut bash = step(1, "execute_bash");
        assert!(bash.is_mutating());
        bash.arguments = json!({"command": "ls", "read_only": true});
        assert!(!bash.is_mutating());

        assert!(step(2, "write_file_tool").is_mutating());
        assert!(!step(3, "read_file_tool").is_mutating());
        assert!(!step(4, "not_a_tool").is_mutating());
    }
}
