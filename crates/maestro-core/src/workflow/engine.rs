//! Workflow engine
//!
//! Executes an approved, validated plan: steps run one at a time in the
//! topological order computed once up front. A checkpoint is taken before
//! any mutating step; failures retry with back-off against the same
//! checkpoint, and exhausted retries roll every checkpoint back in reverse
//! order. Pause and cancel are flags observed at step boundaries — a
//! running step always finishes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::constants::workflow::{MAX_STEP_ATTEMPTS, PAUSE_POLL, RETRY_BACKOFF};
use crate::plan::{Plan, PlanStatus, StepStatus};
use crate::tools::ToolExecutor;
use crate::workflow::state::{Checkpoint, WorkflowState};

/// Outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowOutcome {
    pub success: bool,
    pub message: String,
}

impl WorkflowOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// Progress event kinds, in the order a consumer can expect them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    CheckpointCreated,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepRetried,
    PlanCompleted,
    PlanFailed,
    RollbackStarted,
    RollbackCompleted,
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub plan_id: Uuid,
    pub step_id: Option<Uuid>,
    pub kind: ProgressKind,
    pub timestamp: DateTime<Utc>,
}

/// Post-run summary.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub status: PlanStatus,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_total: usize,
    pub progress: f64,
    pub total_execution_ms: u64,
    pub checkpoints_created: usize,
}

pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Executes plans against a tool executor.
pub struct WorkflowEngine {
    executor: std::sync::Arc<ToolExecutor>,
    progress: Option<ProgressCallback>,
    state_path: Option<PathBuf>,
    paused: AtomicBool,
    cancel_requested: AtomicBool,
    execution_log: Mutex<Vec<ProgressEvent>>,
    last_summary: Mutex<Option<ExecutionSummary>>,
    /// Serialises runs: one workflow mutates the filesystem at a time.
    run_guard: AsyncMutex<()>,
}

impl WorkflowEngine {
    pub fn new(executor: std::sync::Arc<ToolExecutor>) -> Self {
        Self {
            executor,
            progress: None,
            state_path: None,
            paused: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            execution_log: Mutex::new(Vec::new()),
            last_summary: Mutex::new(None),
            run_guard: AsyncMutex::new(()),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Persist resumable state to this file after every step.
    pub fn with_state_path(mut self, path: PathBuf) -> Self {
        self.state_path = Some(path);
        self
    }

    // ── Control operations ─────────────────────────────────────────────

    pub fn pause(&self) {
        info!("workflow pause requested");
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        info!("workflow resumed");
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Cancellation is observed at the next step boundary; the running
    /// step completes first.
    pub fn cancel(&self) {
        info!("workflow cancellation requested");
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn execution_log(&self) -> Vec<ProgressEvent> {
        self.execution_log.lock().expect("log lock").clone()
    }

    pub fn summary(&self) -> Option<ExecutionSummary> {
        self.last_summary.lock().expect("summary lock").clone()
    }

    // ── Execution ──────────────────────────────────────────────────────

    /// Execute an approved plan. `known_agents` is the runtime agent
    /// catalogue used by validation.
    pub async fn execute(
        &self,
        plan: &mut Plan,
        known_agents: &BTreeSet<String>,
    ) -> WorkflowOutcome {
        let _run = self.run_guard.lock().await;
        let run_start = Instant::now();

        if !plan.approved {
            return WorkflowOutcome::fail("plan not approved");
        }
        let errors = plan.validate(known_agents);
        if !errors.is_empty() {
            warn!(plan = %plan.name, ?errors, "plan failed validation");
            return WorkflowOutcome::fail(format!("validation failed: {}", errors.join("; ")));
        }

        // Computed once; no reordering mid-run.
        let order = match plan.execution_order() {
            Ok(order) => order,
            Err(e) => return WorkflowOutcome::fail(format!("validation failed: {e}")),
        };

        info!(plan = %plan.name, steps = order.len(), "starting workflow");
        self.cancel_requested.store(false, Ordering::SeqCst);
        plan.status = PlanStatus::Running;
        let mut checkpoints: Vec<Checkpoint> = Vec::new();

        for (position, step_id) in order.iter().enumerate() {
            while self.paused.load(Ordering::SeqCst)
                && !self.cancel_requested.load(Ordering::SeqCst)
            {
                tokio::time::sleep(PAUSE_POLL).await;
            }

            if self.cancel_requested.load(Ordering::SeqCst) {
                for remaining in &order[position..] {
                    if let Some(step) = plan.step_mut(*remaining) {
                        step.status = StepStatus::Skipped;
                    }
                }
                self.rollback(plan.id, &checkpoints).await;
                plan.status = PlanStatus::Cancelled;
                self.finish(plan, &checkpoints, run_start);
                return WorkflowOutcome::fail("execution cancelled");
            }

            let step_id = *step_id;
            let (mutating, declared_paths, description) = {
                let step = plan.step(step_id).expect("ordered step exists");
                (step.is_mutating(), step.declared_paths(), step.description.clone())
            };

            if mutating {
                let paths = self.resolve_declared(&declared_paths);
                let checkpoint = Checkpoint::capture(plan.id, step_id, &paths).await;
                info!(
                    step = %step_id,
                    files = checkpoint.file_snapshots.len(),
                    "checkpoint created"
                );
                checkpoints.push(checkpoint);
                self.report(plan.id, Some(step_id), ProgressKind::CheckpointCreated);
            }

            let completed = self.run_step(plan, step_id, &description).await;
            self.save_state(plan, &checkpoints, Some(step_id)).await;

            if !completed {
                plan.status = PlanStatus::Failed;
                self.rollback(plan.id, &checkpoints).await;
                self.report(plan.id, Some(step_id), ProgressKind::PlanFailed);
                self.finish(plan, &checkpoints, run_start);
                return WorkflowOutcome::fail(format!(
                    "step failed: {description}; changes rolled back"
                ));
            }
        }

        plan.status = PlanStatus::Completed;
        self.report(plan.id, None, ProgressKind::PlanCompleted);
        self.finish(plan, &checkpoints, run_start);
        // Checkpoints are only discarded on success; the persisted state
        // file goes with them.
        checkpoints.clear();
        self.remove_state().await;

        let completed = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        info!(plan = %plan.name, completed, "workflow completed");
        WorkflowOutcome::ok(format!(
            "completed {completed}/{} steps",
            plan.steps.len()
        ))
    }

    /// Run one step with bounded retries. Returns whether it completed.
    async fn run_step(&self, plan: &mut Plan, step_id: Uuid, description: &str) -> bool {
        loop {
            let (tool, arguments, attempt) = {
                let step = plan.step_mut(step_id).expect("step exists");
                step.status = StepStatus::Running;
                if step.started_at.is_none() {
                    step.started_at = Some(Utc::now());
                }
                (
                    step.tool_spec().expect("validated tool"),
                    step.arguments.clone(),
                    step.attempts + 1,
                )
            };

            self.report(plan.id, Some(step_id), ProgressKind::StepStarted);
            info!(step = %step_id, %tool, attempt, "executing step: {description}");

            let result = self.executor.dispatch(tool, &arguments).await;
            let step = plan.step_mut(step_id).expect("step exists");
            step.attempts = attempt;

            if result.success {
                step.status = StepStatus::Completed;
                step.finished_at = Some(Utc::now());
                step.result = Some(result);
                self.report(plan.id, Some(step_id), ProgressKind::StepCompleted);
                return true;
            }

            let failure = result
                .error
                .clone()
                .or(result.stderr.clone())
                .unwrap_or_else(|| "tool execution failed".to_string());

            if attempt < MAX_STEP_ATTEMPTS {
                warn!(
                    step = %step_id,
                    attempt,
                    error = %failure,
                    "step failed, retrying"
                );
                step.status = StepStatus::Pending;
                self.report(plan.id, Some(step_id), ProgressKind::StepRetried);
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                continue;
            }

            error!(step = %step_id, error = %failure, "step failed, retries exhausted");
            step.status = StepStatus::Failed;
            step.finished_at = Some(Utc::now());
            step.result = Some(result);
            self.report(plan.id, Some(step_id), ProgressKind::StepFailed);
            return false;
        }
    }

    /// Restore checkpoints in reverse order. Failures are logged; they do
    /// not prevent the engine from reporting the run as failed.
    async fn rollback(&self, plan_id: Uuid, checkpoints: &[Checkpoint]) {
        if checkpoints.is_empty() {
            return;
        }
        info!(count = checkpoints.len(), "rolling back checkpoints");
        self.report(plan_id, None, ProgressKind::RollbackStarted);
        for checkpoint in checkpoints.iter().rev() {
            checkpoint.restore().await;
        }
        self.report(plan_id, None, ProgressKind::RollbackCompleted);
    }

    fn resolve_declared(&self, declared: &[String]) -> Vec<PathBuf> {
        declared
            .iter()
            .map(|p| {
                let path = Path::new(p);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.executor.working_dir().join(path)
                }
            })
            .collect()
    }

    fn report(&self, plan_id: Uuid, step_id: Option<Uuid>, kind: ProgressKind) {
        let event = ProgressEvent {
            plan_id,
            step_id,
            kind,
            timestamp: Utc::now(),
        };
        if let Some(callback) = &self.progress {
            callback(event.clone());
        }
        self.execution_log.lock().expect("log lock").push(event);
    }

    fn finish(&self, plan: &Plan, checkpoints: &[Checkpoint], run_start: Instant) {
        let completed = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        let failed = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count();
        let summary = ExecutionSummary {
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            status: plan.status,
            steps_completed: completed,
            steps_failed: failed,
            steps_total: plan.steps.len(),
            progress: plan.progress(),
            total_execution_ms: run_start.elapsed().as_millis() as u64,
            checkpoints_created: checkpoints.len(),
        };
        *self.last_summary.lock().expect("summary lock") = Some(summary);
    }

    async fn save_state(&self, plan: &Plan, checkpoints: &[Checkpoint], current: Option<Uuid>) {
        let Some(path) = &self.state_path else {
            return;
        };
        let state = WorkflowState {
            plan: plan.clone(),
            checkpoints: checkpoints.to_vec(),
            current_step_id: current,
            paused: self.paused.load(Ordering::SeqCst),
            cancel_requested: self.cancel_requested.load(Ordering::SeqCst),
        };
        if let Err(e) = state.save(path).await {
            warn!(path = %path.display(), "failed to persist workflow state: {e}");
        }
    }

    async fn remove_state(&self) {
        if let Some(path) = &self.state_path {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}
