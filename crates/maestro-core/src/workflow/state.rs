//! Checkpoints and persisted workflow state
//!
//! A checkpoint snapshots the byte content of every file a mutating step
//! declares it will touch, taken immediately before the step first runs. A
//! missing file is recorded as `None` so rollback can remove it again.
//! Snapshots serialise as base64 inside the workflow state JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::{Plan, PlanStatus, StepStatus};

/// File bytes captured for rollback; base64 on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(pub Vec<u8>);

impl Serialize for Snapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map(Snapshot)
            .map_err(serde::de::Error::custom)
    }
}

/// Pre-step snapshot of the files a mutating step may touch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub step_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// `None` records "did not exist".
    pub file_snapshots: BTreeMap<PathBuf, Option<Snapshot>>,
}

impl Checkpoint {
    /// Capture the current bytes of each path.
    pub async fn capture(plan_id: Uuid, step_id: Uuid, paths: &[PathBuf]) -> Self {
        let mut file_snapshots = BTreeMap::new();
        for path in paths {
            let snapshot = match tokio::fs::read(path).await {
                Ok(bytes) => Some(Snapshot(bytes)),
                Err(_) => None,
            };
            file_snapshots.insert(path.clone(), snapshot);
        }
        Self {
            id: Uuid::new_v4(),
            plan_id,
            step_id,
            created_at: Utc::now(),
            file_snapshots,
        }
    }

    /// Restore every snapshot: saved bytes are written back, and files that
    /// did not exist are removed. Individual failures are logged, never
    /// fatal.
    pub async fn restore(&self) {
        for (path, snapshot) in &self.file_snapshots {
            let outcome = match snapshot {
                Some(Snapshot(bytes)) => tokio::fs::write(path, bytes).await,
                None => match tokio::fs::remove_file(path).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                },
            };
            if let Err(e) = outcome {
                tracing::warn!(path = %path.display(), "rollback restore failed: {e}");
            }
        }
    }
}

/// Everything needed to resume a plan after a process restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub plan: Plan,
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub current_step_id: Option<Uuid>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl WorkflowState {
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await
    }

    /// Load persisted state. Steps that were running are demoted to
    /// pending so they re-run, and a running plan drops back to approved
    /// so the engine's preconditions hold on resume.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let mut state: Self = serde_json::from_slice(&bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        for step in &mut state.plan.steps {
            if step.status == StepStatus::Running {
                step.status = StepStatus::Pending;
                step.started_at = None;
            }
        }
        if state.plan.status == PlanStatus::Running {
            state.plan.status = PlanStatus::Approved;
        }
        Ok(state)
    }
}
