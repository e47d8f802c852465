//! State Snapshot Manager (C13, spec §4.13): persists enough of a run's
//! progress to resume it later. Grounded on the original `StateManager` /
//! `PipelineStateSnapshot` — one JSON file per `run_id` under
//! `.sqlflow/state/`.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sqlflow_core::result::StepResult;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Success,
    Failed,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStateSnapshot {
    pub run_id: String,
    pub pipeline_name: String,
    pub state: ExecutionState,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub completed_step_ids: Vec<String>,
    pub step_results: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PipelineStateSnapshot {
    pub fn new(run_id: impl Into<String>, pipeline_name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_name: pipeline_name.into(),
            state: ExecutionState::Running,
            start_time,
            end_time: None,
            completed_step_ids: Vec::new(),
            step_results: Vec::new(),
            error_message: None,
        }
    }

    #[must_use]
    pub fn with_completed_step(mut self, step_id: impl Into<String>, result: StepResult) -> Self {
        self.completed_step_ids.push(step_id.into());
        self.step_results.push(result);
        self
    }

    #[must_use]
    pub fn finished(mut self, end_time: DateTime<Utc>, state: ExecutionState, error_message: Option<String>) -> Self {
        self.end_time = Some(end_time);
        self.state = state;
        self.error_message = error_message;
        self
    }
}

/// Resumable runs are kept as one `<run_id>.json` file each under a
/// state directory, defaulting to `.sqlflow/state` under the current
/// working directory.
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self { state_dir: state_dir.into() }
    }

    pub fn default_dir() -> PathBuf {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(".sqlflow").join("state")
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.state_dir.join(format!("{run_id}.json"))
    }

    pub fn save_execution_state(&self, snapshot: &PipelineStateSnapshot) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.state_dir)?;
        let json = serde_json::to_vec_pretty(snapshot)?;
        fs::write(self.path_for(&snapshot.run_id), json)?;
        Ok(())
    }

    pub fn load_execution_state(&self, run_id: &str) -> Result<Option<PipelineStateSnapshot>, SnapshotError> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn delete_execution_state(&self, run_id: &str) -> Result<bool, SnapshotError> {
        let path = self.path_for(run_id);
        if path.exists() {
            fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn read_all(&self) -> Result<Vec<PipelineStateSnapshot>, SnapshotError> {
        let mut snapshots = Vec::new();
        if !self.state_dir.exists() {
            return Ok(snapshots);
        }
        for entry in fs::read_dir(&self.state_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(entry.path())?;
            if let Ok(snapshot) = serde_json::from_slice::<PipelineStateSnapshot>(&bytes) {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    /// Runs that didn't reach a terminal success, most recently started
    /// first — candidates for a `--resume` flag on the next invocation.
    pub fn list_resumes(&self) -> Result<Vec<PipelineStateSnapshot>, SnapshotError> {
        let mut snapshots: Vec<_> = self
            .read_all()?
            .into_iter()
            .filter(|s| matches!(s.state, ExecutionState::Failed | ExecutionState::Running | ExecutionState::Paused))
            .collect();
        snapshots.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(snapshots)
    }

    pub fn cleanup_old_states(&self, keep_days: i64) -> Result<usize, SnapshotError> {
        let cutoff = Utc::now() - chrono::Duration::days(keep_days);
        let mut removed = 0;
        for snapshot in self.read_all()? {
            if snapshot.start_time < cutoff {
                self.delete_execution_state(&snapshot.run_id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlflow_core::result::StepResult;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn scratch_dir() -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("sqlflow-snapshot-test-{}-{n}", std::process::id()))
    }

    #[test]
    fn save_then_load_round_trips() {
        let manager = StateManager::new(scratch_dir());
        let now = Utc::now();
        let result = StepResult::success("step-1", "transform", now, now, 1);
        let snapshot = PipelineStateSnapshot::new("run-1", "daily_orders", now).with_completed_step("step-1", result);
        manager.save_execution_state(&snapshot).unwrap();
        let loaded = manager.load_execution_state("run-1").unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn load_missing_run_is_none() {
        let manager = StateManager::new(scratch_dir());
        assert!(manager.load_execution_state("nope").unwrap().is_none());
    }

    #[test]
    fn list_resumes_excludes_successful_runs() {
        let manager = StateManager::new(scratch_dir());
        let now = Utc::now();
        let failed = PipelineStateSnapshot::new("run-failed", "p", now).finished(now, ExecutionState::Failed, Some("boom".into()));
        let success = PipelineStateSnapshot::new("run-success", "p", now).finished(now, ExecutionState::Success, None);
        manager.save_execution_state(&failed).unwrap();
        manager.save_execution_state(&success).unwrap();

        let resumable = manager.list_resumes().unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].run_id, "run-failed");
    }

    #[test]
    fn cleanup_removes_states_older_than_cutoff() {
        let manager = StateManager::new(scratch_dir());
        let old = PipelineStateSnapshot::new("old-run", "p", Utc::now() - chrono::Duration::days(10));
        manager.save_execution_state(&old).unwrap();

        let removed = manager.cleanup_old_states(7).unwrap();
        assert_eq!(removed, 1);
        assert!(manager.load_execution_state("old-run").unwrap().is_none());
    }

    #[test]
    fn with_completed_step_accumulates_results() {
        let snapshot = PipelineStateSnapshot::new("run-2", "p", Utc::now());
        let now = Utc::now();
        let result = StepResult::success("step-1", "transform", now, now, 1);
        let snapshot = snapshot.with_completed_step("step-1", result);
        assert_eq!(snapshot.completed_step_ids, vec!["step-1".to_string()]);
        assert_eq!(snapshot.step_results.len(), 1);
    }
}
