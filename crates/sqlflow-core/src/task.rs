//! Runtime task state machine (spec §3 "TaskStatus", §4.11).
//!
//! `TaskStatus` is an immutable value type: every transition produces a
//! new instance via `with_state`, mirroring "Immutability via frozen
//! dataclasses" (§9) rather than mutating in place.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Eligible,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus {
    pub step_id: String,
    pub state: TaskState,
    pub attempts: u32,
    pub dependencies: BTreeSet<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl TaskStatus {
    pub fn new(step_id: impl Into<String>, dependencies: BTreeSet<String>) -> Self {
        let state = if dependencies.is_empty() { TaskState::Eligible } else { TaskState::Pending };
        Self {
            step_id: step_id.into(),
            state,
            attempts: 0,
            dependencies,
            start_time: None,
            end_time: None,
            error_message: None,
        }
    }

    #[must_use]
    pub fn with_state(&self, state: TaskState) -> Self {
        Self { state, ..self.clone() }
    }

    #[must_use]
    pub fn with_running(&self, now: DateTime<Utc>) -> Self {
        Self {
            state: TaskState::Running,
            attempts: self.attempts + 1,
            start_time: Some(now),
            error_message: None,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_success(&self, now: DateTime<Utc>) -> Self {
        Self { state: TaskState::Success, end_time: Some(now), ..self.clone() }
    }

    #[must_use]
    pub fn with_retry_pending(&self, error_message: String) -> Self {
        Self { state: TaskState::Eligible, error_message: Some(error_message), ..self.clone() }
    }

    #[must_use]
    pub fn with_failed(&self, now: DateTime<Utc>, error_message: String) -> Self {
        Self {
            state: TaskState::Failed,
            end_time: Some(now),
            error_message: Some(error_message),
            ..self.clone()
        }
    }
}
