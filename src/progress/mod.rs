//! Progress tracking for one task attempt.
//!
//! A task's progress lives in a single JSON file under the project's
//! progress directory, overwritten atomically on every update so an
//! external monitor can poll it across process boundaries. The file
//! also carries an append-only history of every update made during the
//! attempt, kept for post-mortems.

mod events;
mod tracker;

pub use events::{ConsoleReporter, ProgressEvents};
pub use tracker::{ProgressTracker, TrackerError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::provider::ProviderKind;

/// Task lifecycle status.
///
/// `Pending` and `Checkpointed` are transient: `Pending` is written
/// when the state file is created and replaced by `Running` as soon as
/// the operation is dispatched; `Checkpointed` is written when a
/// checkpoint lands and immediately replaced by `Running`. They exist
/// only so an external observer can see the events; neither is a
/// resting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Checkpointed,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Checkpointed => "CHECKPOINTED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One entry in a task's append-only update history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: String,
    pub action: String,
    pub progress_pct: f64,
}

/// Point-in-time progress snapshot for one task attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    pub task_id: String,
    pub query: String,
    pub provider: ProviderKind,
    pub status: TaskStatus,
    pub estimated_duration_sec: u64,
    pub started_at: DateTime<Utc>,
    /// `started_at` plus the estimate; a monitor can tell an overdue
    /// task at a glance without doing the arithmetic itself.
    pub estimated_completion_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phase: String,
    pub current_action: String,
    pub progress_pct: f64,
    /// Append-only update history, never pruned during the task's life.
    pub checkpoints: Vec<HistoryEntry>,
    /// Final results, present once the task completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
    /// Failure message, present once the task fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification, present once the task fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
}
