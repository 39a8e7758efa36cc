//! File-backed progress tracker with status state-machine enforcement.

use anyhow::Context;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{HistoryEntry, ProgressEvents, ProgressState, TaskStatus};
use crate::config::Config;
use crate::error::TaskError;
use crate::provider::ProviderKind;
use crate::storage;

/// Errors from the progress tracker.
///
/// Invalid transitions are rejected explicitly rather than ignored;
/// this is what keeps a racing writer from corrupting a status file
/// that already reached a terminal state.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("progress state already exists for task {0}")]
    AlreadyStarted(String),
    #[error("task {task_id}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("task {0} has not been started")]
    NotStarted(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Persists and serves point-in-time status for one task attempt.
///
/// Every mutation rewrites the task's progress file with a durable
/// atomic swap, so concurrent readers (in this process or another)
/// always observe a complete document.
pub struct ProgressTracker {
    task_id: String,
    path: PathBuf,
    state: RwLock<Option<ProgressState>>,
    sinks: Vec<Arc<dyn ProgressEvents>>,
}

impl ProgressTracker {
    /// Create a tracker for one task attempt. No file is written until
    /// [`start`](Self::start).
    pub fn new(config: &Config, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self {
            path: config.progress_path(&task_id),
            task_id,
            state: RwLock::new(None),
            sinks: Vec::new(),
        }
    }

    /// Attach a lifecycle event sink.
    pub fn with_sink(mut self, sink: Arc<dyn ProgressEvents>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Create the progress state and persist it, ending with status
    /// RUNNING. The transient PENDING snapshot is written first so an
    /// external reader can observe a created-but-not-yet-dispatched
    /// task; sinks receive that snapshot in `on_start`.
    ///
    /// Fails if state already exists for this task id, in memory or on
    /// disk. There is no silent overwrite; a probe failure propagates
    /// rather than being treated as an absent file.
    pub async fn start(
        &self,
        query: impl Into<String>,
        provider: ProviderKind,
        estimated_duration_sec: u64,
    ) -> Result<(), TrackerError> {
        let mut guard = self.state.write().await;
        if guard.is_some() {
            return Err(TrackerError::AlreadyStarted(self.task_id.clone()));
        }
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .with_context(|| format!("Failed to probe progress file {}", self.path.display()))?;
        if exists {
            return Err(TrackerError::AlreadyStarted(self.task_id.clone()));
        }

        let now = Utc::now();
        let mut state = ProgressState {
            task_id: self.task_id.clone(),
            query: query.into(),
            provider,
            status: TaskStatus::Pending,
            estimated_duration_sec,
            started_at: now,
            updated_at: now,
            estimated_completion_at: now + chrono::Duration::seconds(estimated_duration_sec as i64),
            phase: "pending".to_string(),
            current_action: "Task created".to_string(),
            progress_pct: 0.0,
            checkpoints: Vec::new(),
            results: None,
            error: None,
            error_type: None,
        };

        storage::write_json_atomic(&self.path, &state).await?;
        for sink in &self.sinks {
            sink.on_start(&state).await;
        }

        // Dispatch immediately; PENDING never rests.
        state.status = TaskStatus::Running;
        state.phase = "starting".to_string();
        state.current_action = "Task dispatched".to_string();
        state.updated_at = Utc::now();
        storage::write_json_atomic(&self.path, &state).await?;
        tracing::info!("Task {} started ({} provider)", self.task_id, provider);

        *guard = Some(state);
        Ok(())
    }

    /// Overwrite the current phase/action/progress and append one
    /// history entry.
    ///
    /// `progress_pct` is clamped so it never decreases within this
    /// attempt; a resumed task therefore keeps reporting from its
    /// resumed baseline rather than dropping back to zero.
    pub async fn update(
        &self,
        phase: impl Into<String>,
        action: impl Into<String>,
        progress_pct: f64,
    ) -> Result<(), TrackerError> {
        let state = self
            .mutate(TaskStatus::Running, |state| {
                Self::apply_update(state, phase.into(), action.into(), progress_pct);
            })
            .await?;

        for sink in &self.sinks {
            sink.on_update(&state).await;
        }
        Ok(())
    }

    /// Record that a checkpoint write completed.
    ///
    /// Persists the transient CHECKPOINTED status so an external reader
    /// can observe the event, then immediately returns the task to
    /// RUNNING. The task never rests in CHECKPOINTED.
    pub async fn checkpoint(
        &self,
        phase: impl Into<String>,
        action: impl Into<String>,
        progress_pct: f64,
    ) -> Result<(), TrackerError> {
        let phase = phase.into();
        let action = action.into();

        let state = self
            .mutate(TaskStatus::Checkpointed, |state| {
                Self::apply_update(state, phase, action, progress_pct);
            })
            .await?;
        for sink in &self.sinks {
            sink.on_checkpoint(&state).await;
        }

        // Back to RUNNING in the same update cycle; no history entry
        // for the flip, it is the same logical event.
        self.mutate(TaskStatus::Running, |_| {}).await?;
        Ok(())
    }

    /// Mark the task COMPLETED. History is retained for post-mortems.
    pub async fn complete(&self, results: serde_json::Value) -> Result<(), TrackerError> {
        let state = self
            .mutate(TaskStatus::Completed, |state| {
                state.progress_pct = 100.0;
                state.phase = "done".to_string();
                state.current_action = "Task completed".to_string();
                state.results = Some(results);
            })
            .await?;

        tracing::info!("Task {} completed", self.task_id);
        for sink in &self.sinks {
            sink.on_complete(&state).await;
        }
        Ok(())
    }

    /// Mark the task FAILED. History is retained for post-mortems.
    pub async fn fail(&self, error: &TaskError) -> Result<(), TrackerError> {
        let state = self
            .mutate(TaskStatus::Failed, |state| {
                state.current_action = format!("Failed: {}", error.message);
                state.error = Some(error.message.clone());
                state.error_type = Some(error.kind);
            })
            .await?;

        tracing::warn!("Task {} failed: {}", self.task_id, error);
        for sink in &self.sinks {
            sink.on_fail(&state).await;
        }
        Ok(())
    }

    /// Read the persisted state for this task attempt.
    ///
    /// Reads from disk, so it is safe to call concurrently with an
    /// in-flight update; the atomic swap guarantees a complete document.
    pub async fn read(&self) -> Result<ProgressState, TrackerError> {
        storage::read_json(&self.path)
            .await?
            .ok_or_else(|| TrackerError::NotStarted(self.task_id.clone()))
    }

    /// Read any task attempt's persisted state without a tracker
    /// instance. Used by the external monitor.
    pub async fn read_state(
        config: &Config,
        task_id: &str,
    ) -> anyhow::Result<Option<ProgressState>> {
        storage::read_json(&config.progress_path(task_id)).await
    }

    fn apply_update(state: &mut ProgressState, phase: String, action: String, progress_pct: f64) {
        let pct = progress_pct.clamp(0.0, 100.0).max(state.progress_pct);
        state.phase = phase.clone();
        state.current_action = action.clone();
        state.progress_pct = pct;
        state.checkpoints.push(HistoryEntry {
            timestamp: Utc::now(),
            phase,
            action,
            progress_pct: pct,
        });
    }

    /// Apply a mutation under the status state machine and persist.
    async fn mutate<F>(&self, to: TaskStatus, f: F) -> Result<ProgressState, TrackerError>
    where
        F: FnOnce(&mut ProgressState),
    {
        let mut guard = self.state.write().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| TrackerError::NotStarted(self.task_id.clone()))?;

        // Everything but the CHECKPOINTED->RUNNING flip requires the
        // task to currently be RUNNING; terminal states accept nothing.
        let valid = match (state.status, to) {
            (TaskStatus::Running, _) => !matches!(to, TaskStatus::Pending),
            (TaskStatus::Checkpointed, TaskStatus::Running) => true,
            _ => false,
        };
        if !valid {
            return Err(TrackerError::InvalidTransition {
                task_id: self.task_id.clone(),
                from: state.status,
                to,
            });
        }

        state.status = to;
        state.updated_at = Utc::now();
        f(state);

        storage::write_json_atomic(&self.path, state).await?;
        Ok(state.clone())
    }
}
