//! Lifecycle event sink for progress consumers.

use async_trait::async_trait;

use super::ProgressState;

/// One method per task lifecycle event.
///
/// The file-writing tracker dispatches these after each successful
/// persist; any consumer (console output, automation) implements the
/// same interface. All methods default to no-ops so a sink only
/// implements what it cares about.
#[async_trait]
pub trait ProgressEvents: Send + Sync {
    async fn on_start(&self, _state: &ProgressState) {}
    async fn on_update(&self, _state: &ProgressState) {}
    async fn on_checkpoint(&self, _state: &ProgressState) {}
    async fn on_complete(&self, _state: &ProgressState) {}
    async fn on_fail(&self, _state: &ProgressState) {}
}

/// Sink that prints one line per event, for interactive runs.
pub struct ConsoleReporter;

#[async_trait]
impl ProgressEvents for ConsoleReporter {
    async fn on_start(&self, state: &ProgressState) {
        println!(
            "[{}] started ({}, est {}s)",
            state.task_id, state.provider, state.estimated_duration_sec
        );
    }

    async fn on_update(&self, state: &ProgressState) {
        println!(
            "[{}] {:.0}% {} - {}",
            state.task_id, state.progress_pct, state.phase, state.current_action
        );
    }

    async fn on_checkpoint(&self, state: &ProgressState) {
        println!(
            "[{}] checkpoint saved at {:.0}%",
            state.task_id, state.progress_pct
        );
    }

    async fn on_complete(&self, state: &ProgressState) {
        println!("[{}] completed", state.task_id);
    }

    async fn on_fail(&self, state: &ProgressState) {
        println!(
            "[{}] failed: {}",
            state.task_id,
            state.error.as_deref().unwrap_or("unknown error")
        );
    }
}
