//! External progress monitoring.
//!
//! The monitor is a pure reader: it polls a task's progress file with
//! no coupling to the executor beyond the durable store, so it can run
//! in a different process (or on a different machine sharing the
//! filesystem). A missing or momentarily unreadable file means "not
//! ready yet", never a crash.

use anyhow::Result;
use std::time::Duration;

use crate::config::Config;
use crate::progress::ProgressState;
use crate::storage;

/// Polls one task's persisted progress until it reaches a terminal
/// status.
pub struct ExternalMonitor {
    config: Config,
}

/// One observation from a poll cycle.
#[derive(Debug)]
pub enum Observation {
    /// Progress file not there (or not parseable) yet.
    NotReady,
    Snapshot(ProgressState),
}

impl ExternalMonitor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Take a single observation of the task.
    pub async fn observe(&self, task_id: &str) -> Observation {
        match storage::read_json::<ProgressState>(&self.config.progress_path(task_id)).await {
            Ok(Some(state)) => Observation::Snapshot(state),
            Ok(None) => Observation::NotReady,
            Err(e) => {
                // Transient read trouble is expected while a writer is
                // active; report not-ready and let the next poll retry.
                tracing::debug!("Progress read for {task_id} not ready: {e:#}");
                Observation::NotReady
            }
        }
    }

    /// Poll every `interval` until the task reaches COMPLETED or
    /// FAILED, rendering one line per observation via `render`.
    /// Returns the terminal state.
    pub async fn poll<F>(
        &self,
        task_id: &str,
        interval: Duration,
        mut render: F,
    ) -> Result<ProgressState>
    where
        F: FnMut(&Observation),
    {
        loop {
            let observation = self.observe(task_id).await;
            render(&observation);

            if let Observation::Snapshot(state) = &observation {
                if state.status.is_terminal() {
                    return Ok(state.clone());
                }
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// Default one-line rendering used by the CLI.
pub fn render_line(observation: &Observation) -> String {
    match observation {
        Observation::NotReady => "waiting for progress file...".to_string(),
        Observation::Snapshot(state) => format!(
            "{} {:>6.1}%  {} - {}",
            state.status, state.progress_pct, state.phase, state.current_action
        ),
    }
}
