//! Runtime configuration.
//!
//! All durable state for a project lives under `{project_dir}/.deepwork/`:
//! progress files per task attempt, checkpoint files per task name and
//! phase, and phase ledger records. Environment variables override the
//! retry defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one project's task execution.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root; durable state lives in `.deepwork/` beneath it.
    pub project_dir: PathBuf,
    /// Attempts after the first call, for retryable failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Default monitor poll interval.
    pub poll_interval: Duration,
}

impl Config {
    /// Build a config for a project directory, with environment
    /// variables as overrides:
    /// - `DEEPWORK_MAX_RETRIES` - retry attempts (default 3)
    /// - `DEEPWORK_BASE_DELAY_SEC` - backoff base delay (default 2)
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let max_retries = std::env::var("DEEPWORK_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);
        let base_delay_sec = std::env::var("DEEPWORK_BASE_DELAY_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        Self {
            project_dir: project_dir.into(),
            max_retries,
            base_delay: Duration::from_secs(base_delay_sec),
            poll_interval: Duration::from_secs(5),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_dir.join(".deepwork")
    }

    /// Directory holding one progress file per task attempt.
    pub fn progress_dir(&self) -> PathBuf {
        self.state_dir().join("progress")
    }

    /// Directory holding checkpoint files for one pipeline phase.
    pub fn checkpoint_dir(&self, phase_num: u32) -> PathBuf {
        self.state_dir()
            .join("checkpoints")
            .join(format!("phase_{phase_num}"))
    }

    /// Directory holding one outcome record per pipeline phase.
    pub fn ledger_dir(&self) -> PathBuf {
        self.state_dir().join("ledger")
    }

    /// Progress file path for one task attempt.
    pub fn progress_path(&self, task_id: &str) -> PathBuf {
        self.progress_dir().join(format!("{task_id}.json"))
    }
}

impl Config {
    /// Convenience for tests and tools that already have a `Path`.
    pub fn for_dir(dir: &Path) -> Self {
        Self::new(dir.to_path_buf())
    }
}
