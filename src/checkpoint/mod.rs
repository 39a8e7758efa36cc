//! Durable checkpoints for partial task results.
//!
//! Checkpoints are the recovery mechanism: a task interrupted or failed
//! mid-flight leaves its latest checkpoint behind, and an operator (or
//! the pipeline) can resume from it instead of restarting. Only the
//! latest checkpoint per task name is kept.

mod store;

pub use store::CheckpointStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress beyond this percentage is not worth resuming: reconciling
/// late-stage partial synthesis costs more than restarting.
pub const RESUMABLE_THRESHOLD_PCT: f64 = 50.0;

/// On-disk checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Sources gathered up to the checkpoint, opaque to this core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesCollected {
    pub count: usize,
    pub items: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Wall-clock seconds elapsed in the attempt when this was saved.
    pub time_elapsed_sec: f64,
    pub source_count: usize,
}

/// A durable, infrequent snapshot of partial task results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub task_name: String,
    pub phase_num: u32,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub progress_pct: f64,
    pub resumable: bool,
    pub partial_results: serde_json::Value,
    pub sources_collected: SourcesCollected,
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// The resumability verdict, recomputed from `progress_pct` rather
    /// than trusted from storage, to tolerate stale or tampered data.
    pub fn is_resumable(&self) -> bool {
        self.progress_pct <= RESUMABLE_THRESHOLD_PCT
    }
}
