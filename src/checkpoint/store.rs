//! File-backed checkpoint store for one pipeline phase.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs;

use super::{
    Checkpoint, CheckpointMetadata, SourcesCollected, CHECKPOINT_VERSION, RESUMABLE_THRESHOLD_PCT,
};
use crate::config::Config;

/// Persists one checkpoint per task name under the phase's checkpoint
/// directory. Saving overwrites any prior checkpoint for the same task.
pub struct CheckpointStore {
    dir: PathBuf,
    phase_num: u32,
}

impl CheckpointStore {
    pub fn new(config: &Config, phase_num: u32) -> Self {
        Self {
            dir: config.checkpoint_dir(phase_num),
            phase_num,
        }
    }

    fn path_for(&self, task_name: &str) -> PathBuf {
        self.dir.join(format!("{task_name}.json"))
    }

    /// Persist a checkpoint, replacing any prior one for `task_name`.
    ///
    /// The stored `resumable` flag is forced to honor the threshold
    /// invariant: a checkpoint past [`RESUMABLE_THRESHOLD_PCT`] is never
    /// marked resumable, whatever the caller asked for.
    #[allow(clippy::too_many_arguments)]
    pub async fn save(
        &self,
        task_name: &str,
        query: &str,
        progress_pct: f64,
        partial_results: serde_json::Value,
        sources: Vec<serde_json::Value>,
        resumable: bool,
        time_elapsed_sec: f64,
    ) -> Result<Checkpoint> {
        let source_count = sources.len();
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            task_name: task_name.to_string(),
            phase_num: self.phase_num,
            query: query.to_string(),
            created_at: Utc::now(),
            progress_pct,
            resumable: resumable && progress_pct <= RESUMABLE_THRESHOLD_PCT,
            partial_results,
            sources_collected: SourcesCollected {
                count: source_count,
                items: sources,
            },
            metadata: CheckpointMetadata {
                time_elapsed_sec,
                source_count,
            },
        };

        crate::storage::write_json_atomic(&self.path_for(task_name), &checkpoint).await?;
        tracing::debug!(
            "Saved checkpoint for '{}' at {:.0}% (resumable: {})",
            task_name,
            checkpoint.progress_pct,
            checkpoint.resumable
        );
        Ok(checkpoint)
    }

    /// Load the checkpoint for `task_name`, if one exists. The
    /// `resumable` verdict is recomputed from `progress_pct`.
    pub async fn load(&self, task_name: &str) -> Result<Option<Checkpoint>> {
        let loaded: Option<Checkpoint> =
            crate::storage::read_json(&self.path_for(task_name)).await?;
        Ok(loaded.map(|mut cp| {
            cp.resumable = cp.is_resumable();
            cp
        }))
    }

    /// All checkpoints for this phase, `resumable` recomputed at read
    /// time, ordered by task name.
    pub async fn list(&self) -> Result<Vec<Checkpoint>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut checkpoints = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                // Skip files that fail to parse rather than failing the
                // whole listing; a bad file is an operator problem, not
                // a reason to hide the good ones.
                match crate::storage::read_json::<Checkpoint>(&path).await {
                    Ok(Some(mut cp)) => {
                        cp.resumable = cp.is_resumable();
                        checkpoints.push(cp);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("Skipping unreadable checkpoint {}: {e}", path.display());
                    }
                }
            }
        }

        checkpoints.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        Ok(checkpoints)
    }

    /// Remove the checkpoint for `task_name`. Idempotent; called after
    /// a task completes.
    pub async fn delete(&self, task_name: &str) -> Result<()> {
        match fs::remove_file(self.path_for(task_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete checkpoint '{task_name}'")),
        }
    }

    /// Build the query handed to a resumed operation.
    ///
    /// Combines the original query, the fraction already achieved, and
    /// the checkpointed partials, verbatim. Nothing is fabricated: a
    /// resumed operation continues from exactly what was saved.
    pub fn build_resume_context(&self, task_name: &str, checkpoint: &Checkpoint) -> String {
        let partials = serde_json::to_string_pretty(&checkpoint.partial_results)
            .unwrap_or_else(|_| "null".to_string());
        let sources = serde_json::to_string_pretty(&checkpoint.sources_collected.items)
            .unwrap_or_else(|_| "[]".to_string());

        format!(
            "Continuing interrupted research for task '{task_name}'.\n\
             Original query: {query}\n\
             Progress already completed: {pct:.0}%\n\
             Sources collected so far ({count}):\n{sources}\n\
             Partial findings:\n{partials}\n\
             Continue from this state; do not repeat the completed portion.",
            query = checkpoint.query,
            pct = checkpoint.progress_pct,
            count = checkpoint.sources_collected.count,
        )
    }
}
