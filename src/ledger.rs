//! Phase-level outcome ledger.
//!
//! The pipeline records one outcome per task at each phase boundary and
//! reads the record back on a coarse resume to decide which tasks to
//! re-attempt. Same durable-swap contract as the other stores.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::Config;
use crate::storage;

/// Final disposition of one task within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed,
    Failed,
    Skipped,
}

/// Per-phase record of task outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase_num: u32,
    pub recorded_at: DateTime<Utc>,
    pub tasks: BTreeMap<String, TaskOutcome>,
}

/// Aggregates task outcomes per pipeline phase.
pub struct PhaseLedger {
    dir: PathBuf,
}

impl PhaseLedger {
    pub fn new(config: &Config) -> Self {
        Self {
            dir: config.ledger_dir(),
        }
    }

    fn path_for(&self, phase_num: u32) -> PathBuf {
        self.dir.join(format!("phase_{phase_num}.json"))
    }

    /// Write a whole phase record at the phase boundary, replacing any
    /// prior record for the phase.
    pub async fn record_phase(
        &self,
        phase_num: u32,
        tasks: BTreeMap<String, TaskOutcome>,
    ) -> Result<()> {
        let record = PhaseRecord {
            phase_num,
            recorded_at: Utc::now(),
            tasks,
        };
        storage::write_json_atomic(&self.path_for(phase_num), &record).await
    }

    /// Merge one task's outcome into the phase record, creating the
    /// record if needed. Used by single-task runs outside a full
    /// pipeline pass.
    pub async fn record_outcome(
        &self,
        phase_num: u32,
        task_name: &str,
        outcome: TaskOutcome,
    ) -> Result<()> {
        let mut record = self.load_phase(phase_num).await?.unwrap_or(PhaseRecord {
            phase_num,
            recorded_at: Utc::now(),
            tasks: BTreeMap::new(),
        });
        record.tasks.insert(task_name.to_string(), outcome);
        record.recorded_at = Utc::now();
        storage::write_json_atomic(&self.path_for(phase_num), &record).await
    }

    pub async fn load_phase(&self, phase_num: u32) -> Result<Option<PhaseRecord>> {
        storage::read_json(&self.path_for(phase_num)).await
    }

    /// Tasks the pipeline should re-attempt on a coarse resume: those
    /// that failed or were skipped. Completed tasks are left alone.
    pub async fn tasks_to_retry(&self, phase_num: u32) -> Result<Vec<String>> {
        Ok(self
            .load_phase(phase_num)
            .await?
            .map(|record| {
                record
                    .tasks
                    .into_iter()
                    .filter(|(_, outcome)| *outcome != TaskOutcome::Completed)
                    .map(|(name, _)| name)
                    .collect()
            })
            .unwrap_or_default())
    }
}
