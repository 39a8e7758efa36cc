//! # deepwork
//!
//! Resumable execution engine for long-running research tasks.
//!
//! This library provides:
//! - Progress tracking with cross-process observability
//! - Durable checkpoints with operator-driven resume
//! - Retry/backoff with per-provider-class circuit breaking
//! - Graceful degradation to a fast fallback provider
//!
//! ## Architecture
//!
//! ```text
//!            ┌───────────────────────────────┐
//!            │          TaskExecutor         │
//!            │ (one task's lifecycle driver) │
//!            └──────┬─────────┬──────────┬───┘
//!                   │         │          │
//!                   ▼         ▼          ▼
//!          ProgressTracker CheckpointStore RetryController
//!             (JSON file)   (JSON file)   (+ CircuitBreaker)
//!                   │         │
//!                   ▼         ▼
//!           ExternalMonitor  resume / list-resumable CLI
//! ```
//!
//! ## Task Flow
//! 1. Look up an existing checkpoint; build a resume context if usable
//! 2. Run the research operation under retry with backoff
//! 3. Checkpoint at elapsed-time milestones; update progress throughout
//! 4. Complete (checkpoint deleted) or fail (checkpoint kept), falling
//!    back to the fast provider when the primary is exhausted
//!
//! ## Modules
//! - `executor`: task lifecycle orchestration
//! - `progress`: per-attempt progress files and lifecycle events
//! - `checkpoint`: durable partial results and resume contexts
//! - `retry`: backoff with jitter and rate-limit circuit breaking
//! - `monitor`: decoupled progress polling
//! - `ledger`: per-phase outcome records for coarse pipeline resume

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod monitor;
pub mod progress;
pub mod provider;
pub mod retry;
pub mod storage;

pub use config::Config;
pub use error::{ErrorKind, TaskError};
pub use executor::{ExecuteRequest, ExecutionReport, TaskExecutor};
