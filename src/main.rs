//! Operator CLI for the research task engine.
//!
//! Thin shell over the library contracts: listing and resuming
//! checkpoints, monitoring running tasks, and dispatching single tasks.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use deepwork::checkpoint::CheckpointStore;
use deepwork::ledger::{PhaseLedger, TaskOutcome};
use deepwork::monitor::{render_line, ExternalMonitor};
use deepwork::progress::ConsoleReporter;
use deepwork::provider::{HttpResearchProvider, ProviderKind, ResearchOperation};
use deepwork::retry::{CircuitBreaker, RetryController};
use deepwork::{Config, ExecuteRequest, TaskExecutor};

#[derive(Parser)]
#[command(name = "deepwork", about = "Resumable research task execution", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List checkpoints for a phase with their resumability verdicts.
    ListResumable {
        /// Project directory.
        project: PathBuf,
        /// Pipeline phase number.
        phase: u32,
    },
    /// Resume a checkpointed task.
    Resume {
        project: PathBuf,
        phase: u32,
        /// Task name within the phase.
        #[arg(long)]
        task: String,
        /// Resume even past the resumable threshold.
        #[arg(long)]
        force: bool,
        /// Estimated duration for the resumed attempt, in seconds.
        #[arg(long, default_value_t = 1800)]
        estimated_duration: u64,
    },
    /// Show a task's progress snapshot, or follow it to completion.
    Monitor {
        project: PathBuf,
        task_id: String,
        /// Poll until the task completes or fails.
        #[arg(long)]
        follow: bool,
        /// Poll interval in seconds.
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
    /// Dispatch a single research task.
    Run {
        project: PathBuf,
        phase: u32,
        #[arg(long)]
        task: String,
        #[arg(long)]
        query: String,
        /// fast | comprehensive
        #[arg(long, default_value = "comprehensive")]
        provider: ProviderKind,
        /// Estimated duration in seconds; drives checkpoint milestones
        /// and the operation timeout ceiling.
        #[arg(long, default_value_t = 1800)]
        estimated_duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::ListResumable { project, phase } => {
            let config = Config::new(project);
            let store = CheckpointStore::new(&config, phase);
            let checkpoints = store.list().await?;
            if checkpoints.is_empty() {
                println!("No checkpoints for phase {phase}.");
                return Ok(ExitCode::SUCCESS);
            }
            for cp in checkpoints {
                let elapsed_min = cp.metadata.time_elapsed_sec / 60.0;
                // Remaining time extrapolated from the elapsed/progress
                // ratio; rough, but enough to pick what to resume.
                let remaining_min = if cp.progress_pct > 0.0 {
                    elapsed_min * (100.0 - cp.progress_pct) / cp.progress_pct
                } else {
                    0.0
                };
                println!(
                    "{:<30} {:>5.1}%  resumable: {:<5}  elapsed: {:>6.1} min  est. remaining: {:>6.1} min",
                    cp.task_name, cp.progress_pct, cp.resumable, elapsed_min, remaining_min
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Resume {
            project,
            phase,
            task,
            force,
            estimated_duration,
        } => {
            let config = Config::new(project);
            let store = CheckpointStore::new(&config, phase);
            let checkpoint = match store.load(&task).await? {
                Some(cp) => cp,
                None => {
                    eprintln!("No checkpoint found for task '{task}' in phase {phase}.");
                    return Ok(ExitCode::FAILURE);
                }
            };
            if !checkpoint.resumable && !force {
                eprintln!(
                    "Checkpoint for '{task}' is at {:.0}%, past the resumable threshold; \
                     restart the task or pass --force.",
                    checkpoint.progress_pct
                );
                return Ok(ExitCode::FAILURE);
            }

            let mut request =
                ExecuteRequest::new(task, checkpoint.query.clone(), ProviderKind::Comprehensive, estimated_duration);
            request.force_resume = force;
            execute(config, phase, request).await?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Monitor {
            project,
            task_id,
            follow,
            interval,
        } => {
            let monitor = ExternalMonitor::new(Config::new(project));
            if follow {
                let state = monitor
                    .poll(&task_id, Duration::from_secs(interval), |obs| {
                        println!("{}", render_line(obs));
                    })
                    .await?;
                println!("Task {} finished with status {}", task_id, state.status);
            } else {
                println!("{}", render_line(&monitor.observe(&task_id).await));
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Run {
            project,
            phase,
            task,
            query,
            provider,
            estimated_duration,
        } => {
            let config = Config::new(project);
            let request = ExecuteRequest::new(task, query, provider, estimated_duration);
            execute(config, phase, request).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Wire up providers and run one task, recording its outcome in the
/// phase ledger.
async fn execute(config: Config, phase: u32, request: ExecuteRequest) -> Result<()> {
    let primary: Arc<dyn ResearchOperation> =
        Arc::new(HttpResearchProvider::from_env(request.provider)?);
    let fallback: Option<Arc<dyn ResearchOperation>> = match request.provider {
        ProviderKind::Comprehensive => Some(Arc::new(HttpResearchProvider::from_env(
            ProviderKind::Fast,
        )?)),
        ProviderKind::Fast => None,
    };

    let retry = RetryController::new(CircuitBreaker::new(format!("{} calls", request.provider)));
    let executor =
        TaskExecutor::new(config.clone(), phase, retry).with_sink(Arc::new(ConsoleReporter));
    let ledger = PhaseLedger::new(&config);
    let task_name = request.task_name.clone();

    match executor.execute(request, primary, fallback).await {
        Ok(report) => {
            ledger
                .record_outcome(phase, &task_name, TaskOutcome::Completed)
                .await?;
            if report.degraded {
                println!(
                    "Task '{}' completed via fallback provider (primary failed: {}).",
                    task_name,
                    report.primary_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                );
            } else if report.resumed {
                println!(
                    "Task '{}' completed (resumed; ~{:.1} min of prior work reused).",
                    task_name,
                    report.time_saved_sec / 60.0
                );
            } else {
                println!("Task '{}' completed.", task_name);
            }
            Ok(())
        }
        Err(e) => {
            ledger
                .record_outcome(phase, &task_name, TaskOutcome::Failed)
                .await?;
            Err(e)
        }
    }
}
