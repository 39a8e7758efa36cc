//! Task lifecycle orchestration.
//!
//! One executor drives one task at a time: it checks for a resumable
//! checkpoint, starts progress tracking, runs the research operation
//! under retry/backoff with scheduled checkpoints, and on exhaustion
//! or an open circuit falls back to the fast provider when one is
//! supplied; fatal failures propagate instead. Several
//! executors for different tasks may run as independent cooperative
//! tasks; the only state they share is the operation class's circuit
//! breaker.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::error::{ErrorKind, TaskError};
use crate::progress::{ProgressEvents, ProgressTracker};
use crate::provider::{PartialSink, ProviderKind, ResearchOperation, ResearchOutput};
use crate::retry::RetryController;

/// Elapsed-time checkpoint schedule, in percent of the estimated
/// duration, with whether a checkpoint taken there is resumable.
/// Sparse early milestones at 15/30/50% are cheap to resume; past the
/// halfway point restarting is cheaper than reconciling partial
/// synthesis, so later checkpoints land every 5% and are kept only for
/// post-mortem inspection.
fn checkpoint_schedule() -> Vec<(f64, bool)> {
    let mut schedule = vec![(15.0, true), (30.0, true), (50.0, true)];
    schedule.extend((11..20).map(|i| (f64::from(i) * 5.0, false)));
    schedule
}

/// One task execution request.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Stable logical name within the phase; keys checkpoint lookup.
    pub task_name: String,
    pub query: String,
    pub provider: ProviderKind,
    pub estimated_duration_sec: u64,
    /// Resume even from a checkpoint past the resumable threshold.
    pub force_resume: bool,
}

impl ExecuteRequest {
    pub fn new(
        task_name: impl Into<String>,
        query: impl Into<String>,
        provider: ProviderKind,
        estimated_duration_sec: u64,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            query: query.into(),
            provider,
            estimated_duration_sec,
            force_resume: false,
        }
    }
}

/// Outcome of a successful execution (primary or degraded).
#[derive(Debug)]
pub struct ExecutionReport {
    /// Attempt that produced the output; a fallback attempt has its own
    /// task id distinct from the failed primary's.
    pub task_id: String,
    pub task_name: String,
    pub provider: ProviderKind,
    pub output: ResearchOutput,
    /// Whether this attempt started from a checkpoint.
    pub resumed: bool,
    /// Heuristic: the elapsed time the resumed checkpoint's progress
    /// represents (`progress_pct` x estimated duration), not a
    /// wall-clock measurement.
    pub time_saved_sec: f64,
    /// True when the primary provider failed and the fallback produced
    /// this output.
    pub degraded: bool,
    /// The primary failure, when degraded.
    pub primary_error: Option<TaskError>,
}

/// Orchestrates one task's execution lifecycle.
pub struct TaskExecutor {
    config: Config,
    checkpoints: CheckpointStore,
    retry: RetryController,
    sinks: Vec<Arc<dyn ProgressEvents>>,
}

impl TaskExecutor {
    pub fn new(config: Config, phase_num: u32, retry: RetryController) -> Self {
        Self {
            checkpoints: CheckpointStore::new(&config, phase_num),
            config,
            retry,
            sinks: Vec::new(),
        }
    }

    /// Attach a lifecycle event sink, propagated to each attempt's
    /// progress tracker.
    pub fn with_sink(mut self, sink: Arc<dyn ProgressEvents>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Execute one task end to end. See the module docs for the
    /// lifecycle; `fallback` (when given) runs as a fresh, cheaper
    /// operation with no checkpoint or resume semantics. Fatal primary
    /// failures propagate without trying the fallback.
    pub async fn execute(
        &self,
        request: ExecuteRequest,
        operation: Arc<dyn ResearchOperation>,
        fallback: Option<Arc<dyn ResearchOperation>>,
    ) -> Result<ExecutionReport> {
        let checkpoint = self.checkpoints.load(&request.task_name).await?;
        let (effective_query, baseline_pct, resumed) = match &checkpoint {
            Some(cp) if cp.resumable || request.force_resume => {
                tracing::info!(
                    "Resuming task '{}' from checkpoint at {:.0}%",
                    request.task_name,
                    cp.progress_pct
                );
                (
                    self.checkpoints.build_resume_context(&request.task_name, cp),
                    cp.progress_pct,
                    true,
                )
            }
            _ => (request.query.clone(), 0.0, false),
        };
        let time_saved_sec = baseline_pct * request.estimated_duration_sec as f64 / 100.0;

        let task_id = uuid::Uuid::new_v4().to_string();
        let tracker = self.tracker(&task_id);
        tracker
            .start(
                request.query.as_str(),
                request.provider,
                request.estimated_duration_sec,
            )
            .await?;
        if resumed {
            tracker
                .update(
                    "resuming",
                    format!("Resuming from checkpoint at {baseline_pct:.0}%"),
                    baseline_pct,
                )
                .await?;
        }

        let result = self
            .run_with_checkpoints(&request, &effective_query, baseline_pct, &tracker, Arc::clone(&operation))
            .await;

        match result {
            Ok(output) => {
                tracker
                    .complete(serde_json::json!({
                        "content": output.content,
                        "source_count": output.sources.len(),
                    }))
                    .await?;
                self.checkpoints.delete(&request.task_name).await?;
                Ok(ExecutionReport {
                    task_id,
                    task_name: request.task_name,
                    provider: request.provider,
                    output,
                    resumed,
                    time_saved_sec: if resumed { time_saved_sec } else { 0.0 },
                    degraded: false,
                    primary_error: None,
                })
            }
            Err((error, attempts)) => {
                tracker.fail(&error).await?;
                // Fatal failures (bad credentials, malformed requests)
                // would fail identically on the fallback provider.
                match fallback {
                    Some(fb) if error.kind != ErrorKind::Fatal => {
                        tracing::warn!(
                            "Task '{}' failed with {} after {} attempt(s); degrading to fallback provider",
                            request.task_name,
                            error.kind,
                            attempts
                        );
                        self.run_fallback(&request, fb, error).await
                    }
                    _ => Err(anyhow!(error.clone()).context(format!(
                        "task '{}' failed ({}) after {} attempt(s); query: {}; recovery: {}",
                        request.task_name,
                        error.kind,
                        attempts,
                        request.query,
                        error.recovery_hint()
                    ))),
                }
            }
        }
    }

    fn tracker(&self, task_id: &str) -> ProgressTracker {
        let mut tracker = ProgressTracker::new(&self.config, task_id);
        for sink in &self.sinks {
            tracker = tracker.with_sink(Arc::clone(sink));
        }
        tracker
    }

    /// Run the operation under retry while firing checkpoint milestones
    /// at fixed fractions of the estimated duration. Returns the error
    /// together with the number of attempts made, for caller context.
    async fn run_with_checkpoints(
        &self,
        request: &ExecuteRequest,
        effective_query: &str,
        baseline_pct: f64,
        tracker: &ProgressTracker,
        operation: Arc<dyn ResearchOperation>,
    ) -> std::result::Result<ResearchOutput, (TaskError, u32)> {
        let ceiling = Duration::from_secs(request.estimated_duration_sec);
        let partials = PartialSink::new();
        let started = Instant::now();
        let timer_start = tokio::time::Instant::now();
        let attempts = AtomicU32::new(1);

        let op_call = || {
            let operation = Arc::clone(&operation);
            let partials = partials.clone();
            let query = effective_query.to_string();
            async move {
                match tokio::time::timeout(ceiling, operation.run(&query, &partials)).await {
                    Ok(res) => res,
                    Err(_) => Err(TaskError::timeout(format!(
                        "operation exceeded its {}s estimated duration ceiling",
                        ceiling.as_secs()
                    ))),
                }
            }
        };
        let retry_future = self.retry.retry_with_backoff(
            op_call,
            self.config.max_retries,
            self.config.base_delay,
            |_attempt, max, delay, err| {
                attempts.fetch_add(1, Ordering::SeqCst);
                tracing::info!(
                    "Retrying (up to {} more time(s)) in {:.1}s after {}",
                    max,
                    delay.as_secs_f64(),
                    err.kind
                );
            },
        );
        tokio::pin!(retry_future);

        let mut milestones = checkpoint_schedule().into_iter();
        let mut next = milestones.next();

        let result = loop {
            match next {
                Some((sched_pct, resumable)) => {
                    let deadline = timer_start + ceiling.mul_f64(sched_pct / 100.0);
                    // Biased so that an operation finishing exactly at a
                    // milestone deadline wins the tie over the checkpoint.
                    tokio::select! {
                        biased;
                        res = &mut retry_future => break res,
                        _ = tokio::time::sleep_until(deadline) => {
                            // Progress continues from the resumed
                            // baseline, never from zero.
                            let pct = sched_pct + baseline_pct * (100.0 - sched_pct) / 100.0;
                            let (content, sources) = partials.snapshot();
                            let save = async {
                                tracker
                                    .checkpoint(
                                        "researching",
                                        format!(
                                            "Checkpoint at {sched_pct:.0}% of estimated duration"
                                        ),
                                        pct,
                                    )
                                    .await?;
                                self.checkpoints
                                    .save(
                                        &request.task_name,
                                        &request.query,
                                        pct,
                                        content,
                                        sources,
                                        resumable,
                                        started.elapsed().as_secs_f64(),
                                    )
                                    .await?;
                                Ok::<_, anyhow::Error>(())
                            };
                            if let Err(e) = save.await {
                                // A failed checkpoint write must not kill
                                // a healthy operation.
                                tracing::warn!(
                                    "Checkpoint at {sched_pct:.0}% failed for '{}': {e:#}",
                                    request.task_name
                                );
                            }
                            next = milestones.next();
                        }
                    }
                }
                None => break retry_future.await,
            }
        };

        result.map_err(|e| (e, attempts.load(Ordering::SeqCst)))
    }

    /// Degraded path: run the fallback as a fresh, lower-cost operation
    /// under its own task id, with no checkpoint or resume semantics.
    async fn run_fallback(
        &self,
        request: &ExecuteRequest,
        fallback: Arc<dyn ResearchOperation>,
        primary_error: TaskError,
    ) -> Result<ExecutionReport> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let tracker = self.tracker(&task_id);
        tracker
            .start(
                request.query.as_str(),
                ProviderKind::Fast,
                request.estimated_duration_sec,
            )
            .await?;

        let ceiling = Duration::from_secs(request.estimated_duration_sec);
        let partials = PartialSink::new();
        let result = match tokio::time::timeout(ceiling, fallback.run(&request.query, &partials))
            .await
        {
            Ok(res) => res,
            Err(_) => Err(TaskError::timeout(format!(
                "fallback operation exceeded its {}s ceiling",
                ceiling.as_secs()
            ))),
        };

        match result {
            Ok(output) => {
                tracker
                    .complete(serde_json::json!({
                        "content": output.content,
                        "source_count": output.sources.len(),
                        "degraded": true,
                    }))
                    .await?;
                Ok(ExecutionReport {
                    task_id,
                    task_name: request.task_name.clone(),
                    provider: ProviderKind::Fast,
                    output,
                    resumed: false,
                    time_saved_sec: 0.0,
                    degraded: true,
                    primary_error: Some(primary_error),
                })
            }
            Err(error) => {
                tracker.fail(&error).await?;
                Err(anyhow!(error).context(format!(
                    "fallback also failed for task '{}' (primary failure: {})",
                    request.task_name, primary_error
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::TaskStatus;
    use crate::retry::CircuitBreaker;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Operation that sleeps a fraction of the estimated duration, then
    /// returns the given result. Records the queries it was called with.
    struct ScriptedOp {
        sleep: Duration,
        results: Mutex<Vec<std::result::Result<ResearchOutput, TaskError>>>,
        queries: Mutex<Vec<String>>,
        partial: Option<serde_json::Value>,
    }

    impl ScriptedOp {
        fn new(
            sleep: Duration,
            results: Vec<std::result::Result<ResearchOutput, TaskError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                sleep,
                results: Mutex::new(results),
                queries: Mutex::new(Vec::new()),
                partial: None,
            })
        }

        fn with_partial(sleep: Duration, result: std::result::Result<ResearchOutput, TaskError>, partial: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                sleep,
                results: Mutex::new(vec![result]),
                queries: Mutex::new(Vec::new()),
                partial: Some(partial),
            })
        }

        fn seen_queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResearchOperation for ScriptedOp {
        async fn run(
            &self,
            query: &str,
            partials: &PartialSink,
        ) -> std::result::Result<ResearchOutput, TaskError> {
            self.queries.lock().unwrap().push(query.to_string());
            if let Some(p) = &self.partial {
                partials.set_content(p.clone());
                partials.push_source(serde_json::json!({"url": "https://example.com/src"}));
            }
            tokio::time::sleep(self.sleep).await;
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(output("late"))
            } else {
                results.remove(0)
            }
        }
    }

    fn output(text: &str) -> ResearchOutput {
        ResearchOutput {
            content: serde_json::json!({"report": text}),
            sources: vec![serde_json::json!({"url": "https://example.com"})],
        }
    }

    fn executor(config: &Config) -> TaskExecutor {
        TaskExecutor::new(
            config.clone(),
            1,
            RetryController::new(CircuitBreaker::new("test-class")),
        )
    }

    fn request(est: u64) -> ExecuteRequest {
        ExecuteRequest::new("landscape", "map the landscape", ProviderKind::Comprehensive, est)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_completes_and_deletes_checkpoint() {
        let temp = tempdir().unwrap();
        let config = Config::for_dir(temp.path());
        let exec = executor(&config);

        let op = ScriptedOp::new(Duration::from_secs(10), vec![Ok(output("done"))]);
        let report = exec.execute(request(100), op, None).await.unwrap();

        assert!(!report.resumed);
        assert!(!report.degraded);
        assert_eq!(report.time_saved_sec, 0.0);
        assert!(exec.checkpoints().load("landscape").await.unwrap().is_none());

        let state = ProgressTracker::read_state(&config, &report.task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_milestones_checkpoint_partials() {
        let temp = tempdir().unwrap();
        let config = Config::for_dir(temp.path());
        let exec = executor(&config);

        // Finishes at 60% of the estimate: milestones 15/30/50/55 fire.
        let op = ScriptedOp::with_partial(
            Duration::from_secs(60),
            Ok(output("done")),
            serde_json::json!({"draft": "early findings"}),
        );
        let report = exec.execute(request(100), op, None).await.unwrap();

        // Checkpoint removed on completion, but the progress history
        // shows the milestone events, strictly increasing.
        let state = ProgressTracker::read_state(&config, &report.task_id)
            .await
            .unwrap()
            .unwrap();
        let milestone_pcts: Vec<f64> = state
            .checkpoints
            .iter()
            .filter(|e| e.action.contains("Checkpoint at"))
            .map(|e| e.progress_pct)
            .collect();
        assert_eq!(milestone_pcts, vec![15.0, 30.0, 50.0, 55.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_before_30_leaves_resumable_15_checkpoint() {
        let temp = tempdir().unwrap();
        let config = Config::for_dir(temp.path());
        let exec = executor(&config);

        // Dies fatally at 25% elapsed: past the 15% milestone, before 30%.
        let op = ScriptedOp::new(
            Duration::from_secs(25),
            vec![Err(TaskError::fatal("provider rejected request"))],
        );
        let err = exec.execute(request(100), op, None).await.unwrap_err();
        assert!(err.to_string().contains("landscape"));

        let cp = exec.checkpoints().load("landscape").await.unwrap().unwrap();
        assert_eq!(cp.progress_pct, 15.0);
        assert!(cp.resumable);

        // Resuming continues from 15%, not 0% and not 25%.
        let op2 = ScriptedOp::new(Duration::from_secs(10), vec![Ok(output("done"))]);
        let report = exec
            .execute(request(100), Arc::clone(&op2) as Arc<dyn ResearchOperation>, None)
            .await
            .unwrap();
        assert!(report.resumed);
        assert_eq!(report.time_saved_sec, 15.0);
        let seen = op2.seen_queries();
        assert!(seen[0].contains("Progress already completed: 15%"));
        assert!(seen[0].contains("map the landscape"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_interrupt_leaves_non_resumable_checkpoint() {
        let temp = tempdir().unwrap();
        let config = Config::for_dir(temp.path());
        let exec = executor(&config);

        // Dies at elapsed 2100s of a 3600s estimate (58%): the newest
        // surviving checkpoint is the 55% one, past the threshold.
        let mut req = request(3600);
        req.task_name = "long-haul".to_string();
        let op = ScriptedOp::new(
            Duration::from_secs(2100),
            vec![Err(TaskError::fatal("crashed late"))],
        );
        let _ = exec.execute(req, op, None).await.unwrap_err();

        let cp = exec.checkpoints().load("long-haul").await.unwrap().unwrap();
        assert_eq!(cp.progress_pct, 55.0);
        assert!(!cp.resumable);

        // A fresh attempt ignores the non-resumable checkpoint.
        let mut req = request(3600);
        req.task_name = "long-haul".to_string();
        let op2 = ScriptedOp::new(Duration::from_secs(10), vec![Ok(output("done"))]);
        let report = exec
            .execute(req, Arc::clone(&op2) as Arc<dyn ResearchOperation>, None)
            .await
            .unwrap();
        assert!(!report.resumed);
        assert_eq!(op2.seen_queries()[0], "map the landscape");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_degrades_gracefully() {
        let temp = tempdir().unwrap();
        let config = Config::for_dir(temp.path());
        let exec = executor(&config);

        // Rate limited on every attempt: the breaker opens after the
        // third and the executor degrades to the fallback.
        let primary = ScriptedOp::new(
            Duration::from_secs(1),
            vec![
                Err(TaskError::rate_limited("429 too many requests", None)),
                Err(TaskError::rate_limited("429 too many requests", None)),
                Err(TaskError::rate_limited("429 too many requests", None)),
            ],
        );
        let fallback = ScriptedOp::new(Duration::from_secs(1), vec![Ok(output("shallow"))]);

        let report = exec
            .execute(
                request(100),
                primary,
                Some(fallback as Arc<dyn ResearchOperation>),
            )
            .await
            .unwrap();

        assert!(report.degraded);
        assert_eq!(report.provider, ProviderKind::Fast);
        assert_eq!(
            report.primary_error.as_ref().unwrap().kind,
            crate::error::ErrorKind::CircuitOpen
        );
        assert_eq!(report.output.content["report"], "shallow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_primary_never_reaches_fallback() {
        let temp = tempdir().unwrap();
        let config = Config::for_dir(temp.path());
        let exec = executor(&config);

        let primary = ScriptedOp::new(
            Duration::from_secs(1),
            vec![Err(TaskError::fatal("401 invalid credentials"))],
        );
        let fallback = ScriptedOp::new(Duration::from_secs(1), vec![Ok(output("shallow"))]);

        let err = exec
            .execute(
                request(100),
                primary,
                Some(Arc::clone(&fallback) as Arc<dyn ResearchOperation>),
            )
            .await
            .unwrap_err();

        let task_err = err.downcast_ref::<TaskError>().unwrap();
        assert_eq!(task_err.kind, crate::error::ErrorKind::Fatal);
        assert!(fallback.seen_queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_at_milestone_boundary_skips_that_checkpoint() {
        let temp = tempdir().unwrap();
        let config = Config::for_dir(temp.path());
        let exec = executor(&config);

        // Finishes exactly when the 30% checkpoint is due; completion
        // wins the tie, so only the 15% milestone fires.
        let op = ScriptedOp::new(Duration::from_secs(30), vec![Ok(output("done"))]);
        let report = exec.execute(request(100), op, None).await.unwrap();

        let state = ProgressTracker::read_state(&config, &report.task_id)
            .await
            .unwrap()
            .unwrap();
        let milestone_pcts: Vec<f64> = state
            .checkpoints
            .iter()
            .filter(|e| e.action.contains("Checkpoint at"))
            .map(|e| e.progress_pct)
            .collect();
        assert_eq!(milestone_pcts, vec![15.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_timeout_is_classified_and_retried() {
        let temp = tempdir().unwrap();
        let config = Config::for_dir(temp.path());
        let exec = executor(&config);

        // Every attempt sleeps past the 100s ceiling, so each one is
        // cut off and classified as a timeout until retries run out.
        let op = ScriptedOp::new(Duration::from_secs(500), vec![]);
        let err = exec.execute(request(100), op, None).await.unwrap_err();
        let task_err = err.downcast_ref::<TaskError>().unwrap();
        assert_eq!(task_err.kind, crate::error::ErrorKind::Timeout);
    }
}
