use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::BatchOperationConfig;
use crate::error::{ExecutorError, Result};
use crate::metrics::MetricsRecorder;
use crate::pool::{SettlementSink, TaskOutcome, WorkerPool};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::rate_limit::RateLimiter;
use crate::retry::{ExponentialBackoff, RetryPolicy};
use crate::types::{BatchResult, BatchSummary, OperationFailure, Task, TaskOutput};
use crate::TaskHandler;

/// Orchestrates a bulk run: validates the input, drives the [`WorkerPool`],
/// tracks progress, and folds every settlement into a [`BatchResult`].
///
/// An executor can be reused for many runs. Cancelling its token stops the
/// current run and every later run until [`BatchExecutor::reset_cancellation`]
/// installs a fresh token.
pub struct BatchExecutor {
    config: BatchOperationConfig,
    retry: Option<Arc<dyn RetryPolicy>>,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("config", &self.config)
            .field("custom_retry_policy", &self.retry.is_some())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl BatchExecutor {
    pub fn new(config: BatchOperationConfig) -> Self {
        Self {
            config,
            retry: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Replace the default exponential backoff built from the config.
    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Some(Arc::new(policy));
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// A handle that cancels runs of this executor.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Install a fresh token so the executor can run again after a cancel.
    ///
    /// Handles taken from [`BatchExecutor::cancellation_token`] before the
    /// reset no longer affect this executor.
    pub fn reset_cancellation(&mut self) {
        if self.cancellation.is_cancelled() {
            debug!("replacing cancelled token");
        }
        self.cancellation = CancellationToken::new();
    }

    pub fn config(&self) -> &BatchOperationConfig {
        &self.config
    }

    /// Run `handler` over `items`. Items get ids `item-{index}`.
    pub async fn run<T, H>(
        &self,
        items: Vec<T>,
        handler: H,
        on_progress: Option<ProgressCallback>,
    ) -> Result<BatchResult<H::Output>>
    where
        T: Send + Sync + 'static,
        H: TaskHandler<T>,
    {
        let tasks = items
            .into_iter()
            .enumerate()
            .map(|(index, data)| Task::new(index, data))
            .collect();
        self.run_tasks(tasks, handler, on_progress).await
    }

    /// Run `handler` over caller-identified tasks. Ids must be unique.
    pub async fn run_tasks<T, H>(
        &self,
        tasks: Vec<Task<T>>,
        handler: H,
        on_progress: Option<ProgressCallback>,
    ) -> Result<BatchResult<H::Output>>
    where
        T: Send + Sync + 'static,
        H: TaskHandler<T>,
    {
        self.config.validate()?;
        let config = self.config.normalized();

        let mut ids = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(ExecutorError::DuplicateTaskId(task.id.clone()));
            }
        }
        drop(ids);

        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("batch_run", run_id = %run_id);

        if tasks.is_empty() {
            info!(parent: &span, "empty batch, nothing to run");
            return Ok(BatchResult::empty(run_id));
        }

        self.execute(config, run_id, tasks, handler, on_progress)
            .instrument(span)
            .await
    }

    async fn execute<T, H>(
        &self,
        config: BatchOperationConfig,
        run_id: String,
        tasks: Vec<Task<T>>,
        handler: H,
        on_progress: Option<ProgressCallback>,
    ) -> Result<BatchResult<H::Output>>
    where
        T: Send + Sync + 'static,
        H: TaskHandler<T>,
    {
        let total = tasks.len();
        info!(
            total,
            concurrency = config.concurrency,
            batch_size = config.batch_size,
            request_delay_ms = config.request_delay.as_millis() as u64,
            max_retries = config.max_retries,
            "starting batch run"
        );

        let started = Instant::now();
        let cancel = self.cancellation.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let deadline = config.timeout.map(|timeout| {
            let cancel = cancel.clone();
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(
                async move {
                    tokio::time::sleep(timeout).await;
                    info!(timeout_ms = timeout.as_millis() as u64, "deadline reached, cancelling");
                    timed_out.store(true, Ordering::SeqCst);
                    cancel.cancel();
                }
                .in_current_span(),
            )
        });

        let callback = if config.enable_progress { on_progress } else { None };
        let collector = Arc::new(Collector::new(total, ProgressTracker::new(total, callback)));
        let metrics = Arc::new(MetricsRecorder::new(config.enable_metrics));
        let retry: Arc<dyn RetryPolicy> = match &self.retry {
            Some(policy) => Arc::clone(policy),
            None => Arc::new(ExponentialBackoff::from(&config)),
        };

        let pool = WorkerPool::new(
            config.concurrency,
            config.batch_size,
            Arc::new(RateLimiter::new(config.request_delay)),
            retry,
            Arc::clone(&metrics),
            cancel.clone(),
        );
        let report = pool.run(tasks, Arc::new(handler), Arc::clone(&collector)).await;

        if let Some(handle) = deadline {
            handle.abort();
        }
        let report = report?;
        // A token that fired after every task settled did not stop anything.
        let cancelled = report.interrupted;
        let timed_out = cancelled && timed_out.load(Ordering::SeqCst);
        let elapsed = started.elapsed();

        let (successful, failed) = collector.take()?;
        let settled = successful.len() + failed.len();
        let progress = collector.tracker.snapshot();

        if settled + report.not_started != total || progress.completed != settled {
            error!(
                total,
                settled,
                not_started = report.not_started,
                progress_completed = progress.completed,
                "accounting mismatch"
            );
            return Err(ExecutorError::InvariantViolation(format!(
                "{} settled + {} not started != {} total (progress counted {})",
                settled, report.not_started, total, progress.completed
            )));
        }
        if !cancelled && report.not_started > 0 {
            return Err(ExecutorError::InvariantViolation(format!(
                "{} tasks never started in a run that was not cancelled",
                report.not_started
            )));
        }

        let total_attempts = metrics.attempts();
        let metrics = metrics.finish(elapsed, settled, failed.len());
        let summary = BatchSummary {
            total,
            succeeded: successful.len(),
            failed: failed.len(),
            not_started: report.not_started,
            success_rate: if settled > 0 {
                successful.len() as f64 / settled as f64
            } else {
                0.0
            },
            total_attempts,
        };

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            not_started = summary.not_started,
            cancelled,
            elapsed_ms = metrics.total_time_ms,
            "batch run finished"
        );

        Ok(BatchResult {
            run_id,
            successful,
            failed,
            metrics,
            summary,
            cancelled,
            timed_out,
        })
    }
}

struct Collected<R> {
    successful: Vec<TaskOutput<R>>,
    failed: Vec<OperationFailure>,
    settled_ids: HashSet<String>,
    violation: Option<String>,
}

/// Folds settlements into the result lists and feeds the progress tracker.
struct Collector<R> {
    state: Mutex<Collected<R>>,
    tracker: ProgressTracker,
}

impl<R> Collector<R> {
    fn new(total: usize, tracker: ProgressTracker) -> Self {
        Self {
            state: Mutex::new(Collected {
                successful: Vec::with_capacity(total),
                failed: Vec::new(),
                settled_ids: HashSet::with_capacity(total),
                violation: None,
            }),
            tracker,
        }
    }

    fn record_violation(&self, message: String) {
        error!("{}", message);
        if let Ok(mut state) = self.state.lock() {
            state.violation.get_or_insert(message);
        }
    }

    /// Drain the result lists, failing on any violation seen during the run.
    fn take(&self) -> Result<(Vec<TaskOutput<R>>, Vec<OperationFailure>)> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| ExecutorError::InvariantViolation(e.to_string()))?;
        if let Some(violation) = state.violation.take() {
            return Err(ExecutorError::InvariantViolation(violation));
        }
        Ok((
            std::mem::take(&mut state.successful),
            std::mem::take(&mut state.failed),
        ))
    }
}

impl<R: Send + 'static> SettlementSink<R> for Collector<R> {
    fn settle(&self, outcome: TaskOutcome<R>) {
        let succeeded = outcome.is_success();
        {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(e) => {
                    error!("result collector mutex poisoned: {}", e);
                    return;
                }
            };
            if !state.settled_ids.insert(outcome.item_id().to_string()) {
                let message = format!("task {} settled twice", outcome.item_id());
                drop(state);
                self.record_violation(message);
                return;
            }
            match outcome {
                TaskOutcome::Succeeded(output) => state.successful.push(output),
                TaskOutcome::Failed(failure) => state.failed.push(failure),
            }
        }

        if let Err(e) = self.tracker.on_task_settled(succeeded) {
            self.record_violation(e.to_string());
        }
    }

    fn on_chunk(&self, chunk: usize, chunks: usize) {
        self.tracker.set_step(format!("batch {}/{}", chunk, chunks));
    }
}
