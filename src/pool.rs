use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument};

use crate::error::{ExecutorError, Result, TaskError};
use crate::metrics::MetricsRecorder;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::types::{OperationFailure, Task, TaskOutput};
use crate::TaskHandler;

/// Terminal outcome of one task.
#[derive(Debug)]
pub enum TaskOutcome<R> {
    Succeeded(TaskOutput<R>),
    Failed(OperationFailure),
}

impl<R> TaskOutcome<R> {
    pub fn item_id(&self) -> &str {
        match self {
            TaskOutcome::Succeeded(o) => &o.item_id,
            TaskOutcome::Failed(f) => &f.item_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded(_))
    }
}

/// Receives every settlement, exactly once per finished task.
///
/// Called concurrently from the pool's spawned attempts.
pub trait SettlementSink<R>: Send + Sync + 'static {
    fn settle(&self, outcome: TaskOutcome<R>);

    /// The dispatcher started pulling chunk `chunk` of `chunks`.
    fn on_chunk(&self, _chunk: usize, _chunks: usize) {}
}

/// What the pool did with the tasks it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    /// Tasks whose first attempt started.
    pub dispatched: usize,
    /// Tasks never attempted because the run was cancelled.
    pub not_started: usize,
    /// Cancellation cut the run short: some task was left unstarted or had
    /// its retries stopped. A token that fires after every task already
    /// settled does not count.
    pub interrupted: bool,
}

/// Bounded-concurrency executor for a queue of tasks.
///
/// A single dispatcher owns the queue and hands each task to a spawned
/// attempt loop once a concurrency slot is free. An attempt holds its slot
/// only while waiting on the rate limiter and running the handler; retry
/// backoff waits happen without a slot, and the retry queues for a new one.
pub struct WorkerPool {
    concurrency: usize,
    batch_size: usize,
    limiter: Arc<RateLimiter>,
    retry: Arc<dyn RetryPolicy>,
    metrics: Arc<MetricsRecorder>,
    cancel: CancellationToken,
}

struct Attempts<H, S> {
    handler: Arc<H>,
    sink: Arc<S>,
    limiter: Arc<RateLimiter>,
    retry: Arc<dyn RetryPolicy>,
    metrics: Arc<MetricsRecorder>,
    cancel: CancellationToken,
    slots: Arc<Semaphore>,
}

enum Driven {
    Settled,
    /// Settled as failed because cancellation stopped its retries.
    Interrupted,
    NotStarted,
}

impl WorkerPool {
    pub fn new(
        concurrency: usize,
        batch_size: usize,
        limiter: Arc<RateLimiter>,
        retry: Arc<dyn RetryPolicy>,
        metrics: Arc<MetricsRecorder>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            batch_size: batch_size.max(1),
            limiter,
            retry,
            metrics,
            cancel,
        }
    }

    /// Run every task to settlement, or until the cancellation token fires.
    ///
    /// Returns only after all spawned attempts have finished, so in-flight
    /// handler calls are never abandoned mid-call.
    pub async fn run<T, H, S>(
        &self,
        tasks: Vec<Task<T>>,
        handler: Arc<H>,
        sink: Arc<S>,
    ) -> Result<PoolReport>
    where
        T: Send + Sync + 'static,
        H: TaskHandler<T>,
        S: SettlementSink<H::Output>,
    {
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let ctx = Arc::new(Attempts {
            handler,
            sink: Arc::clone(&sink),
            limiter: Arc::clone(&self.limiter),
            retry: Arc::clone(&self.retry),
            metrics: Arc::clone(&self.metrics),
            cancel: self.cancel.clone(),
            slots: Arc::clone(&slots),
        });

        let mut queue: VecDeque<Task<T>> = tasks.into();
        let chunks = queue.len().div_ceil(self.batch_size);
        let mut set = JoinSet::new();
        let mut chunk = 0;

        'dispatch: while !queue.is_empty() {
            if self.cancel.is_cancelled() {
                break;
            }
            chunk += 1;
            sink.on_chunk(chunk, chunks);
            debug!(chunk, chunks, remaining = queue.len(), "dispatching chunk");

            for _ in 0..self.batch_size {
                if queue.is_empty() {
                    break;
                }
                let permit = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break 'dispatch,
                    permit = Arc::clone(&slots).acquire_owned() => permit
                        .map_err(|e| ExecutorError::InvariantViolation(e.to_string()))?,
                };
                let Some(task) = queue.pop_front() else {
                    break 'dispatch;
                };
                set.spawn(drive(Arc::clone(&ctx), task, permit).in_current_span());
            }
        }

        let mut report = PoolReport {
            dispatched: 0,
            not_started: queue.len(),
            interrupted: !queue.is_empty(),
        };
        if !queue.is_empty() {
            debug!(not_started = queue.len(), "cancelled with tasks still queued");
        }

        // Drain every member even after a fatal error; dropping the set
        // would abort in-flight handler calls.
        let mut fatal: Option<ExecutorError> = None;
        while let Some(joined) = set.join_next().await {
            let error = match joined {
                Ok(Ok(Driven::Settled)) => {
                    report.dispatched += 1;
                    continue;
                }
                Ok(Ok(Driven::Interrupted)) => {
                    report.dispatched += 1;
                    report.interrupted = true;
                    continue;
                }
                Ok(Ok(Driven::NotStarted)) => {
                    report.not_started += 1;
                    report.interrupted = true;
                    continue;
                }
                Ok(Err(e)) => e,
                Err(e) if e.is_panic() => ExecutorError::WorkerPanicked(e.to_string()),
                Err(e) => ExecutorError::InvariantViolation(e.to_string()),
            };
            error!(error = %error, remaining = set.len(), "worker failed, draining pool");
            fatal.get_or_insert(error);
        }

        match fatal {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }
}

/// Attempt loop for one task: Pending -> Running -> Succeeded | Retrying -> Pending | Failed.
async fn drive<T, H, S>(
    ctx: Arc<Attempts<H, S>>,
    task: Task<T>,
    permit: OwnedSemaphorePermit,
) -> Result<Driven>
where
    T: Send + Sync + 'static,
    H: TaskHandler<T>,
    S: SettlementSink<H::Output>,
{
    let mut permit = Some(permit);
    let mut attempts: u32 = 0;
    let mut last_error: Option<TaskError> = None;

    loop {
        let slot = match permit.take() {
            Some(p) => p,
            None => tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Ok(abandon(&ctx, &task, attempts, last_error)),
                p = Arc::clone(&ctx.slots).acquire_owned() => p
                    .map_err(|e| ExecutorError::InvariantViolation(e.to_string()))?,
            },
        };

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Ok(abandon(&ctx, &task, attempts, last_error)),
            _ = ctx.limiter.acquire() => {}
        }

        attempts += 1;
        if attempts > 1 {
            ctx.metrics.record_retry();
        }
        debug!(item_id = %task.id, attempt = attempts, "dispatching");

        let started = Instant::now();
        let result = ctx.handler.execute(&task.data).await;
        let elapsed = started.elapsed();
        ctx.metrics.record_attempt(elapsed);
        drop(slot);

        let error = match result {
            Ok(value) => {
                ctx.sink.settle(TaskOutcome::Succeeded(TaskOutput {
                    item_id: task.id.clone(),
                    index: task.index,
                    value,
                    attempts,
                    duration_ms: elapsed.as_millis() as u64,
                }));
                return Ok(Driven::Settled);
            }
            Err(error) => error,
        };

        if error.is_permanent() || !ctx.retry.should_retry(attempts, &error) {
            warn!(
                item_id = %task.id,
                attempts,
                permanent = error.is_permanent(),
                error = %error,
                "task failed"
            );
            ctx.sink.settle(TaskOutcome::Failed(OperationFailure::from_error(
                &task.id,
                task.index,
                error,
                attempts - 1,
            )));
            return Ok(Driven::Settled);
        }

        let delay = ctx.retry.delay_for(attempts);
        warn!(
            item_id = %task.id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "attempt failed, retrying"
        );
        last_error = Some(error);

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Ok(abandon(&ctx, &task, attempts, last_error)),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Stop a task because the run was cancelled before its next attempt.
///
/// A task that never ran is reported as not started. One that already failed
/// settles as failed with its last error.
fn abandon<T, H, S>(
    ctx: &Attempts<H, S>,
    task: &Task<T>,
    attempts: u32,
    last_error: Option<TaskError>,
) -> Driven
where
    H: TaskHandler<T>,
    S: SettlementSink<H::Output>,
{
    match last_error {
        Some(error) if attempts > 0 => {
            debug!(item_id = %task.id, attempts, "cancelled during retry backoff");
            ctx.sink.settle(TaskOutcome::Failed(OperationFailure::from_error(
                &task.id,
                task.index,
                error,
                attempts - 1,
            )));
            Driven::Interrupted
        }
        _ => Driven::NotStarted,
    }
}
