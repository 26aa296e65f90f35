use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::metrics::OperationMetrics;

/// Per-task lifecycle: Pending -> Running -> Succeeded | Retrying -> Pending | Failed.
///
/// `Retrying` is a timed wait that does not hold a concurrency slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

/// One unit of work: a caller-supplied item plus its identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task<T> {
    /// Stable identifier used for result correlation and logging.
    pub id: String,
    /// Position in the input collection.
    pub index: usize,
    pub data: T,
}

impl<T> Task<T> {
    /// Create a task with the default `item-{index}` identifier.
    pub fn new(index: usize, data: T) -> Self {
        Self {
            id: format!("item-{}", index),
            index,
            data,
        }
    }

    /// Set a custom ID for this task (builder pattern).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// A settled success.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutput<R> {
    pub item_id: String,
    pub index: usize,
    pub value: R,
    /// Handler invocations it took, including the successful one.
    pub attempts: u32,
    /// Duration of the successful attempt.
    pub duration_ms: u64,
}

/// A task that failed for good, either permanently or after exhausting retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFailure {
    pub item_id: String,
    pub index: usize,
    /// Message of the last error.
    pub error: String,
    pub status_code: Option<u16>,
    pub timestamp: DateTime<Utc>,
    /// Handler invocations beyond the first.
    pub retry_attempts: u32,
    pub context: Option<serde_json::Value>,
}

impl OperationFailure {
    pub(crate) fn from_error(item_id: &str, index: usize, error: TaskError, retry_attempts: u32) -> Self {
        Self {
            item_id: item_id.to_string(),
            index,
            error: error.message,
            status_code: error.status_code,
            timestamp: Utc::now(),
            retry_attempts,
            context: error.context,
        }
    }
}

/// Live progress, delivered to the progress callback after each settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationProgress {
    /// Human-readable label of the current scheduling chunk ("batch 2/5").
    pub current_step: String,
    pub completed: usize,
    pub total: usize,
    /// 0.0 - 100.0
    pub percentage: f64,
    /// `None` until at least one task has settled.
    pub estimated_time_remaining_ms: Option<u64>,
    /// Settled tasks per second since the start of the run.
    pub current_rate: f64,
    pub error_count: usize,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Counts and rates derived from a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items never dispatched because the run was cancelled.
    pub not_started: usize,
    /// succeeded / (succeeded + failed), 0.0 when nothing settled.
    pub success_rate: f64,
    /// Handler invocations across all items.
    pub total_attempts: u64,
}

/// Final outcome of a run.
///
/// For runs that were not cancelled, `successful` and `failed` together hold
/// every input item exactly once. Both lists are in completion order; use
/// [`sort_by_index`](Self::sort_by_index) to restore input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult<R> {
    pub run_id: String,
    pub successful: Vec<TaskOutput<R>>,
    pub failed: Vec<OperationFailure>,
    pub metrics: OperationMetrics,
    pub summary: BatchSummary,
    /// Set when cancellation stopped the run before every item settled.
    pub cancelled: bool,
    /// Set when that cancellation came from the configured timeout.
    pub timed_out: bool,
}

impl<R> BatchResult<R> {
    /// Result for an empty input.
    pub(crate) fn empty(run_id: String) -> Self {
        Self {
            run_id,
            successful: Vec::new(),
            failed: Vec::new(),
            metrics: OperationMetrics::default(),
            summary: BatchSummary {
                total: 0,
                succeeded: 0,
                failed: 0,
                not_started: 0,
                success_rate: 0.0,
                total_attempts: 0,
            },
            cancelled: false,
            timed_out: false,
        }
    }

    /// True when every item succeeded and the run was not cancelled.
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.failed.is_empty() && self.summary.not_started == 0
    }

    /// Successful values, in completion order.
    pub fn values(&self) -> impl Iterator<Item = &R> {
        self.successful.iter().map(|o| &o.value)
    }

    /// Consume the result, keeping only the successful values.
    pub fn into_values(self) -> Vec<R> {
        self.successful.into_iter().map(|o| o.value).collect()
    }

    pub fn output_for(&self, item_id: &str) -> Option<&TaskOutput<R>> {
        self.successful.iter().find(|o| o.item_id == item_id)
    }

    pub fn failure_for(&self, item_id: &str) -> Option<&OperationFailure> {
        self.failed.iter().find(|f| f.item_id == item_id)
    }

    /// Terminal state of an item, or `None` if it never started.
    pub fn outcome_for(&self, item_id: &str) -> Option<TaskState> {
        if self.output_for(item_id).is_some() {
            Some(TaskState::Succeeded)
        } else if self.failure_for(item_id).is_some() {
            Some(TaskState::Failed)
        } else {
            None
        }
    }

    /// Restore input order in both lists.
    pub fn sort_by_index(&mut self) {
        self.successful.sort_by_key(|o| o.index);
        self.failed.sort_by_key(|f| f.index);
    }
}
