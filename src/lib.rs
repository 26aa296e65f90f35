//! # Bulk Executor
//!
//! Drive a large collection of independent work items to completion against
//! a remote service with limited capacity.
//!
//! ## Key Features
//!
//! - **Bounded concurrency** — at most `concurrency` handler calls in flight,
//!   pulled greedily from a shared queue so fast items never wait on slow ones
//! - **Global rate limiting** — a minimum spacing between the start of any two
//!   calls, shared by every worker
//! - **Retry with exponential backoff** — transient failures are retried;
//!   backoff waits do not occupy a concurrency slot
//! - **Permanent failures** — handlers can mark an error as terminal to skip
//!   the retry budget entirely
//! - **Live progress** — completed/total, rate and ETA delivered to a callback
//! - **Cancellation and deadlines** — stop dispatching, let in-flight calls
//!   finish, and get a result marked `cancelled`
//!
//! ## Quick Start
//!
//! 1. Implement [`TaskHandler`] for your unit of work, or wrap a closure with
//!    [`handler_fn`]
//! 2. Build a [`BatchOperationConfig`]
//! 3. Call [`BatchExecutor::run()`] and inspect the [`BatchResult`]
//!
//! ```no_run
//! use std::time::Duration;
//! use bulk_executor::*;
//!
//! # async fn demo() -> bulk_executor::Result<()> {
//! let config = BatchOperationConfig::builder()
//!     .with_concurrency(4)
//!     .with_request_delay(Duration::from_millis(100))
//!     .with_max_retries(2)
//!     .build();
//!
//! let handler = handler_fn(|address: String| async move {
//!     // call the remote service here
//!     Ok::<_, TaskError>(address.len())
//! });
//!
//! let items = vec!["a@example.com".to_string(), "b@example.com".to_string()];
//! let result = BatchExecutor::new(config).run(items, handler, None).await?;
//! println!("{} ok, {} failed", result.summary.succeeded, result.summary.failed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod metrics;
pub mod pattern;
pub mod pool;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod types;

pub use config::{BatchOperationConfig, BatchOperationConfigBuilder};
pub use error::{ExecutorError, Result, TaskError};
pub use executor::BatchExecutor;
pub use handler::{handler_fn, HandlerFn, TaskHandler};
pub use metrics::OperationMetrics;
pub use progress::{ProgressCallback, ProgressTracker};
pub use rate_limit::RateLimiter;
pub use retry::{ExponentialBackoff, NoRetry, RetryPolicy};
pub use types::{
    BatchResult, BatchSummary, OperationFailure, OperationProgress, Task, TaskOutput, TaskState,
};

pub use tokio_util::sync::CancellationToken;
