use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ExecutorError, Result};

/// Configuration for a single bulk run.
///
/// Use [`BatchOperationConfig::builder()`] for ergonomic construction, or
/// [`BatchOperationConfig::default()`] for sensible defaults (5 concurrent
/// workers, no throttling, 3 retries starting at 1s).
///
/// Durations serialize as integer milliseconds so configs can be loaded from
/// JSON (`{"concurrency": 4, "requestDelayMs": 250}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchOperationConfig {
    /// Number of tasks pulled per scheduling chunk.
    pub batch_size: usize,

    /// Maximum simultaneous in-flight handler calls.
    pub concurrency: usize,

    /// Minimum spacing between the start of two handler calls (0 = no throttling).
    #[serde(rename = "requestDelayMs", with = "duration_ms")]
    pub request_delay: Duration,

    /// Retries per task after the first attempt.
    pub max_retries: u32,

    /// Base backoff; doubled on every further retry.
    #[serde(rename = "retryDelayMs", with = "duration_ms")]
    pub retry_delay: Duration,

    /// Ceiling for the backoff. `None` = uncapped.
    #[serde(rename = "maxRetryDelayMs", with = "option_duration_ms")]
    pub max_retry_delay: Option<Duration>,

    /// Upper bound of uniform random jitter added to each backoff.
    #[serde(rename = "retryJitterMs", with = "duration_ms")]
    pub retry_jitter: Duration,

    /// Deliver progress snapshots to the callback.
    pub enable_progress: bool,

    /// Record per-attempt response times for [`OperationMetrics`](crate::OperationMetrics).
    pub enable_metrics: bool,

    /// Overall deadline for the run. Expiry cancels the run.
    #[serde(rename = "timeoutMs", with = "option_duration_ms")]
    pub timeout: Option<Duration>,
}

impl Default for BatchOperationConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 5,
            request_delay: Duration::ZERO,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: None,
            retry_jitter: Duration::ZERO,
            enable_progress: true,
            enable_metrics: true,
            timeout: None,
        }
    }
}

impl BatchOperationConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> BatchOperationConfigBuilder {
        BatchOperationConfigBuilder::default()
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ExecutorError::InvalidConfig(e.to_string()))
    }

    /// Reject settings that cannot be clamped into something meaningful.
    pub fn validate(&self) -> Result<()> {
        if let Some(ceiling) = self.max_retry_delay {
            if ceiling < self.retry_delay {
                return Err(ExecutorError::InvalidConfig(format!(
                    "max retry delay ({:?}) is below the base retry delay ({:?})",
                    ceiling, self.retry_delay
                )));
            }
        }
        Ok(())
    }

    /// Return a copy with `concurrency` and `batch_size` clamped to at least 1.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        if config.concurrency < 1 {
            warn!(concurrency = config.concurrency, "concurrency below 1, clamping to 1");
            config.concurrency = 1;
        }
        if config.batch_size < 1 {
            warn!(batch_size = config.batch_size, "batch size below 1, clamping to 1");
            config.batch_size = 1;
        }
        config
    }
}

/// Builder for [`BatchOperationConfig`].
#[derive(Default)]
pub struct BatchOperationConfigBuilder {
    config: BatchOperationConfig,
}

impl BatchOperationConfigBuilder {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.config.request_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Cap exponential backoff at `ceiling`.
    pub fn with_max_retry_delay(mut self, ceiling: Duration) -> Self {
        self.config.max_retry_delay = Some(ceiling);
        self
    }

    pub fn with_retry_jitter(mut self, jitter: Duration) -> Self {
        self.config.retry_jitter = jitter;
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.config.enable_progress = enabled;
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.config.enable_metrics = enabled;
        self
    }

    /// Cancel the run once `timeout` has elapsed since it started.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Build the final [`BatchOperationConfig`].
    pub fn build(self) -> BatchOperationConfig {
        self.config
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
