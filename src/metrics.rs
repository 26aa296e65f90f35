use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Metrics computed once when a run finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetrics {
    pub total_time_ms: u64,
    /// Mean duration of a handler invocation, over every attempt.
    pub average_response_time_ms: f64,
    /// Handler invocations per second of wall time.
    pub requests_per_second: f64,
    pub total_retries: u64,
    /// failed / settled, 0.0 when nothing settled.
    pub error_rate: f64,
}

#[derive(Debug, Default)]
struct AttemptStats {
    total_ms: u64,
    count: u64,
    retries: u64,
}

/// Accumulates per-attempt timings while a run is in progress.
pub struct MetricsRecorder {
    record_timings: bool,
    stats: Mutex<AttemptStats>,
}

impl MetricsRecorder {
    pub fn new(record_timings: bool) -> Self {
        Self {
            record_timings,
            stats: Mutex::new(AttemptStats::default()),
        }
    }

    /// Record one handler invocation and how long it took.
    pub fn record_attempt(&self, duration: Duration) {
        match self.stats.lock() {
            Ok(mut stats) => {
                stats.count += 1;
                if self.record_timings {
                    stats.total_ms += duration.as_millis() as u64;
                }
            }
            Err(e) => warn!("metrics mutex poisoned: {}", e),
        }
    }

    pub fn record_retry(&self) {
        match self.stats.lock() {
            Ok(mut stats) => stats.retries += 1,
            Err(e) => warn!("metrics mutex poisoned: {}", e),
        }
    }

    /// Handler invocations recorded so far.
    pub fn attempts(&self) -> u64 {
        self.stats.lock().map(|s| s.count).unwrap_or(0)
    }

    pub fn finish(&self, total_time: Duration, settled: usize, failed: usize) -> OperationMetrics {
        let (total_ms, count, retries) = match self.stats.lock() {
            Ok(stats) => (stats.total_ms, stats.count, stats.retries),
            Err(e) => {
                let stats = e.into_inner();
                (stats.total_ms, stats.count, stats.retries)
            }
        };

        let secs = total_time.as_secs_f64();
        OperationMetrics {
            total_time_ms: total_time.as_millis() as u64,
            average_response_time_ms: if self.record_timings && count > 0 {
                total_ms as f64 / count as f64
            } else {
                0.0
            },
            requests_per_second: if secs > 0.0 { count as f64 / secs } else { 0.0 },
            total_retries: retries,
            error_rate: if settled > 0 {
                failed as f64 / settled as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_and_rate() {
        let recorder = MetricsRecorder::new(true);
        recorder.record_attempt(Duration::from_millis(100));
        recorder.record_attempt(Duration::from_millis(300));
        recorder.record_retry();

        let metrics = recorder.finish(Duration::from_secs(2), 1, 0);
        assert_eq!(metrics.average_response_time_ms, 200.0);
        assert_eq!(metrics.requests_per_second, 1.0);
        assert_eq!(metrics.total_retries, 1);
        assert_eq!(metrics.total_time_ms, 2000);
        assert_eq!(recorder.attempts(), 2);
    }

    #[test]
    fn test_error_rate() {
        let recorder = MetricsRecorder::new(true);
        let metrics = recorder.finish(Duration::from_secs(1), 4, 1);
        assert_eq!(metrics.error_rate, 0.25);
    }

    #[test]
    fn test_timings_disabled() {
        let recorder = MetricsRecorder::new(false);
        recorder.record_attempt(Duration::from_millis(100));

        let metrics = recorder.finish(Duration::from_secs(1), 1, 0);
        assert_eq!(metrics.average_response_time_ms, 0.0);
        // Attempt counts are still kept
        assert_eq!(metrics.requests_per_second, 1.0);
    }

    #[test]
    fn test_zero_elapsed() {
        let metrics = MetricsRecorder::new(true).finish(Duration::ZERO, 0, 0);
        assert_eq!(metrics, OperationMetrics::default());
    }
}
