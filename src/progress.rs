use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::time::Instant;

use crate::error::{ExecutorError, Result};
use crate::types::OperationProgress;

/// Caller-supplied sink for progress snapshots.
pub type ProgressCallback = Arc<dyn Fn(&OperationProgress) + Send + Sync>;

#[derive(Default)]
struct Delivery {
    /// Newest snapshot not yet handed to the callback.
    pending: Option<OperationProgress>,
    /// Some settlement path is currently inside the callback.
    delivering: bool,
    last_delivered: Option<usize>,
}

/// Owns the run's [`OperationProgress`] and feeds the progress callback.
///
/// Counter updates go through one mutex. The callback runs on the settling
/// task, outside that mutex. When a callback is already running elsewhere the
/// new snapshot is parked and picked up by the running deliverer, so a slow
/// callback coalesces updates instead of queueing them. The last snapshot
/// delivered always reflects the final counts.
pub struct ProgressTracker {
    started: Instant,
    state: Mutex<OperationProgress>,
    callback: Option<ProgressCallback>,
    delivery: Mutex<Delivery>,
}

impl ProgressTracker {
    pub fn new(total: usize, callback: Option<ProgressCallback>) -> Self {
        let now = Utc::now();
        Self {
            started: Instant::now(),
            state: Mutex::new(OperationProgress {
                current_step: String::new(),
                completed: 0,
                total,
                percentage: if total == 0 { 100.0 } else { 0.0 },
                estimated_time_remaining_ms: None,
                current_rate: 0.0,
                error_count: 0,
                start_time: now,
                last_update: now,
            }),
            callback,
            delivery: Mutex::new(Delivery::default()),
        }
    }

    /// Label the chunk currently being dispatched. Not delivered on its own.
    pub fn set_step(&self, step: String) {
        if let Ok(mut state) = self.state.lock() {
            state.current_step = step;
        }
    }

    /// Count one settled task and notify the callback.
    ///
    /// Fails if more tasks settle than the run started with.
    pub fn on_task_settled(&self, succeeded: bool) -> Result<OperationProgress> {
        let snapshot = {
            let mut state = self
                .state
                .lock()
                .map_err(|e| ExecutorError::InvariantViolation(e.to_string()))?;

            if state.completed >= state.total {
                return Err(ExecutorError::InvariantViolation(format!(
                    "settlement {} exceeds total {}",
                    state.completed + 1,
                    state.total
                )));
            }

            state.completed += 1;
            if !succeeded {
                state.error_count += 1;
            }

            let elapsed = self.started.elapsed().as_secs_f64();
            state.current_rate = if elapsed > 0.0 {
                state.completed as f64 / elapsed
            } else {
                0.0
            };
            let remaining = state.total - state.completed;
            state.estimated_time_remaining_ms = if remaining == 0 {
                Some(0)
            } else if state.current_rate > 0.0 {
                Some((remaining as f64 / state.current_rate * 1000.0) as u64)
            } else {
                None
            };
            state.percentage = state.completed as f64 / state.total as f64 * 100.0;
            state.last_update = Utc::now();
            state.clone()
        };

        self.deliver(snapshot.clone());
        Ok(snapshot)
    }

    /// Current progress without touching the counters.
    pub fn snapshot(&self) -> OperationProgress {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    fn deliver(&self, snapshot: OperationProgress) {
        let Some(callback) = &self.callback else {
            return;
        };

        {
            let Ok(mut delivery) = self.delivery.lock() else {
                return;
            };
            let newer = delivery
                .pending
                .as_ref()
                .map_or(true, |p| snapshot.completed > p.completed);
            if newer {
                delivery.pending = Some(snapshot);
            }
            if delivery.delivering {
                return;
            }
            delivery.delivering = true;
        }

        loop {
            let next = {
                let Ok(mut delivery) = self.delivery.lock() else {
                    return;
                };
                match delivery.pending.take() {
                    Some(p) if delivery.last_delivered.is_some_and(|last| p.completed <= last) => {
                        continue;
                    }
                    Some(p) => {
                        delivery.last_delivered = Some(p.completed);
                        p
                    }
                    None => {
                        delivery.delivering = false;
                        return;
                    }
                }
            };
            callback(&next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn recording_callback() -> (ProgressCallback, Arc<Mutex<Vec<OperationProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |p: &OperationProgress| {
            sink.lock().unwrap().push(p.clone());
        });
        (cb, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_and_percentage() {
        let (cb, seen) = recording_callback();
        let tracker = ProgressTracker::new(4, Some(cb));

        tokio::time::advance(Duration::from_secs(1)).await;
        tracker.on_task_settled(true).unwrap();
        tracker.on_task_settled(false).unwrap();

        let snap = tracker.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.percentage, 50.0);
        assert_eq!(snap.current_rate, 2.0);
        // 2 remaining at 2/s
        assert_eq!(snap.estimated_time_remaining_ms, Some(1000));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eta_none_without_elapsed_time() {
        let tracker = ProgressTracker::new(3, None);
        let snap = tracker.on_task_settled(true).unwrap();
        assert_eq!(snap.current_rate, 0.0);
        assert_eq!(snap.estimated_time_remaining_ms, None);
    }

    #[test]
    fn test_over_settlement_is_an_invariant_violation() {
        let tracker = ProgressTracker::new(1, None);
        tracker.on_task_settled(true).unwrap();
        assert!(matches!(
            tracker.on_task_settled(true),
            Err(ExecutorError::InvariantViolation(_))
        ));
        assert_eq!(tracker.snapshot().completed, 1);
    }

    #[test]
    fn test_step_label_carried_in_snapshot() {
        let (cb, seen) = recording_callback();
        let tracker = ProgressTracker::new(2, Some(cb));
        tracker.set_step("batch 1/1".into());
        tracker.on_task_settled(true).unwrap();
        assert_eq!(seen.lock().unwrap()[0].current_step, "batch 1/1");
    }

    #[test]
    fn test_concurrent_settlements_deliver_monotonic_and_final() {
        let (cb, seen) = recording_callback();
        let slow: ProgressCallback = Arc::new(move |p: &OperationProgress| {
            std::thread::sleep(Duration::from_millis(1));
            cb(p);
        });
        let tracker = Arc::new(ProgressTracker::new(200, Some(slow)));
        let settled = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                let settled = Arc::clone(&settled);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        tracker.on_task_settled((i + t) % 3 != 0).unwrap();
                        settled.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        for pair in seen.windows(2) {
            assert!(pair[1].completed > pair[0].completed);
            assert!(pair[1].error_count >= pair[0].error_count);
        }
        let last = seen.last().unwrap();
        assert_eq!(last.completed, 200);
        assert_eq!(last.error_count, tracker.snapshot().error_count);
    }
}
