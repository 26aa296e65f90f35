#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bulk_executor::{TaskError, TaskHandler};
use tokio::time::Instant;

/// What the handler observed, shared with the test after the handler is moved
/// into the executor.
#[derive(Default)]
pub struct Stats {
    calls: Mutex<HashMap<usize, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
}

impl Stats {
    pub fn calls_for(&self, item: usize) -> u32 {
        self.calls.lock().unwrap().get(&item).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> Vec<Instant> {
        let mut starts = self.starts.lock().unwrap().clone();
        starts.sort();
        starts
    }
}

/// Handler over `usize` items with scripted latency and failures.
#[derive(Clone, Default)]
pub struct ScriptedHandler {
    pub stats: Arc<Stats>,
    latency: Duration,
    transient_failures: HashMap<usize, u32>,
    permanent: HashSet<usize>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the first `times` attempts for `item` with a transient error.
    pub fn fail_times(mut self, item: usize, times: u32) -> Self {
        self.transient_failures.insert(item, times);
        self
    }

    pub fn fail_permanently(mut self, item: usize) -> Self {
        self.permanent.insert(item);
        self
    }

    fn begin(&self, item: usize) -> u32 {
        self.stats.starts.lock().unwrap().push(Instant::now());
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut calls = self.stats.calls.lock().unwrap();
        let count = calls.entry(item).or_insert(0);
        *count += 1;
        *count
    }
}

impl TaskHandler<usize> for ScriptedHandler {
    type Output = usize;

    async fn execute(&self, item: &usize) -> Result<usize, TaskError> {
        let item = *item;
        let attempt = self.begin(item);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.permanent.contains(&item) {
            return Err(TaskError::permanent(format!("item {} rejected", item)).with_status(422));
        }
        match self.transient_failures.get(&item) {
            Some(&times) if attempt <= times => {
                Err(TaskError::transient(format!("item {} attempt {} failed", item, attempt))
                    .with_status(503))
            }
            _ => Ok(item * 10),
        }
    }
}

pub fn items(count: usize) -> Vec<usize> {
    (0..count).collect()
}
