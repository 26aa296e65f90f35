use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bulk_executor::*;
use tracing_subscriber::EnvFilter;

/// Fails every item a few times before succeeding, and rejects odd ids outright.
struct FlakyService {
    attempts: Mutex<HashMap<u32, u32>>,
}

impl TaskHandler<u32> for FlakyService {
    type Output = String;

    async fn execute(&self, id: &u32) -> std::result::Result<String, TaskError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(*id).or_insert(0);
            *n += 1;
            *n
        };

        if id % 7 == 3 {
            return Err(TaskError::permanent(format!("record {} failed validation", id))
                .with_status(422)
                .with_context(serde_json::json!({ "field": "address" })));
        }
        if attempt <= id % 3 {
            return Err(TaskError::transient("service unavailable").with_status(503));
        }
        Ok(format!("record-{}", id))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = BatchOperationConfig::builder()
        .with_concurrency(4)
        .with_max_retries(1)
        .with_retry_delay(Duration::from_millis(100))
        .with_max_retry_delay(Duration::from_secs(1))
        .build();

    let service = FlakyService {
        attempts: Mutex::new(HashMap::new()),
    };

    let result = BatchExecutor::new(config)
        .run((0..15).collect(), service, None)
        .await
        .unwrap();

    println!("Succeeded:");
    for output in &result.successful {
        println!("  {} after {} attempt(s)", output.item_id, output.attempts);
    }
    println!("Failed:");
    for failure in &result.failed {
        println!(
            "  {} status={:?} retries={} error={}",
            failure.item_id, failure.status_code, failure.retry_attempts, failure.error
        );
    }
    println!(
        "\nretries={} error_rate={:.2}",
        result.metrics.total_retries, result.metrics.error_rate
    );
}
