//! Translate a generic `BatchResult` into a domain summary: bulk-create
//! mailbox accounts from a name pattern.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bulk_executor::pattern::expand_pattern;
use bulk_executor::*;
use serde::Serialize;

/// Stand-in for the remote mailbox API.
struct MailServer {
    taken: Mutex<HashSet<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedAccount {
    address: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountCreationReport {
    created: Vec<CreatedAccount>,
    rejected: Vec<String>,
    failed: Vec<String>,
    success_rate: f64,
    took_ms: u64,
}

struct CreateAccount {
    server: Arc<MailServer>,
}

impl TaskHandler<String> for CreateAccount {
    type Output = CreatedAccount;

    async fn execute(&self, address: &String) -> std::result::Result<CreatedAccount, TaskError> {
        tokio::time::sleep(Duration::from_millis(30)).await;

        let mut taken = self.server.taken.lock().unwrap();
        if !taken.insert(address.clone()) {
            return Err(TaskError::permanent(format!("{} already exists", address)).with_status(409));
        }
        Ok(CreatedAccount {
            address: address.clone(),
            password: format!("pw-{}", address.len()),
        })
    }
}

fn into_report(result: BatchResult<CreatedAccount>) -> AccountCreationReport {
    let (rejected, failed): (Vec<_>, Vec<_>) = result
        .failed
        .iter()
        .partition(|f| f.status_code == Some(409));

    AccountCreationReport {
        rejected: rejected.into_iter().map(|f| f.item_id.clone()).collect(),
        failed: failed.into_iter().map(|f| f.item_id.clone()).collect(),
        success_rate: result.summary.success_rate,
        took_ms: result.metrics.total_time_ms,
        created: result.into_values(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let server = Arc::new(MailServer {
        taken: Mutex::new(HashSet::from(["user3@example.com".to_string()])),
    });

    let addresses = expand_pattern("user{index}@example.com", 1, 8);
    let tasks = addresses
        .into_iter()
        .enumerate()
        .map(|(i, address)| Task::new(i, address.clone()).with_id(address))
        .collect();

    let config = BatchOperationConfig::builder()
        .with_concurrency(3)
        .with_request_delay(Duration::from_millis(20))
        .with_max_retries(2)
        .build();

    let result = BatchExecutor::new(config)
        .run_tasks(tasks, CreateAccount { server }, None)
        .await
        .unwrap();

    let report = into_report(result);
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
}
