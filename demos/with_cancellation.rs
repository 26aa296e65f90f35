use std::time::Duration;

use bulk_executor::*;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let slow = || {
        handler_fn(|n: u32| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, TaskError>(n)
        })
    };

    // Overall deadline: whatever is in flight at 1s finishes, the rest never starts
    let config = BatchOperationConfig::builder()
        .with_concurrency(2)
        .with_timeout(Duration::from_secs(1))
        .build();
    let result = BatchExecutor::new(config)
        .run((0..50).collect(), slow(), None)
        .await
        .unwrap();
    println!(
        "deadline: cancelled={} timed_out={} done={} not_started={}",
        result.cancelled,
        result.timed_out,
        result.successful.len(),
        result.summary.not_started
    );

    // External cancellation from another task
    let executor = BatchExecutor::new(BatchOperationConfig::builder().with_concurrency(2).build());
    let token = executor.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        println!("cancelling...");
        token.cancel();
    });

    let result = executor.run((0..50).collect(), slow(), None).await.unwrap();
    println!(
        "external: cancelled={} done={} not_started={}",
        result.cancelled,
        result.successful.len(),
        result.summary.not_started
    );
}
