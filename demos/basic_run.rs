use std::sync::Arc;
use std::time::Duration;

use bulk_executor::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BatchOperationConfig::builder()
        .with_concurrency(3)
        .with_request_delay(Duration::from_millis(50))
        .with_max_retries(0)
        .build();

    let handler = handler_fn(|n: u64| async move {
        // Simulate a remote call whose latency varies per item
        tokio::time::sleep(Duration::from_millis(20 + (n % 4) * 30)).await;
        Ok::<_, TaskError>(n * n)
    });

    let on_progress: ProgressCallback = Arc::new(|p: &OperationProgress| {
        println!(
            "  {}/{} ({:.0}%) rate={:.1}/s eta={:?}ms [{}]",
            p.completed,
            p.total,
            p.percentage,
            p.current_rate,
            p.estimated_time_remaining_ms,
            p.current_step
        );
    });

    let mut result = BatchExecutor::new(config)
        .run((0..12).collect(), handler, Some(on_progress))
        .await
        .unwrap();

    // Results arrive in completion order; restore input order for display
    result.sort_by_index();
    for output in &result.successful {
        println!("{} -> {} ({}ms)", output.item_id, output.value, output.duration_ms);
    }
    println!(
        "\n{} succeeded, {} failed in {}ms ({:.1} req/s)",
        result.summary.succeeded,
        result.summary.failed,
        result.metrics.total_time_ms,
        result.metrics.requests_per_second
    );
}
