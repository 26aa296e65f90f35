mod test_helpers;

use std::sync::Arc;
use std::time::Duration;

use bulk_executor::{BatchExecutor, BatchOperationConfig};
use proptest::prelude::*;
use test_helpers::ScriptedHandler;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Every item lands in exactly one list, and the attempt count matches
    /// how many times the handler was scripted to fail.
    #[test]
    fn prop_partition_and_retry_bound(
        failures in prop::collection::vec(0u32..5, 0..25),
        concurrency in 1usize..6,
        batch_size in 1usize..8,
        max_retries in 0u32..4,
    ) {
        let mut handler = ScriptedHandler::new().with_latency(Duration::from_millis(3));
        for (item, &times) in failures.iter().enumerate() {
            if times > 0 {
                handler = handler.fail_times(item, times);
            }
        }
        let stats = Arc::clone(&handler.stats);
        let config = BatchOperationConfig::builder()
            .with_concurrency(concurrency)
            .with_batch_size(batch_size)
            .with_max_retries(max_retries)
            .with_retry_delay(Duration::from_millis(1))
            .build();

        let items: Vec<usize> = (0..failures.len()).collect();
        let result = paused_runtime()
            .block_on(BatchExecutor::new(config).run(items, handler, None))
            .unwrap();

        prop_assert!(!result.cancelled);
        prop_assert_eq!(result.successful.len() + result.failed.len(), failures.len());
        prop_assert!(stats.max_in_flight() <= concurrency);

        for (item, &times) in failures.iter().enumerate() {
            let id = format!("item-{}", item);
            if times <= max_retries {
                let output = result.output_for(&id);
                prop_assert!(output.is_some(), "{} should have succeeded", id);
                prop_assert_eq!(output.unwrap().attempts, times + 1);
                prop_assert!(result.failure_for(&id).is_none());
                prop_assert_eq!(stats.calls_for(item), times + 1);
            } else {
                let failure = result.failure_for(&id);
                prop_assert!(failure.is_some(), "{} should have failed", id);
                prop_assert_eq!(failure.unwrap().retry_attempts, max_retries);
                prop_assert!(result.output_for(&id).is_none());
                prop_assert_eq!(stats.calls_for(item), max_retries + 1);
            }
        }
    }
}
