use std::sync::Arc;
use std::time::Duration;

use fetchcache::{BatchError, BatchRunner, FetchOutcome, Fetched};
use serde_json::json;

use crate::{FakeApi, not_found, setup_cache};

#[tokio::test]
async fn test_batch_of_cached_lookups() {
    let cache = setup_cache(|_| {});
    let api = FakeApi::scripted([
        FetchOutcome::Success(0),
        FetchOutcome::Success(1),
        FetchOutcome::Success(2),
        FetchOutcome::Success(3),
        not_found(),
        FetchOutcome::Success(5),
    ]);
    // a single worker makes the order of the scripted answers deterministic
    let runner = BatchRunner::new(1);

    let (cache_ref, api_ref) = (&cache, &api);
    let lookups = move |ids: std::ops::Range<u32>| {
        ids.map(move |id| {
            let cache = Arc::clone(cache_ref);
            let fetch = api_ref.fetcher();
            async move {
                let params = json!({ "id": id });
                match cache.get_or_fetch("system/bodies", &params, fetch).await {
                    Ok(Fetched::Value(value)) => Ok(Some(value)),
                    Ok(Fetched::SoftError(err)) => Err(anyhow::Error::new(err)),
                    Err(err) => Err(anyhow::Error::new(err)),
                }
            }
        })
    };

    let outcome = runner.run_batch(lookups(0..10), Duration::from_secs(10)).await;

    let mut results = outcome.results;
    results.sort_unstable();
    assert_eq!(results, [0, 1, 2, 3, 5, 5, 5, 5, 5]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].index, 4);
    assert!(matches!(outcome.failures[0].error, BatchError::Failed(_)));
    assert_eq!(
        outcome.failures[0].error.to_string(),
        "task failed: rejected: not found"
    );

    // running the same lookups again only refetches the soft error
    let outcome = runner.run_batch(lookups(0..10), Duration::from_secs(10)).await;
    assert_eq!(outcome.results.len(), 10);
    assert!(outcome.failures.is_empty());
    assert_eq!(api.calls(), 11);

    runner.shutdown().await;
}
