use std::sync::Arc;
use std::time::Duration;

use fetchcache::{FetchOutcome, Fetched, RequestError, SoftError, TransportError};
use tokio::time::Instant;

use crate::{FakeApi, connection_error, not_found, setup_cache};

#[tokio::test]
async fn test_soft_errors_are_not_cached() {
    let cache = setup_cache::<u32>(|_| {});
    let api = FakeApi::scripted([not_found(), FetchOutcome::Success(7)]);

    let first = cache
        .get_or_fetch("system/name/Nowhere", &(), api.fetcher())
        .await;
    assert_eq!(
        first,
        Ok(Fetched::SoftError(SoftError::Rejected("not found".into())))
    );

    let second = cache
        .get_or_fetch("system/name/Nowhere", &(), api.fetcher())
        .await;
    assert_eq!(second, Ok(Fetched::Value(7)));

    assert_eq!(api.calls(), 2);
    let stats = cache.stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.cache_hits, 0);
}

#[tokio::test(start_paused = true)]
async fn test_soft_error_reaches_all_waiters() {
    let cache = setup_cache::<u32>(|_| {});
    let api = FakeApi::new(not_found()).with_latency(Duration::from_millis(200));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let fetch = api.fetcher();
            tokio::spawn(async move { cache.get_or_fetch("sys:Sol", &(), fetch).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.await.unwrap(),
            Ok(Fetched::SoftError(SoftError::Rejected("not found".into())))
        );
    }

    assert_eq!(api.calls(), 1);
    let stats = cache.counters();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.in_flight_hits, 4);
    assert_eq!(stats.api_calls, 1);
    assert_eq!(stats.errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_between_attempts() {
    let cache = setup_cache(|_| {});
    let api = FakeApi::scripted([
        connection_error(),
        connection_error(),
        FetchOutcome::Success(5),
    ]);

    let result = cache.get_or_fetch("search", &(), api.fetcher()).await;
    assert_eq!(result, Ok(Fetched::Value(5)));

    let times = api.call_times();
    assert_eq!(times.len(), 3);
    assert!(times[1] - times[0] >= Duration::from_secs(1));
    assert!(times[2] - times[1] >= Duration::from_secs(2));

    let stats = cache.stats();
    assert_eq!(stats.api_calls, 3);
    assert_eq!(stats.errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_propagate_to_waiters() {
    let cache = setup_cache::<u32>(|_| {});
    let api = FakeApi::new(connection_error()).with_latency(Duration::from_millis(100));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let fetch = api.fetcher();
            tokio::spawn(async move { cache.get_or_fetch("system/factions", &(), fetch).await })
        })
        .collect();

    let expected = Err(RequestError::RetriesExhausted {
        attempts: 3,
        source: TransportError::Connection("connection reset by peer".into()),
    });
    for handle in handles {
        assert_eq!(handle.await.unwrap(), expected);
    }

    // the owner tried three times, the waiters not at all
    assert_eq!(api.calls(), 3);
    let stats = cache.stats();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.in_flight_hits, 2);
    assert_eq!(stats.errors, 1);

    // nothing was cached, so the next caller tries again
    let start = Instant::now();
    let retried = cache
        .get_or_fetch("system/factions", &(), FakeApi::returning(3).fetcher())
        .await;
    assert_eq!(retried, Ok(Fetched::Value(3)));
    assert!(start.elapsed() < Duration::from_secs(1));
}
