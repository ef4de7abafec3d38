use std::sync::Arc;
use std::time::Duration;

use fetchcache::{CacheKey, Fetched};
use serde_json::Value;
use tokio::time::{self, Instant};

use crate::{FakeApi, setup_cache};

#[tokio::test(start_paused = true)]
async fn test_waiters_take_over_stuck_owner() {
    let cache = setup_cache(|_| {});
    let stuck_api = FakeApi::returning(1).with_latency(Duration::from_secs(120));
    let api = FakeApi::returning(2).with_latency(Duration::from_secs(1));

    let stuck = tokio::spawn({
        let cache = Arc::clone(&cache);
        let fetch = stuck_api.fetcher();
        async move { cache.get_or_fetch("station/Ray Gateway", &(), fetch).await }
    });
    time::sleep(Duration::from_millis(10)).await;

    let start = Instant::now();
    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let fetch = api.fetcher();
            tokio::spawn(async move { cache.get_or_fetch("station/Ray Gateway", &(), fetch).await })
        })
        .collect();

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Ok(Fetched::Value(2)));
    }
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(31) && elapsed < Duration::from_secs(32));

    // one waiter took over, the other joined its fetch
    assert_eq!(api.calls(), 1);
    let stats = cache.stats();
    assert_eq!(stats.cache_misses, 2);
    assert_eq!(stats.in_flight_hits, 1);

    // the stuck owner still gets its own value, but does not replace the fresh entry
    assert_eq!(stuck.await.unwrap(), Ok(Fetched::Value(1)));
    assert_eq!(stuck_api.calls(), 1);

    let key = CacheKey::new("station/Ray Gateway", &Value::Null);
    assert_eq!(cache.peek(&key).unwrap().value, 2);
    assert!(!cache.is_in_flight(&key));
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_is_configurable() {
    let cache = setup_cache(|config| config.in_flight_wait_timeout = Duration::from_secs(2));
    let stuck_api = FakeApi::returning(1).with_latency(Duration::from_secs(120));
    let api = FakeApi::returning(2);

    let stuck = tokio::spawn({
        let cache = Arc::clone(&cache);
        let fetch = stuck_api.fetcher();
        async move { cache.get_or_fetch("search", &(), fetch).await }
    });
    time::sleep(Duration::from_millis(10)).await;

    let start = Instant::now();
    let result = cache.get_or_fetch("search", &(), api.fetcher()).await;
    assert_eq!(result, Ok(Fetched::Value(2)));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));

    stuck.abort();
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_owner_releases_waiters() {
    let cache = setup_cache(|_| {});
    let slow_api = FakeApi::returning(1).with_latency(Duration::from_secs(60));
    let api = FakeApi::returning(2);

    let owner = tokio::spawn({
        let cache = Arc::clone(&cache);
        let fetch = slow_api.fetcher();
        async move { cache.get_or_fetch("system/name/Achenar", &(), fetch).await }
    });
    time::sleep(Duration::from_millis(10)).await;

    let waiter = tokio::spawn({
        let cache = Arc::clone(&cache);
        let fetch = api.fetcher();
        async move { cache.get_or_fetch("system/name/Achenar", &(), fetch).await }
    });
    time::sleep(Duration::from_millis(10)).await;

    let key = CacheKey::new("system/name/Achenar", &Value::Null);
    assert!(cache.is_in_flight(&key));

    let start = Instant::now();
    owner.abort();
    assert!(owner.await.unwrap_err().is_cancelled());

    // the waiter does not sit out the wait timeout, but fetches right away
    assert_eq!(waiter.await.unwrap(), Ok(Fetched::Value(2)));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(api.calls(), 1);
    assert_eq!(cache.peek(&key).unwrap().value, 2);

    let stats = cache.stats();
    assert_eq!(stats.cache_misses, 2);
    assert_eq!(stats.in_flight_hits, 0);
}
