use std::sync::Arc;
use std::time::Duration;

use fetchcache::{Fetched, RequestCache};
use serde_json::json;
use tokio::time::Instant;

use crate::{FakeApi, setup_cache};

async fn lookup_sol(cache: Arc<RequestCache<u32>>, api: FakeApi<u32>) -> Vec<Fetched<u32>> {
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let fetch = api.fetcher();
            tokio::spawn(async move { cache.get_or_fetch("sys:Sol", &(), fetch).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    results
}

#[tokio::test]
async fn test_concurrent_requests_are_coalesced() {
    let cache = setup_cache(|_| {});
    let api = FakeApi::returning(42).with_latency(Duration::from_millis(200));

    let results = lookup_sol(Arc::clone(&cache), api.clone()).await;

    assert!(results.iter().all(|result| *result == Fetched::Value(42)));
    assert_eq!(api.calls(), 1);

    let stats = cache.stats();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.in_flight_hits, 9);
    assert_eq!(stats.api_calls, 1);
    assert_eq!(stats.api_calls_saved, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_coalesced_across_threads() {
    let cache = setup_cache(|_| {});
    let api = FakeApi::returning(42).with_latency(Duration::from_millis(200));

    let results = lookup_sol(Arc::clone(&cache), api.clone()).await;

    assert!(results.iter().all(|result| *result == Fetched::Value(42)));
    assert_eq!(api.calls(), 1);

    // a caller scheduled late may find the value already stored
    let stats = cache.stats();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits + stats.in_flight_hits, 9);
    assert_eq!(stats.api_calls_saved, 9);
}

#[tokio::test]
async fn test_sequential_requests_are_cached() {
    let cache = setup_cache(|_| {});
    let api = FakeApi::returning("Jameson Memorial".to_owned());

    let params = json!({"system": "Shinrarta Dezhra", "landing_pad": "L"});
    for _ in 0..4 {
        let result = cache
            .get_or_fetch("station/search", &params, api.fetcher())
            .await
            .unwrap();
        assert_eq!(result.value().as_deref(), Some("Jameson Memorial"));
    }

    assert_eq!(api.calls(), 1);
    let call = &api.call_log()[0];
    assert_eq!(call.request.endpoint, "station/search");
    assert_eq!(call.request.params, params);

    insta::assert_json_snapshot!(cache.stats(), @r###"
    {
      "cache_hit_rate": 75.0,
      "total_requests": 4,
      "cache_hits": 3,
      "cache_misses": 1,
      "in_flight_hits": 0,
      "api_calls": 1,
      "api_calls_saved": 3,
      "errors": 0
    }
    "###);
}

#[tokio::test(start_paused = true)]
async fn test_different_keys_fetch_in_parallel() {
    let cache = setup_cache(|_| {});
    let api = FakeApi::returning(1).with_latency(Duration::from_secs(1));

    let gold = json!({"commodity": "gold"});
    let start = Instant::now();
    let (exports, imports) = tokio::join!(
        cache.get_or_fetch("market/exports", &gold, api.fetcher()),
        cache.get_or_fetch("market/imports", &gold, api.fetcher()),
    );

    assert_eq!(exports, Ok(Fetched::Value(1)));
    assert_eq!(imports, Ok(Fetched::Value(1)));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));

    let hits = api.hits();
    assert_eq!(hits["market/exports"], 1);
    assert_eq!(hits["market/imports"], 1);
}
