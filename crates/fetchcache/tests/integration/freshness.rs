use std::time::Duration;

use fetchcache::{CacheKey, FetchOutcome, Fetched, TtlPolicy};
use serde_json::{Value, json};
use tokio::time;

use crate::{FakeApi, setup_cache};

const MINUTE: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn test_stale_entries_are_refetched() {
    let cache = setup_cache(|_| {});
    let api = FakeApi::scripted([FetchOutcome::Success(1), FetchOutcome::Success(2)]);
    let params = json!({"commodity": "tritium"});

    let first = cache.get_or_fetch("market/exports", &params, api.fetcher()).await;
    assert_eq!(first, Ok(Fetched::Value(1)));

    time::advance(5 * MINUTE - Duration::from_millis(1)).await;
    let cached = cache.get_or_fetch("market/exports", &params, api.fetcher()).await;
    assert_eq!(cached, Ok(Fetched::Value(1)));
    assert_eq!(api.calls(), 1);

    time::advance(Duration::from_millis(1)).await;
    let refreshed = cache.get_or_fetch("market/exports", &params, api.fetcher()).await;
    assert_eq!(refreshed, Ok(Fetched::Value(2)));
    assert_eq!(api.calls(), 2);

    let key = CacheKey::new("market/exports", &params);
    let entry = cache.peek(&key).unwrap();
    assert_eq!(entry.value, 2);
    assert!(entry.is_fresh());
}

#[tokio::test(start_paused = true)]
async fn test_ttl_depends_on_endpoint() {
    let cache = setup_cache(|_| {});
    let api = FakeApi::returning(json!({"id": 10477373803_u64}));

    cache
        .get_or_fetch("market/exports", &(), api.fetcher())
        .await
        .unwrap();
    cache
        .get_or_fetch("system/name/Sol", &(), api.fetcher())
        .await
        .unwrap();

    let market = cache
        .peek(&CacheKey::new("market/exports", &Value::Null))
        .unwrap();
    let system = cache
        .peek(&CacheKey::new("system/name/Sol", &Value::Null))
        .unwrap();

    assert_eq!(market.ttl, 5 * MINUTE);
    assert_eq!(system.ttl, 24 * 60 * MINUTE);

    // after an hour only the system entry is still served from the cache
    time::advance(60 * MINUTE).await;
    cache
        .get_or_fetch("market/exports", &(), api.fetcher())
        .await
        .unwrap();
    cache
        .get_or_fetch("system/name/Sol", &(), api.fetcher())
        .await
        .unwrap();

    let hits = api.hits();
    assert_eq!(hits["market/exports"], 2);
    assert_eq!(hits["system/name/Sol"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_ttl_policy() {
    let cache = setup_cache(|config| config.ttl = TtlPolicy::uniform(Duration::from_secs(5)));
    let api = FakeApi::returning("Never Gonna Give You Up");

    cache
        .get_or_fetch("spotify/track", &json!({"q": "rick astley"}), api.fetcher())
        .await
        .unwrap();
    assert_eq!(cache.ttl_for("system/name/Sol"), Duration::from_secs(5));

    time::advance(Duration::from_secs(5)).await;
    cache
        .get_or_fetch("spotify/track", &json!({"q": "rick astley"}), api.fetcher())
        .await
        .unwrap();

    assert_eq!(api.calls(), 2);
    assert_eq!(cache.stats().cache_hits, 0);
}
