use std::sync::Arc;

use fetchcache::RequestCache;
use fetchcache::config::CacheConfig;
use fetchcache_test as test;

pub use test::{FakeApi, connection_error, not_found};

/// Setup tests and create a request cache.
///
/// The `update_config` closure can modify the default configuration before the cache is created.
pub fn setup_cache<T: Clone>(update_config: impl FnOnce(&mut CacheConfig)) -> Arc<RequestCache<T>> {
    test::setup();

    let mut config = CacheConfig::default();
    update_config(&mut config);

    Arc::new(RequestCache::new(&config))
}
