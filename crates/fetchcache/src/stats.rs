use std::fmt;

use serde::Serialize;

/// Raw counters of a [`RequestCache`](crate::RequestCache).
///
/// All counters are updated under the same lock as the cache state, so a snapshot is always
/// internally consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests answered from a fresh cache entry.
    pub cache_hits: u64,
    /// Requests that had to fetch, because there was no fresh entry and no fetch underway.
    pub cache_misses: u64,
    /// Requests that waited for a fetch started by another caller.
    pub in_flight_hits: u64,
    /// Invocations of fetch functions, including retries.
    pub api_calls: u64,
    /// Fetches ending in a soft error or with all retries exhausted.
    pub errors: u64,
}

/// A summary of [`CacheStats`] for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsReport {
    /// Percentage of requests answered from the cache, between `0` and `100`.
    pub cache_hit_rate: f64,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub in_flight_hits: u64,
    pub api_calls: u64,
    /// Requests answered without calling the remote API themselves.
    pub api_calls_saved: u64,
    pub errors: u64,
}

impl From<CacheStats> for StatsReport {
    fn from(stats: CacheStats) -> Self {
        let total_requests = stats.cache_hits + stats.cache_misses;
        let cache_hit_rate = if total_requests == 0 {
            0.0
        } else {
            stats.cache_hits as f64 / total_requests as f64 * 100.0
        };

        Self {
            cache_hit_rate,
            total_requests,
            cache_hits: stats.cache_hits,
            cache_misses: stats.cache_misses,
            in_flight_hits: stats.in_flight_hits,
            api_calls: stats.api_calls,
            api_calls_saved: stats.cache_hits + stats.in_flight_hits,
            errors: stats.errors,
        }
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cache hit rate:  {:.1}%", self.cache_hit_rate)?;
        writeln!(f, "total requests:  {}", self.total_requests)?;
        writeln!(f, "cache hits:      {}", self.cache_hits)?;
        writeln!(f, "cache misses:    {}", self.cache_misses)?;
        writeln!(f, "in-flight hits:  {}", self.in_flight_hits)?;
        writeln!(f, "api calls:       {}", self.api_calls)?;
        writeln!(f, "api calls saved: {}", self.api_calls_saved)?;
        write!(f, "errors:          {}", self.errors)
    }
}
