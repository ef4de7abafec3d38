//! Response caching for outbound calls to slow, rate-limited and occasionally unreliable APIs.
//!
//! The primary entry point is [`RequestCache::get_or_fetch`](client::RequestCache::get_or_fetch),
//! which combines a TTL cache, request coalescing and bounded retries around a fetch function
//! supplied by the caller. The [`BatchRunner`](batch::BatchRunner) runs independent tasks on a
//! fixed-size worker pool.

#[macro_use]
pub mod metrics;

pub mod batch;
pub mod caching;
pub mod client;
pub mod config;
pub mod logging;
pub mod outcome;
pub mod retry;
pub mod stats;
pub mod utils;

pub use batch::{BatchError, BatchFailure, BatchOutcome, BatchRunner};
pub use caching::{CacheEntry, CacheKey, TtlPolicy, TtlRule};
pub use client::RequestCache;
pub use outcome::{FetchOutcome, FetchRequest, Fetched, RequestError, SoftError, TransportError};
pub use stats::{CacheStats, StatsReport};
