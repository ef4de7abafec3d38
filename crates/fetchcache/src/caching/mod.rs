//! # Caching infrastructure
//!
//! Calls to the remote API are slow, rate limited and sometimes fail. To keep the number of calls
//! down, responses are cached in memory, and concurrent requests for the same data are coalesced
//! into a single call.
//!
//! ## Building blocks
//!
//! - [`CacheKey`]: identifies a request by its endpoint and its (order independent) parameters.
//! - [`TtlStore`]: holds successful responses along with the time they were inserted and their
//!   time-to-live. Staleness is detected lazily on read, there is no background sweeping and no
//!   capacity bound. Stale entries are simply superseded by the next successful fetch.
//! - [`TtlPolicy`]: decides the time-to-live of a response based on its endpoint, so that
//!   frequently changing data expires sooner than near-static metadata.
//! - [`InFlightRegistry`]: tracks which keys are currently being fetched, and hands out wait
//!   handles to everyone else asking for the same key while the fetch is running.
//!
//! The [`RequestCache`](crate::RequestCache) composes these behind a single lock. Looking up the
//! store, looking up the registry and registering as the owner of a fetch happen in one critical
//! section, which guarantees that only a single fetch per key is started. The fetch itself always
//! runs outside of the lock.
//!
//! ## Errors are never cached
//!
//! Only successful responses enter the [`TtlStore`]. Soft errors ("not found") and exhausted
//! retries are handed to the caller and to everyone waiting on the same fetch, but the next request
//! for the same key will hit the remote API again.

mod cache_key;
mod inflight;
mod policy;
mod ttl;

pub use cache_key::CacheKey;
pub use inflight::{InFlightRegistry, OwnerTicket, Registration, Settled, WaitHandle, WaitResult};
pub use policy::{TtlPolicy, TtlRule};
pub use ttl::{CacheEntry, TtlStore};
