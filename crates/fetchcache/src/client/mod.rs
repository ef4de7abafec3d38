//! The [`RequestCache`], combining the TTL store, request coalescing and retries.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::caching::{
    CacheEntry, CacheKey, InFlightRegistry, OwnerTicket, Registration, Settled, TtlPolicy,
    TtlStore, WaitResult,
};
use crate::config::CacheConfig;
use crate::outcome::{FetchOutcome, FetchRequest, Fetched, RequestError};
use crate::retry::RetryExecutor;
use crate::stats::{CacheStats, StatsReport};


/// Everything protected by the cache lock.
#[derive(Debug)]
struct State<T> {
    store: TtlStore<T>,
    in_flight: InFlightRegistry<T>,
    stats: CacheStats,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            store: TtlStore::default(),
            in_flight: InFlightRegistry::default(),
            stats: CacheStats::default(),
        }
    }
}

/// The outcome of checking the cache and the in-flight fetches for a key.
enum Lookup<T> {
    Hit(T),
    Registered(Registration<T>),
}

/// A cache of responses from a remote API.
///
/// Successful responses are kept for a time-to-live chosen by the endpoint [`TtlPolicy`].
/// Concurrent requests for the same key are coalesced, so that only one of them calls the remote
/// API while the others wait for its outcome. Transport errors are retried with exponential backoff.
/// Neither soft errors nor exhausted retries are ever cached.
///
/// The cache is meant to be constructed once and shared, for example in an [`Arc`].
pub struct RequestCache<T> {
    state: Mutex<State<T>>,
    policy: TtlPolicy,
    retry: RetryExecutor,
    wait_timeout: Duration,
}

impl<T> fmt::Debug for RequestCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (entries, in_flight) = self
            .state
            .try_lock()
            .map(|state| (state.store.len(), state.in_flight.len()))
            .unwrap_or_default();
        f.debug_struct("RequestCache")
            .field("policy", &self.policy)
            .field("retry", &self.retry)
            .field("wait_timeout", &self.wait_timeout)
            .field("entries", &entries)
            .field("in-flight fetches", &in_flight)
            .finish()
    }
}

impl<T: Clone> RequestCache<T> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            policy: config.ttl.clone(),
            retry: RetryExecutor::new(config.retry),
            wait_timeout: config.in_flight_wait_timeout,
        }
    }

    /// Returns the cached response for `endpoint` and `params`, or fetches it.
    ///
    /// `fetch` is only invoked if there is no fresh cache entry and no other caller is already
    /// fetching the same key. It may be invoked several times if it returns transport errors.
    ///
    /// Soft errors are returned as [`Fetched::SoftError`]. When all attempts fail, every caller
    /// waiting on the fetch gets the same [`RequestError::RetriesExhausted`].
    pub async fn get_or_fetch<P, F, Fut>(
        &self,
        endpoint: &str,
        params: &P,
        fetch: F,
    ) -> Result<Fetched<T>, RequestError>
    where
        P: Serialize + ?Sized,
        F: Fn(Arc<FetchRequest>) -> Fut,
        Fut: Future<Output = FetchOutcome<T>>,
    {
        let (key, params) = CacheKey::from_params(endpoint, params)
            .map_err(|err| RequestError::InvalidParams(err.to_string()))?;

        let mut registration = match self.lookup(&key, None) {
            Lookup::Hit(value) => return Ok(Fetched::Value(value)),
            Lookup::Registered(registration) => registration,
        };

        loop {
            let handle = match registration {
                Registration::Owner(ticket) => {
                    let request = Arc::new(FetchRequest {
                        endpoint: endpoint.to_owned(),
                        params,
                    });
                    return self.fetch_as_owner(key, request, ticket, fetch).await;
                }
                Registration::Waiter(handle) => handle,
            };

            let stuck = match handle.wait(self.wait_timeout).await {
                WaitResult::Settled(settled) => return self.join_settled(&key, settled),
                WaitResult::Abandoned => {
                    tracing::debug!(%key, "In-flight fetch was abandoned, retrying lookup");
                    None
                }
                WaitResult::TimedOut(stuck) => {
                    tracing::warn!(
                        %key,
                        timeout = ?self.wait_timeout,
                        "Timed out waiting for in-flight fetch",
                    );
                    Some(stuck)
                }
            };

            registration = match self.lookup(&key, stuck) {
                Lookup::Hit(value) => return Ok(Fetched::Value(value)),
                Lookup::Registered(registration) => registration,
            };
        }
    }

    /// A summary of the counters collected so far.
    pub fn stats(&self) -> StatsReport {
        self.counters().into()
    }

    /// A snapshot of the raw counters.
    pub fn counters(&self) -> CacheStats {
        self.state.lock().unwrap().stats
    }

    /// Returns the stored entry for `key`, whether it is fresh or not.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.state.lock().unwrap().store.entry(key).cloned()
    }

    /// Returns `true` if a fetch for `key` is currently underway.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.state.lock().unwrap().in_flight.is_in_flight(key)
    }

    /// The time-to-live applied to successful responses from `endpoint`.
    pub fn ttl_for(&self, endpoint: &str) -> Duration {
        self.policy.ttl_for(endpoint)
    }

    /// Checks the store and registers with the in-flight fetches, in a single critical section.
    ///
    /// With a `stuck` owner, its record is taken over if it is still registered.
    fn lookup(&self, key: &CacheKey, stuck: Option<OwnerTicket>) -> Lookup<T> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        if let Some(entry) = state.store.get_fresh(key) {
            state.stats.cache_hits += 1;
            metric!(counter("requests.cache.hit") += 1);
            tracing::trace!(%key, "Cache hit");
            return Lookup::Hit(entry.value.clone());
        }

        let registration = match stuck {
            Some(stuck) => {
                let was_in_flight = state.in_flight.is_in_flight(key);
                let registration = state.in_flight.take_over(key, stuck);
                if was_in_flight && matches!(registration, Registration::Owner(_)) {
                    metric!(counter("requests.inflight.takeover") += 1);
                    tracing::warn!(%key, "Taking over stuck in-flight fetch");
                }
                registration
            }
            None => state.in_flight.try_become_owner(key),
        };

        match registration {
            Registration::Owner(_) => {
                state.stats.cache_misses += 1;
                metric!(counter("requests.cache.miss") += 1);
                tracing::info!(%key, "Cache miss");
            }
            Registration::Waiter(_) => {
                tracing::debug!(%key, "Joining in-flight fetch");
            }
        }

        Lookup::Registered(registration)
    }

    /// Resolves a waiter from the outcome of the fetch it joined.
    fn join_settled(&self, key: &CacheKey, settled: Settled<T>) -> Result<Fetched<T>, RequestError> {
        let mut state = self.state.lock().unwrap();
        state.stats.in_flight_hits += 1;
        metric!(counter("requests.inflight.hit") += 1);

        match settled {
            Settled::Value(value) => {
                let value = match state.store.get_fresh(key) {
                    Some(entry) => entry.value.clone(),
                    None => value,
                };
                Ok(Fetched::Value(value))
            }
            Settled::SoftError(err) => Ok(Fetched::SoftError(err)),
            Settled::Failed(err) => Err(err),
        }
    }

    async fn fetch_as_owner<F, Fut>(
        &self,
        key: CacheKey,
        request: Arc<FetchRequest>,
        ticket: OwnerTicket,
        fetch: F,
    ) -> Result<Fetched<T>, RequestError>
    where
        F: Fn(Arc<FetchRequest>) -> Fut,
        Fut: Future<Output = FetchOutcome<T>>,
    {
        // Releases the record if this future is dropped before the fetch completes.
        let guard = OwnerGuard {
            state: &self.state,
            key,
            ticket: Some(ticket),
        };

        let counted_fetch = |request| {
            self.state.lock().unwrap().stats.api_calls += 1;
            fetch(request)
        };
        let outcome = self.retry.execute(&request, counted_fetch).await;

        let (settled, result) = match outcome {
            FetchOutcome::Success(value) => (Settled::Value(value.clone()), Ok(Fetched::Value(value))),
            FetchOutcome::SoftError(err) => {
                tracing::warn!(
                    key = %guard.key,
                    error = &err as &dyn std::error::Error,
                    "Not caching soft error",
                );
                (Settled::SoftError(err.clone()), Ok(Fetched::SoftError(err)))
            }
            FetchOutcome::HardError(source) => {
                let err = RequestError::RetriesExhausted {
                    attempts: self.retry.max_attempts(),
                    source,
                };
                (Settled::Failed(err.clone()), Err(err))
            }
        };

        guard.release(settled, self.policy.ttl_for(&request.endpoint));
        result
    }
}

/// Owns the in-flight record of a key on behalf of a running fetch.
struct OwnerGuard<'a, T> {
    state: &'a Mutex<State<T>>,
    key: CacheKey,
    ticket: Option<OwnerTicket>,
}

impl<T: Clone> OwnerGuard<'_, T> {
    /// Stores a successful value, hands the outcome to all waiters and removes the record.
    ///
    /// An owner whose record has been taken over still stores its value, unless its successor
    /// has already stored a fresh one.
    fn release(mut self, settled: Settled<T>, ttl: Duration) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let value = match &settled {
            Settled::Value(value) => Some(value.clone()),
            Settled::SoftError(_) => {
                state.stats.errors += 1;
                metric!(counter("requests.error") += 1, "kind" => "soft");
                None
            }
            Settled::Failed(_) => {
                state.stats.errors += 1;
                metric!(counter("requests.error") += 1, "kind" => "retries_exhausted");
                None
            }
        };

        let released = state.in_flight.notify_and_release(&self.key, ticket, settled);
        if !released {
            tracing::debug!(key = %self.key, "In-flight fetch was taken over in the meantime");
        }

        if let Some(value) = value {
            if released || state.store.get_fresh(&self.key).is_none() {
                state.store.put(self.key.clone(), value, ttl);
            }
        }
    }
}

impl<T> Drop for OwnerGuard<'_, T> {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };

        if let Ok(mut state) = self.state.lock() {
            // only fails if the record has been taken over already
            if state.in_flight.abandon(&self.key, ticket) {
                tracing::debug!(key = %self.key, "Abandoned in-flight fetch");
            }
        }
    }
}
