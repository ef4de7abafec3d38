//! Helpers for testing the request cache and batch runner.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - A [`FakeApi`] stands in for the remote API. Hand out its [`fetcher`](FakeApi::fetcher) to
//!    the code under test, and keep the [`FakeApi`] around to inspect the calls it received.
//!
//!  - Timestamps are taken from [`tokio::time::Instant`], so they work with paused time
//!    (`#[tokio::test(start_paused = true)]`).

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use fetchcache::{FetchOutcome, FetchRequest, SoftError, TransportError};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `fetchcache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("fetchcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A transport error for scripting a [`FakeApi`].
pub fn connection_error<T>() -> FetchOutcome<T> {
    FetchOutcome::HardError(TransportError::Connection("connection reset by peer".into()))
}

/// A soft error for scripting a [`FakeApi`].
pub fn not_found<T>() -> FetchOutcome<T> {
    FetchOutcome::SoftError(SoftError::Rejected("not found".into()))
}

/// A call received by a [`FakeApi`].
#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub request: FetchRequest,
}

#[derive(Debug)]
struct Script<T> {
    upcoming: VecDeque<FetchOutcome<T>>,
    last: FetchOutcome<T>,
}

impl<T: Clone> Script<T> {
    fn next(&mut self) -> FetchOutcome<T> {
        if let Some(outcome) = self.upcoming.pop_front() {
            self.last = outcome;
        }
        self.last.clone()
    }
}

#[derive(Debug)]
struct Inner<T> {
    script: Mutex<Script<T>>,
    calls: Mutex<Vec<Call>>,
}

/// A scripted stand-in for a remote API.
///
/// Answers with the scripted outcomes in order, and keeps repeating the last one once the script
/// is exhausted. Every call is recorded.
#[derive(Debug)]
pub struct FakeApi<T> {
    inner: Arc<Inner<T>>,
    latency: Duration,
}

impl<T> Clone for FakeApi<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            latency: self.latency,
        }
    }
}

impl<T: Clone + Send + 'static> FakeApi<T> {
    /// An API always answering with `outcome`.
    pub fn new(outcome: FetchOutcome<T>) -> Self {
        Self::scripted([outcome])
    }

    /// An API always answering with `value`.
    pub fn returning(value: T) -> Self {
        Self::new(FetchOutcome::Success(value))
    }

    /// An API answering with `outcomes` in order.
    ///
    /// # Panics
    ///
    /// Panics if `outcomes` is empty.
    pub fn scripted(outcomes: impl IntoIterator<Item = FetchOutcome<T>>) -> Self {
        let upcoming: VecDeque<_> = outcomes.into_iter().collect();
        let last = upcoming.back().cloned().expect("script must not be empty");

        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(Script { upcoming, last }),
                calls: Mutex::new(Vec::new()),
            }),
            latency: Duration::ZERO,
        }
    }

    /// Delays every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// A fetch function to pass to [`RequestCache::get_or_fetch`](fetchcache::RequestCache::get_or_fetch).
    pub fn fetcher(
        &self,
    ) -> impl Fn(Arc<FetchRequest>) -> BoxFuture<'static, FetchOutcome<T>> + Clone + Send + Sync + use<T>
    {
        let api = self.clone();
        move |request| api.call(request)
    }

    fn call(&self, request: Arc<FetchRequest>) -> BoxFuture<'static, FetchOutcome<T>> {
        self.inner.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            request: FetchRequest::clone(&request),
        });

        let outcome = self.inner.script.lock().unwrap().next();
        let latency = self.latency;
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            outcome
        }
        .boxed()
    }

    /// The number of calls received so far.
    pub fn calls(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    /// All calls received so far, in order.
    pub fn call_log(&self) -> Vec<Call> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// The times at which calls were received.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_log().into_iter().map(|call| call.at).collect()
    }

    /// The number of calls received per endpoint.
    pub fn hits(&self) -> BTreeMap<String, usize> {
        let mut hits = BTreeMap::new();
        for call in self.inner.calls.lock().unwrap().iter() {
            *hits.entry(call.request.endpoint.clone()).or_default() += 1;
        }
        hits
    }
}
