use std::sync::Arc;
use std::time::Duration;

use fetchcache::{
    FetchOutcome, FetchRequest, Fetched, RequestCache, RequestError, SoftError, TransportError,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Deserializer, de};
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

/// A stream of requests against one endpoint of a simulated remote API.
#[derive(Debug, Clone, Deserialize)]
pub struct Workload {
    pub endpoint: String,
    pub concurrency: usize,
    /// The number of distinct parameter sets requests are drawn from.
    #[serde(default = "default_keys")]
    pub keys: u32,
    /// How long the simulated API takes to answer.
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,
    /// The share of answers that are transport errors.
    #[serde(default, deserialize_with = "deserialize_rate")]
    pub failure_rate: f64,
    /// The share of answers that are soft errors.
    #[serde(default, deserialize_with = "deserialize_rate")]
    pub soft_error_rate: f64,
}

/// Accepts probabilities between `0` and `1`.
fn deserialize_rate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let rate = f64::deserialize(deserializer)?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(de::Error::invalid_value(
            de::Unexpected::Float(rate),
            &"a rate between 0 and 1",
        ))
    }
}

fn default_keys() -> u32 {
    100
}

impl Workload {
    fn params(&self, id: u32) -> Value {
        json!({ "id": id })
    }

    /// Draws random parameters from the key space.
    fn random_params(&self) -> Value {
        let id = rand::rng().random_range(0..self.keys.max(1));
        self.params(id)
    }
}

/// A remote API answering according to the rates of a [`Workload`].
#[derive(Debug, Clone)]
pub struct SimulatedApi {
    workload: Arc<Workload>,
}

impl SimulatedApi {
    pub fn new(workload: Workload) -> Self {
        Self {
            workload: Arc::new(workload),
        }
    }

    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    pub fn fetcher(
        &self,
    ) -> impl Fn(Arc<FetchRequest>) -> BoxFuture<'static, FetchOutcome<Value>> + Clone + Send + Sync + use<>
    {
        let api = self.clone();
        move |request| api.respond(request)
    }

    fn respond(&self, request: Arc<FetchRequest>) -> BoxFuture<'static, FetchOutcome<Value>> {
        let Workload {
            latency,
            failure_rate,
            soft_error_rate,
            ..
        } = *self.workload;

        let outcome = {
            let mut rng = rand::rng();
            if rng.random_bool(failure_rate) {
                FetchOutcome::HardError(TransportError::Server {
                    status: 503,
                    message: "service unavailable".into(),
                })
            } else if rng.random_bool(soft_error_rate) {
                FetchOutcome::SoftError(SoftError::Rejected("not found".into()))
            } else {
                FetchOutcome::Success(json!({
                    "endpoint": request.endpoint,
                    "params": request.params,
                }))
            }
        };

        async move {
            tokio::time::sleep(latency).await;
            outcome
        }
        .boxed()
    }
}

/// Sends a single request with random parameters through the cache.
pub async fn process_request(
    cache: &RequestCache<Value>,
    api: &SimulatedApi,
) -> Result<Fetched<Value>, RequestError> {
    let workload = api.workload();
    let params = workload.random_params();
    cache
        .get_or_fetch(&workload.endpoint, &params, api.fetcher())
        .await
}

/// Requests every key of the workload once, to make sure the cache is warm.
pub fn warmup_tasks(
    cache: &Arc<RequestCache<Value>>,
    api: &SimulatedApi,
) -> Vec<BoxFuture<'static, anyhow::Result<Option<Value>>>> {
    let workload = api.workload();
    (0..workload.keys)
        .map(|id| {
            let cache = Arc::clone(cache);
            let api = api.clone();
            let params = workload.params(id);
            async move {
                let endpoint = &api.workload().endpoint;
                match cache.get_or_fetch(endpoint, &params, api.fetcher()).await? {
                    Fetched::Value(value) => Ok(Some(value)),
                    Fetched::SoftError(_) => Ok(None),
                }
            }
            .boxed()
        })
        .collect()
}
