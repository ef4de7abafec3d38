use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fetchcache::config::Config;
use fetchcache::{BatchRunner, RequestCache};
use sentry::SentryFutureExt;
use serde_json::Value;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{SimulatedApi, WorkloadsConfig, process_request, warmup_tasks};

/// The measurements of a single workload.
struct WorkloadReport {
    endpoint: String,
    concurrency: usize,
    durations: DDSketch,
    errors: usize,
}

pub async fn perform_stresstest(
    config: Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    let cache: Arc<RequestCache<Value>> = Arc::new(RequestCache::new(&config.cache));
    let runner = BatchRunner::from_config(&config.batch);

    let apis: Vec<_> = workloads
        .workloads
        .into_iter()
        .map(SimulatedApi::new)
        .collect();

    // warmup: request every key once so that the cache is populated
    {
        let start = Instant::now();

        let tasks: Vec<_> = apis
            .iter()
            .flat_map(|api| warmup_tasks(&cache, api))
            .collect();
        let outcome = runner
            .run_batch(tasks, config.batch.timeout_per_task)
            .await;

        println!(
            "Warmup: {:?} ({} cached, {} failed)",
            start.elapsed(),
            outcome.results.len(),
            outcome.failures.len(),
        );
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(apis.len());
    for api in apis {
        let concurrency = api.workload().concurrency.max(1);
        let permits = u32::try_from(concurrency).context("workload concurrency is too large")?;
        let deadline = tokio::time::Instant::now() + duration;
        let cache = Arc::clone(&cache);

        let task = tokio::spawn(async move {
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let errors = Arc::new(AtomicUsize::new(0));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let api = api.clone();
                        let cache = Arc::clone(&cache);
                        let task_durations = Arc::clone(&task_durations);
                        let errors = Arc::clone(&errors);
                        let task_start = Instant::now();

                        let hub = sentry::Hub::new_from_top(sentry::Hub::current());
                        let ctx = sentry::TransactionContext::new("stresstest", "request");
                        let transaction = hub.start_transaction(ctx);

                        let future = async move {
                            if process_request(&cache, &api).await.is_err() {
                                errors.fetch_add(1, Ordering::Relaxed);
                            }

                            transaction.finish();
                            task_durations.lock().unwrap().add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        };

                        tokio::spawn(future.bind_hub(hub));
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // acquiring all permits waits for the outstanding requests
            let _permits = semaphore.acquire_many(permits).await;

            let durations = std::mem::take(&mut *task_durations.lock().unwrap());
            WorkloadReport {
                endpoint: api.workload().endpoint.clone(),
                concurrency,
                durations,
                errors: errors.load(Ordering::Relaxed),
            }
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let report = task.context("workload task failed")?;
        print_workload(i, &report, duration);
    }

    println!();
    println!("{}", cache.stats());

    runner.shutdown().await;
    Ok(())
}

fn print_workload(i: usize, report: &WorkloadReport, duration: Duration) {
    let WorkloadReport {
        endpoint,
        concurrency,
        durations,
        errors,
    } = report;

    let ops = durations.count();
    let ops_ps = ops as f64 / duration.as_secs_f64().max(f64::EPSILON);
    println!(
        "Workload {i} ({endpoint}, concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s, {errors} errors"
    );

    if ops == 0 {
        return;
    }

    let quantile = |q| {
        let secs = durations.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(secs)
    };
    let avg = Duration::from_secs_f64(durations.sum().unwrap_or_default() / ops as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
}
