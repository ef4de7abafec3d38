//! A fixed-size worker pool for running independent tasks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use sentry::{Hub, SentryFutureExt};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use crate::config::BatchConfig;
use crate::utils::futures::{m, measure};

/// The reason a task of a batch did not produce a result.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The task returned an error.
    #[error("task failed: {0:#}")]
    Failed(anyhow::Error),
    /// The task did not finish within the per-task timeout.
    #[error("task timed out after {0:?}")]
    TimedOut(Duration),
    /// The task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was still queued or running when the deadline of the whole batch passed.
    #[error("batch deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    /// The task was cancelled by the runtime.
    #[error("task was cancelled")]
    Cancelled,
    /// The runner was shut down before the batch was submitted.
    #[error("batch runner is shut down")]
    ShutDown,
}

/// A failed task, identified by its position in the submitted batch.
#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub error: BatchError,
}

/// The results of [`BatchRunner::run_batch`].
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// The values of all successful tasks, in completion order.
    pub results: Vec<T>,
    /// All failed tasks, in the order their failure was noticed.
    pub failures: Vec<BatchFailure>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> BatchOutcome<T> {
    fn fail(&mut self, index: usize, error: BatchError) {
        let status = match error {
            BatchError::Failed(_) => "failed",
            BatchError::TimedOut(_) => "timed_out",
            BatchError::Panicked(_) => "panicked",
            BatchError::DeadlineExceeded(_) => "deadline_exceeded",
            BatchError::Cancelled => "cancelled",
            BatchError::ShutDown => "shut_down",
        };
        metric!(counter("batch.tasks") += 1, "status" => status);
        tracing::warn!(index, error = &error as &dyn std::error::Error, "Batch task failed");

        self.failures.push(BatchFailure { index, error });
    }
}

type TaskResult<T> = Result<Option<T>, BatchError>;

/// Runs batches of independent tasks on a fixed number of workers.
///
/// All tasks of a batch are submitted at once, but at most [`workers`](Self::workers) of them run
/// at the same time, across all batches run by the same runner. A failing task never affects the
/// other tasks of its batch.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    workers: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl BatchRunner {
    /// Creates a runner with the given number of workers, which is at least one.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            tracker: TaskTracker::new(),
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.workers)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs all `tasks` and collects their results.
    ///
    /// Each task may run for `timeout_per_task` once it has been picked up by a worker. The batch
    /// as a whole is bounded by `timeout_per_task` times the number of tasks; tasks that are still
    /// queued or running at that point are aborted. Tasks resolving to `Ok(None)` produce neither a
    /// result nor a failure.
    pub async fn run_batch<T, I, F>(&self, tasks: I, timeout_per_task: Duration) -> BatchOutcome<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
        T: Send + 'static,
    {
        let tasks: Vec<_> = tasks.into_iter().collect();
        let mut outcome = BatchOutcome::default();

        if tasks.is_empty() {
            return outcome;
        }
        if self.tracker.is_closed() {
            for index in 0..tasks.len() {
                outcome.fail(index, BatchError::ShutDown);
            }
            return outcome;
        }

        let task_count = tasks.len();
        let factor = u32::try_from(task_count).unwrap_or(u32::MAX);
        let deadline = timeout_per_task.saturating_mul(factor);
        tracing::debug!(tasks = task_count, workers = self.workers, "Running batch");
        metric!(gauge("batch.size") = task_count as u64);

        let start = Instant::now();
        let mut running = FuturesUnordered::new();
        let mut abort_handles = Vec::with_capacity(task_count);

        for (index, task) in tasks.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let future = async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| BatchError::ShutDown)?;

                match tokio::time::timeout(timeout_per_task, task).await {
                    Ok(result) => result.map_err(BatchError::Failed),
                    Err(_) => Err(BatchError::TimedOut(timeout_per_task)),
                }
            };

            let future = measure("batch.task", m::result, future)
                .bind_hub(Hub::new_from_top(Hub::current()));
            let handle = self.tracker.spawn(future);

            abort_handles.push(handle.abort_handle());
            running.push(async move { (index, handle.await) });
        }

        let mut finished = vec![false; task_count];
        let collect = async {
            while let Some((index, result)) = running.next().await {
                finished[index] = true;
                match flatten_join(result) {
                    Ok(Some(value)) => {
                        metric!(counter("batch.tasks") += 1, "status" => "ok");
                        outcome.results.push(value);
                    }
                    Ok(None) => {
                        metric!(counter("batch.tasks") += 1, "status" => "empty");
                    }
                    Err(error) => outcome.fail(index, error),
                }
            }
        };

        let completed = tokio::time::timeout(deadline, collect).await.is_ok();
        if !completed {
            tracing::error!(?deadline, "Batch deadline exceeded, aborting remaining tasks");
            for (index, done) in finished.iter().enumerate() {
                if !done {
                    abort_handles[index].abort();
                    outcome.fail(index, BatchError::DeadlineExceeded(deadline));
                }
            }
        }

        metric!(timer("batch.duration") = start.elapsed());
        tracing::debug!(
            results = outcome.results.len(),
            failures = outcome.failures.len(),
            "Batch finished",
        );

        outcome
    }

    /// Stops accepting new batches and waits for all running tasks to finish.
    ///
    /// Tasks still waiting for a worker are not started, and report [`BatchError::ShutDown`].
    /// Calling this more than once is fine. Batches submitted afterwards report every task as
    /// [`BatchError::ShutDown`].
    pub async fn shutdown(&self) {
        if self.tracker.close() {
            tracing::debug!(running = self.tracker.len(), "Shutting down batch runner");
        }
        self.permits.close();
        self.tracker.wait().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.tracker.is_closed()
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

fn flatten_join<T>(result: Result<TaskResult<T>, JoinError>) -> TaskResult<T> {
    match result {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            let panic = err.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            Err(BatchError::Panicked(message))
        }
        Err(_) => Err(BatchError::Cancelled),
    }
}
