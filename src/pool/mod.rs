//! Shared bounded task pool for per-node work.
//!
//! Fan-out width is the number of worker permits, never the batch size. Tasks
//! beyond the worker count wait in a bounded queue; once the queue is full a
//! submitter backs off for `queue_wait` and is then rejected with
//! [`PoolError::Saturated`]. Batches collect rejections, panics and results
//! side by side so awaiting a batch never fails fast.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Sizing of a [`TaskPool`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolConfig {
    /// Tasks allowed to run at once.
    pub workers: usize,
    /// Tasks allowed to wait for a worker.
    pub queue_capacity: usize,
    /// How long a submitter waits for queue space before being rejected.
    pub queue_wait: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 256,
            queue_wait: Duration::from_secs(5),
        }
    }
}

/// Errors raised when submitting work.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PoolError {
    /// The pool configuration cannot run any task.
    #[error("task pool needs at least one worker")]
    NoWorkers,
    /// Every worker is busy and the queue stayed full for the whole wait.
    #[error("task pool saturated: {key} rejected after waiting {waited:?} for one of {capacity} slots")]
    Saturated {
        /// Key of the rejected task.
        key: String,
        /// Total slots (workers plus queue).
        capacity: usize,
        /// Time spent waiting.
        waited: Duration,
    },
    /// The pool was shut down.
    #[error("task pool closed")]
    Closed,
}

/// Failure of one pooled task that is not the task's own result.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TaskError {
    /// The task was never started.
    #[error(transparent)]
    Rejected(#[from] PoolError),
    /// The task panicked.
    #[error("task {key} panicked: {message}")]
    Panicked {
        /// Task key.
        key: String,
        /// Panic payload, when it was a string.
        message: String,
    },
    /// The task was cancelled before completing.
    #[error("task {key} was cancelled")]
    Cancelled {
        /// Task key.
        key: String,
    },
}

/// Bounded pool shared by every fan-out of one orchestrator.
#[derive(Clone, Debug)]
pub struct TaskPool {
    config: PoolConfig,
    workers: Arc<Semaphore>,
    slots: Arc<Semaphore>,
}

impl TaskPool {
    /// Creates a pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoWorkers`] when `config.workers` is zero.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        if config.workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        Ok(Self {
            config,
            workers: Arc::new(Semaphore::new(config.workers)),
            slots: Arc::new(Semaphore::new(
                config.workers.saturating_add(config.queue_capacity),
            )),
        })
    }

    /// Returns the pool sizing.
    #[must_use]
    pub const fn config(&self) -> PoolConfig {
        self.config
    }

    /// Returns the number of idle workers.
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Queues `task` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Saturated`] when no slot frees up within the
    /// configured wait and [`PoolError::Closed`] after shutdown.
    pub async fn submit<T, F>(&self, key: impl Into<String>, task: F) -> Result<PoolTask<T>, PoolError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let key = key.into();
        let slot = match timeout(self.config.queue_wait, Arc::clone(&self.slots).acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                warn!(task = %key, "task pool saturated, rejecting submission");
                return Err(PoolError::Saturated {
                    key,
                    capacity: self.config.workers.saturating_add(self.config.queue_capacity),
                    waited: self.config.queue_wait,
                });
            }
        };

        let workers = Arc::clone(&self.workers);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let _slot = slot;
            let _worker = workers
                .acquire_owned()
                .await
                .map_err(|_| TaskError::Rejected(PoolError::Closed))?;
            debug!(task = %task_key, "task started");
            Ok(task.await)
        });
        Ok(PoolTask { key, handle })
    }

    /// Stops accepting work. Queued tasks that have not started are rejected.
    pub fn close(&self) {
        self.slots.close();
        self.workers.close();
    }
}

/// Handle to one pooled task.
#[derive(Debug)]
pub struct PoolTask<T> {
    key: String,
    handle: JoinHandle<Result<T, TaskError>>,
}

impl<T> PoolTask<T> {
    /// Key the task was submitted under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] when the task panicked, was cancelled, or never
    /// obtained a worker.
    pub async fn join(self) -> Result<T, TaskError> {
        let Self { key, handle } = self;
        match handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => {
                let payload = err.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|text| (*text).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| String::from("non-string panic payload"));
                Err(TaskError::Panicked { key, message })
            }
            Err(_) => Err(TaskError::Cancelled { key }),
        }
    }
}

/// Results and failures of a finished batch, keyed by task key.
#[derive(Debug)]
pub struct Completion<T> {
    /// Values returned by tasks that ran to completion.
    pub results: BTreeMap<String, T>,
    /// Tasks that were rejected, panicked or were cancelled.
    pub exceptions: BTreeMap<String, TaskError>,
}

impl<T> Completion<T> {
    /// Returns `true` when no task failed outside its own result.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.exceptions.is_empty()
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self {
            results: BTreeMap::new(),
            exceptions: BTreeMap::new(),
        }
    }
}

/// A group of tasks submitted together and awaited together.
#[derive(Debug)]
pub struct Batch<T> {
    tasks: Vec<PoolTask<T>>,
    rejected: BTreeMap<String, TaskError>,
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            rejected: BTreeMap::new(),
        }
    }
}

impl<T: Send + 'static> Batch<T> {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits `task` to `pool`, recording a rejection instead of failing.
    pub async fn submit<F>(&mut self, pool: &TaskPool, key: impl Into<String>, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let key = key.into();
        match pool.submit(key.clone(), task).await {
            Ok(handle) => self.tasks.push(handle),
            Err(err) => {
                self.rejected.insert(key, TaskError::Rejected(err));
            }
        }
    }

    /// Number of tasks submitted, including rejected ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len().saturating_add(self.rejected.len())
    }

    /// Returns `true` when nothing was submitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for every task; see [`await_completion`].
    pub async fn await_completion(self) -> Completion<T> {
        let mut completion = await_completion(self.tasks).await;
        completion.exceptions.extend(self.rejected);
        completion
    }
}

/// Waits for every task and partitions the outcomes.
///
/// Never returns early: a panicking task is recorded in
/// [`Completion::exceptions`] while its siblings keep running.
pub async fn await_completion<T>(tasks: impl IntoIterator<Item = PoolTask<T>>) -> Completion<T> {
    let joined = join_all(tasks.into_iter().map(|task| async move {
        let key = task.key.clone();
        (key, task.join().await)
    }))
    .await;

    let mut completion = Completion::default();
    for (key, outcome) in joined {
        match outcome {
            Ok(value) => {
                completion.results.insert(key, value);
            }
            Err(err) => {
                warn!(task = %key, error = %err, "task did not complete");
                completion.exceptions.insert(key, err);
            }
        }
    }
    completion
}

#[cfg(test)]
mod tests;
