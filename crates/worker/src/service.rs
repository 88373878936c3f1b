//! A single worker service: pulls tasks from the shared task queue and runs
//! them one at a time against its generator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sdpool_core::backoff::{Backoff, BackoffConfig};
use sdpool_core::job::{Job, JobState};
use sdpool_core::queue::{NotifyQueue, TaskQueue};
use sdpool_core::store::{JobStore, StoreError};
use sdpool_core::task::{NotifyMessage, Task};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::generator::{Generator, ProgressReporter};

/// Collaborators shared by every worker service in a pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub task_queue: Arc<TaskQueue>,
    pub notify_queue: Arc<NotifyQueue>,
    pub job_store: Arc<dyn JobStore>,
    /// Backoff applied after transient task queue failures.
    pub backoff: BackoffConfig,
}

/// How one popped task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    /// No job could be created; the task was dropped.
    Skipped,
}

/// Per-service task counters.
#[derive(Debug, Default)]
pub struct WorkerStats {
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl WorkerStats {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Tasks popped from the queue, whatever their outcome.
    pub fn processed(&self) -> u64 {
        self.completed() + self.failed() + self.skipped()
    }

    fn record(&self, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.completed,
            TaskOutcome::Failed => &self.failed,
            TaskOutcome::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle to a running worker service.
pub struct WorkerService {
    name: String,
    config: ServiceConfig,
    cancel: CancellationToken,
    stats: Arc<WorkerStats>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerService {
    /// Spawn the service's consume loop.
    ///
    /// `cancel` should be a child of the pool's token so pool shutdown
    /// reaches every service.
    pub fn start(
        name: impl Into<String>,
        config: ServiceConfig,
        ctx: WorkerContext,
        generator: Arc<dyn Generator>,
        cancel: CancellationToken,
    ) -> Self {
        let name = name.into();
        let stats = Arc::new(WorkerStats::default());
        let worker = Worker {
            name: name.clone(),
            model: config.model.clone(),
            ctx,
            generator,
            stats: Arc::clone(&stats),
        };

        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move { worker.run(loop_cancel).await });

        tracing::info!(
            service = %name,
            api_url = %config.api_url,
            display_name = config.name.as_deref().unwrap_or(""),
            "Worker service started",
        );

        Self {
            name,
            config,
            cancel,
            stats,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Signal the service to stop pulling tasks. Does not wait.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait up to `timeout` for the consume loop to exit.
    ///
    /// Returns `true` if the loop has exited (or was already joined).
    pub async fn join(&self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.lock().await.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(service = %self.name, error = %e, "Worker service task panicked");
                true
            }
            Err(_) => {
                tracing::warn!(
                    service = %self.name,
                    timeout_secs = timeout.as_secs(),
                    "Worker service did not stop in time",
                );
                false
            }
        }
    }
}

/// State owned by the spawned consume loop.
struct Worker {
    name: String,
    /// Model tag of the backend, echoed in completion notices.
    model: Option<String>,
    ctx: WorkerContext,
    generator: Arc<dyn Generator>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.ctx.backoff.clone());

        loop {
            let popped = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                popped = self.ctx.task_queue.pop() => popped,
            };

            match popped {
                Ok(task) => {
                    backoff.reset();
                    // An in-flight task runs to completion even if a stop
                    // arrives meanwhile.
                    let outcome = self.process(task).await;
                    self.stats.record(outcome);
                }
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_sleep();
                    tracing::warn!(
                        service = %self.name,
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Task queue pop failed, backing off",
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    tracing::info!(service = %self.name, error = %e, "Task queue closed");
                    break;
                }
            }
        }

        tracing::info!(service = %self.name, "Worker service stopped");
    }

    async fn process(&self, task: Task) -> TaskOutcome {
        let store = &self.ctx.job_store;
        let job = Job::pending(task.task_id.clone(), task.user_id, task.power);

        match store.create(&job).await {
            Ok(()) => {}
            Err(StoreError::Conflict(reason)) => {
                tracing::warn!(
                    service = %self.name,
                    task_id = %task.task_id,
                    reason = %reason,
                    "Duplicate task, skipping",
                );
                return TaskOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(
                    service = %self.name,
                    task_id = %task.task_id,
                    error = %e,
                    "Failed to create job, skipping task",
                );
                return TaskOutcome::Skipped;
            }
        }

        tracing::debug!(
            service = %self.name,
            task_id = %task.task_id,
            user_id = task.user_id,
            "Task accepted",
        );

        let reporter = ProgressReporter::new(Arc::clone(store), task.task_id.clone());
        match self.generator.generate(&task, &reporter).await {
            Ok(result) => {
                self.complete(&job).await;
                let notice = NotifyMessage::completed(&task, &result, self.model.as_deref());
                self.notify(notice).await;
                tracing::info!(service = %self.name, task_id = %task.task_id, "Task completed");
                TaskOutcome::Completed
            }
            Err(e) => {
                tracing::warn!(
                    service = %self.name,
                    task_id = %task.task_id,
                    error = %e,
                    "Task failed",
                );
                self.fail(&job).await;
                self.notify(NotifyMessage::failed(&task, &e.to_string())).await;
                TaskOutcome::Failed
            }
        }
    }

    /// Mark the job completed, then remove it.
    async fn complete(&self, job: &Job) {
        let store = &self.ctx.job_store;
        match store.update_progress(&job.task_id, JobState::Completed).await {
            Ok(true) => {
                let completed = Job {
                    state: JobState::Completed,
                    ..job.clone()
                };
                if let Err(e) = store.delete(&completed).await {
                    tracing::error!(task_id = %job.task_id, error = %e, "Failed to delete completed job");
                }
            }
            Ok(false) => {
                tracing::warn!(
                    task_id = %job.task_id,
                    "Job was reaped before completion was recorded",
                );
            }
            Err(e) => {
                tracing::error!(task_id = %job.task_id, error = %e, "Failed to mark job completed");
            }
        }
    }

    /// Mark the job failed; the reconciler refunds and removes it.
    async fn fail(&self, job: &Job) {
        match self
            .ctx
            .job_store
            .update_progress(&job.task_id, JobState::Failed)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(task_id = %job.task_id, "Job already terminal or reaped");
            }
            Err(e) => {
                tracing::error!(task_id = %job.task_id, error = %e, "Failed to mark job failed");
            }
        }
    }

    async fn notify(&self, message: NotifyMessage) {
        let user_id = message.user_id;
        if let Err(e) = self.ctx.notify_queue.push(message).await {
            tracing::warn!(service = %self.name, user_id, error = %e, "Failed to queue notification");
        }
    }
}
