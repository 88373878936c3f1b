//! The service pool: owns the active worker services, the queue handles and
//! the background loops.
//!
//! The active set is an immutable snapshot swapped atomically, so readers
//! such as [`ServicePool::has_available_service`] never observe a partly
//! rebuilt set.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use sdpool_core::backoff::BackoffConfig;
use sdpool_core::queue::{NotifyQueue, QueueError, TaskQueue};
use sdpool_core::session::ClientRegistry;
use sdpool_core::store::{CreditLedger, JobStore};
use sdpool_core::task::Task;
use sdpool_events::{DispatchStats, NotificationDispatcher};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::generator::GeneratorFactory;
use crate::reconcile::{ReconcileSettings, ReconcileStats, Reconciler};
use crate::service::{WorkerContext, WorkerService};

/// How long [`ServicePool::shutdown`] waits for each worker by default.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A spawned background loop and its counters.
pub struct LoopHandle<S> {
    pub handle: JoinHandle<()>,
    pub stats: Arc<S>,
}

pub struct ServicePool {
    services: ArcSwap<Vec<Arc<WorkerService>>>,
    /// Serializes `init_services` callers.
    init_lock: Mutex<()>,
    cancel: CancellationToken,
    ctx: WorkerContext,
    factory: Arc<dyn GeneratorFactory>,
    shutdown_timeout: Duration,
}

impl ServicePool {
    /// Create a pool with no active services.
    pub fn new(
        task_queue: Arc<TaskQueue>,
        notify_queue: Arc<NotifyQueue>,
        job_store: Arc<dyn JobStore>,
        factory: Arc<dyn GeneratorFactory>,
    ) -> Self {
        Self {
            services: ArcSwap::from_pointee(Vec::new()),
            init_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
            ctx: WorkerContext {
                task_queue,
                notify_queue,
                job_store,
                backoff: BackoffConfig::default(),
            },
            factory,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Override the backoff used by workers and the dispatcher after
    /// transient queue failures.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.ctx.backoff = backoff;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn task_queue(&self) -> Arc<TaskQueue> {
        Arc::clone(&self.ctx.task_queue)
    }

    pub fn notify_queue(&self) -> Arc<NotifyQueue> {
        Arc::clone(&self.ctx.notify_queue)
    }

    /// Replace the active services with one per enabled entry of `configs`.
    ///
    /// Currently active services are signalled to stop but not awaited; a
    /// task they are running finishes in the background. Services are named
    /// `sd-service-{index}` after their position in `configs`. Returns the
    /// number of services started.
    pub async fn init_services(&self, configs: &[ServiceConfig]) -> usize {
        let _guard = self.init_lock.lock().await;
        if self.cancel.is_cancelled() {
            tracing::warn!("Service pool is shut down, not starting services");
            return 0;
        }

        let previous = self.services.load_full();
        for service in previous.iter() {
            service.stop();
        }
        if !previous.is_empty() {
            tracing::info!(count = previous.len(), "Stopping previous worker services");
        }

        let mut started = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let name = format!("sd-service-{index}");
            if !config.enabled {
                tracing::debug!(service = %name, "Service disabled, skipping");
                continue;
            }

            let generator = self.factory.build(config);
            started.push(Arc::new(WorkerService::start(
                name,
                config.clone(),
                self.ctx.clone(),
                generator,
                self.cancel.child_token(),
            )));
        }

        let count = started.len();
        self.services.store(Arc::new(started));
        tracing::info!(count, configured = configs.len(), "Worker services initialized");
        count
    }

    /// Queue a task for the next free worker. Fails only if the task
    /// queue rejects it.
    pub async fn submit(&self, task: Task) -> Result<(), QueueError> {
        let task_id = task.task_id.clone();
        self.ctx.task_queue.push(task).await?;
        tracing::debug!(task_id = %task_id, "Task submitted");
        Ok(())
    }

    /// Whether any worker service is active. Best-effort.
    pub fn has_available_service(&self) -> bool {
        !self.services.load().is_empty()
    }

    /// Names of the services in the current snapshot.
    pub fn active_services(&self) -> Vec<String> {
        self.services
            .load()
            .iter()
            .map(|service| service.name().to_string())
            .collect()
    }

    /// The current snapshot of active services.
    pub fn services(&self) -> Arc<Vec<Arc<WorkerService>>> {
        self.services.load_full()
    }

    /// Spawn the notification dispatch loop, bound to the pool's lifetime.
    pub fn spawn_notification_dispatch(
        &self,
        registry: Arc<dyn ClientRegistry>,
    ) -> LoopHandle<DispatchStats> {
        let dispatcher = NotificationDispatcher::new(self.notify_queue(), registry)
            .with_backoff(self.ctx.backoff.clone());
        let stats = dispatcher.stats();
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move { dispatcher.run(cancel).await });
        LoopHandle { handle, stats }
    }

    /// Spawn the reconciliation loop, bound to the pool's lifetime.
    pub fn spawn_reconciler(
        &self,
        ledger: Arc<dyn CreditLedger>,
        settings: ReconcileSettings,
    ) -> LoopHandle<ReconcileStats> {
        let reconciler = Reconciler::new(Arc::clone(&self.ctx.job_store), ledger, settings);
        let stats = reconciler.stats();
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move { reconciler.run(cancel).await });
        LoopHandle { handle, stats }
    }

    /// Stop every worker and both loops, waiting up to the shutdown timeout
    /// for each worker to exit.
    pub async fn shutdown(&self) {
        let _guard = self.init_lock.lock().await;
        self.cancel.cancel();

        let services = self.services.swap(Arc::new(Vec::new()));
        let mut stuck = 0usize;
        for service in services.iter() {
            if !service.join(self.shutdown_timeout).await {
                stuck += 1;
            }
        }
        tracing::info!(count = services.len(), stuck, "Service pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
